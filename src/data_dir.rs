use std::path::{Path, PathBuf};

use crate::{
    entity::EntityKind,
    error::{Error, Result},
};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DEVBOOK_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/devbook/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DEVBOOK_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("devbook")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_db(&self) -> PathBuf {
        self.root.join("store.redb")
    }

    pub fn index_dir(&self) -> Result<PathBuf> {
        self.ensure_dir(self.root.join("index"))
    }

    /// Directory holding the uploaded bytes for one entity kind.
    pub fn storage_dir(&self, kind: EntityKind) -> Result<PathBuf> {
        self.ensure_dir(self.root.join(kind.storage_dir()))
    }

    fn ensure_dir(&self, path: PathBuf) -> Result<PathBuf> {
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
