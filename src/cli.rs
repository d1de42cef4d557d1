use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    api::Timeouts,
    entity::EntityKind,
    server::ServerConfig,
};

#[derive(Debug, Parser)]
#[command(
    name = "devbook",
    about = "A personal library server for books and files"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP API
    Serve(ServeArgs),
    /// Rebuild search indexes and tag counts from the document store
    Reindex(ReindexArgs),
    /// Show record, index and tag statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub bind: SocketAddr,

    /// Browser origin allowed by CORS
    #[arg(long, default_value = "http://localhost:3000")]
    pub cors_origin: String,

    /// Deadline for document store operations, in seconds
    #[arg(long, default_value = "5")]
    pub store_timeout_secs: u64,

    /// Deadline for search index operations, in seconds
    #[arg(long, default_value = "10")]
    pub index_timeout_secs: u64,

    /// Largest accepted upload body, in megabytes
    #[arg(long, default_value = "8")]
    pub max_upload_mb: usize,
}

impl ServeArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            cors_origin: self.cors_origin.clone(),
            timeouts: Timeouts {
                store: Duration::from_secs(self.store_timeout_secs),
                index: Duration::from_secs(self.index_timeout_secs),
            },
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
        }
    }
}

// -- Reindex --

#[derive(Debug, Parser)]
pub struct ReindexArgs {
    /// Reindex only this kind (tag counts are always recomputed)
    #[arg(long, value_enum)]
    pub kind: Option<EntityKind>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "devbook",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn serve_defaults_match_server_config() {
        let cli = Cli::parse_from(["devbook", "serve"]);
        match cli.command {
            Command::Serve(args) => {
                let config = args.server_config();
                let defaults = ServerConfig::default();
                assert_eq!(config.bind, defaults.bind);
                assert_eq!(config.cors_origin, defaults.cors_origin);
                assert_eq!(config.timeouts, defaults.timeouts);
                assert_eq!(config.max_upload_bytes, defaults.max_upload_bytes);
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "devbook",
            "reindex",
            "--kind",
            "file",
            "--data-dir",
            "/tmp/devbook",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/devbook")));
        match cli.command {
            Command::Reindex(args) => assert_eq!(args.kind, Some(EntityKind::File)),
            _ => panic!("expected reindex command"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["devbook", "-q", "-v", "status"]).is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
