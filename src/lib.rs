//! devbook - a personal library server for books and files.
//!
//! Uploaded documents are written to disk, their metadata to an embedded
//! [redb](https://github.com/cberner/redb) document store, and a searchable
//! copy to a [Tantivy](https://github.com/quickwit-oss/tantivy) index per
//! entity kind. Tags attached to records are reference counted so the
//! in-use set can be offered for autocomplete.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use devbook::{DataDir, EntityKind, EntityRepository, Stores, UploadedFile};
//! use devbook::query::{QueryClause, SearchRequest};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let stores = Arc::new(Stores::open(&data_dir).unwrap());
//! let books = EntityRepository::new(
//!     EntityKind::Book,
//!     stores,
//!     data_dir.storage_dir(EntityKind::Book).unwrap(),
//! );
//!
//! let report = books.save_uploaded(vec![UploadedFile::new(
//!     "Rust in Action.pdf",
//!     std::fs::read("Rust in Action.pdf").unwrap(),
//! )]);
//! assert!(report.is_success());
//!
//! let page = books
//!     .search(&SearchRequest::new(QueryClause::Match {
//!         field: "title".into(),
//!         text: "rust".into(),
//!     }))
//!     .unwrap();
//! for book in &page.list {
//!     println!("{} {}", book.id, book.title);
//! }
//! ```

pub mod api;
pub mod cli;
pub mod data_dir;
pub mod deadline;
pub mod doc_store;
pub mod entity;
pub mod error;
pub mod query;
pub mod repository;
pub mod search_index;
pub mod server;
pub mod stores;
pub mod tag_ledger;

pub use data_dir::DataDir;
pub use doc_store::DocStore;
pub use entity::{EntityKind, EntityRecord, UpdateRequest, UploadedFile};
pub use error::{Error, Result};
pub use repository::EntityRepository;
pub use search_index::SearchIndex;
pub use stores::Stores;
pub use tag_ledger::TagLedger;
