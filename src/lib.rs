pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
mod metrics;
mod server;
pub mod service;
pub mod utils;
pub mod vector;

pub use catalog::{
    BatchSummary, Catalog, CatalogBuilder, IngestOutcome, ReconcileReport, SemanticSearch,
};
pub use config::{ConfDir, Opts};
pub use error::{CatalogError, Result};
