//! PaperRoute DB - SQLite persistence for the index retry queue and job history.

mod database;
mod error;
mod migrations;
mod operations;

pub use database::Database;
pub use error::{DbError, DbResult};
pub use operations::index_tasks::IndexTaskCounts;
