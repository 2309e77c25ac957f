//! PaperRoute Core - Domain types shared by the ingestion pipeline.

mod date;
mod error;
pub mod slug;
mod types;

pub use date::parse_document_date;
pub use error::{Error, Result};
pub use types::*;
