//! Database CRUD operations.

pub mod index_tasks;
pub mod jobs;
