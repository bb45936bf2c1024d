//! Local durable storage for Stride

mod connection;
mod mapping_repository;
mod migrations;
mod outbox_repository;

pub use connection::Database;
pub use mapping_repository::{IdMapRepository, LibSqlIdMapRepository};
pub use outbox_repository::{LibSqlOutboxRepository, OutboxRepository};
