//! stride-core - Core library for Stride
//!
//! Offline outbox for walk session mutations: a durable local queue, a
//! local-to-server ID mapping, and a sequential sync engine that drains
//! queued operations against the remote backend whenever connectivity and
//! lifecycle triggers allow.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{OperationId, QueuedOperation};
