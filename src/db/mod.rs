//! Database module: the connector seam and its sqlx implementation.
//!
//! Layout:
//! - `any_pool.rs`: `SqlxConnector`, opening runtime-selected `sqlx::AnyPool`s
//! - `migrate.rs`: applying a migrations directory through an open pool

pub mod any_pool;
pub mod migrate;

pub use any_pool::{SUPPORTED_DRIVERS, SqlxConnector};
pub use migrate::run_migrations;

use crate::error::VaultDbError;
use std::future::Future;

/// Opens, health-checks and closes database handles.
pub trait Connector: Send + Sync + 'static {
    /// A shareable handle, typically a pool.
    type Handle: Clone + Send + Sync + 'static;

    fn open(
        &self,
        driver: &str,
        dsn: &str,
    ) -> impl Future<Output = Result<Self::Handle, VaultDbError>> + Send;

    fn ping(&self, handle: &Self::Handle) -> impl Future<Output = Result<(), VaultDbError>> + Send;

    fn close(&self, handle: Self::Handle) -> impl Future<Output = Result<(), VaultDbError>> + Send;
}
