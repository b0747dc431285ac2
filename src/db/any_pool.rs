use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, Connection};
use std::time::Duration;
use tracing::debug;

use super::Connector;
use crate::error::VaultDbError;

/// Driver names accepted by [`SqlxConnector`] and the DSN schemes each opens.
pub const SUPPORTED_DRIVERS: &[(&str, &[&str])] = &[
    ("postgres", &["postgres", "postgresql"]),
    ("mysql", &["mysql", "mariadb"]),
    ("sqlite", &["sqlite"]),
];

/// Connector backed by sqlx's `Any` driver. Opening is lazy: no connection is
/// established until [`Connector::ping`] or the first query.
#[derive(Debug, Clone)]
pub struct SqlxConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl SqlxConnector {
    pub fn new(max_connections: u32) -> Self {
        install_default_drivers();
        Self {
            max_connections: max_connections.max(1),
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Check that `driver` is known and can open `dsn`.
pub fn check_driver(driver: &str, dsn: &str) -> Result<(), VaultDbError> {
    let (_, schemes) = SUPPORTED_DRIVERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(driver))
        .ok_or_else(|| VaultDbError::UnknownDriver(driver.to_string()))?;

    let scheme = dsn.split_once(':').map(|(s, _)| s).unwrap_or_default();
    if schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
        Ok(())
    } else {
        Err(VaultDbError::DriverMismatch {
            driver: driver.to_string(),
            scheme: scheme.to_string(),
        })
    }
}

impl Connector for SqlxConnector {
    type Handle = AnyPool;

    async fn open(&self, driver: &str, dsn: &str) -> Result<AnyPool, VaultDbError> {
        check_driver(driver, dsn)?;
        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy(dsn)?;
        debug!(driver, max_connections = self.max_connections, "database pool opened");
        Ok(pool)
    }

    async fn ping(&self, handle: &AnyPool) -> Result<(), VaultDbError> {
        let mut conn = handle.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self, handle: AnyPool) -> Result<(), VaultDbError> {
        handle.close().await;
        Ok(())
    }
}
