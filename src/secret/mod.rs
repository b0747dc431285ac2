//! Secret store access: time-bounded credential leases and the reader seam.
//!
//! Layout:
//! - `lease.rs`: the `Lease` value handed out by a reader
//! - `vault.rs`: `VaultReader`, a reader over the Vault HTTP API

pub mod lease;
pub mod vault;

pub use lease::Lease;
pub use vault::VaultReader;

use crate::error::VaultDbError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Supplies credential leases for a secret path.
///
/// `lifetime` is the owning client's lifetime signal; implementations should
/// abandon the request with [`VaultDbError::Closed`] once it fires.
pub trait SecretReader: Send + Sync + 'static {
    fn read(
        &self,
        lifetime: &CancellationToken,
        path: &str,
    ) -> impl Future<Output = Result<Lease, VaultDbError>> + Send;
}
