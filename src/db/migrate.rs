use backon::{ExponentialBuilder, Retryable};
use sqlx::AnyPool;
use sqlx::migrate::Migrator;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::VaultDbError;

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Apply every pending migration found in `dir`.
///
/// Transient connectivity failures are retried; anything else (bad SQL,
/// checksum mismatch on an applied migration) is returned at once.
pub async fn run_migrations(pool: &AnyPool, dir: &Path) -> Result<(), VaultDbError> {
    let migrator = Migrator::new(dir).await?;
    info!(
        path = %dir.display(),
        count = migrator.iter().count(),
        "applying database migrations"
    );

    (|| async { migrator.run(pool).await.map_err(VaultDbError::from) })
        .retry(default_retry_policy())
        .when(|e: &VaultDbError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("migrations retrying after error {}, sleeping {:?}", err, dur);
        })
        .await?;

    info!(path = %dir.display(), "database migrations applied");
    Ok(())
}
