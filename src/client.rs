//! The credential-rotating database client.
//!
//! [`Client`] hands callers a live database handle and replaces it whenever
//! the credential lease behind it is due for renewal. Superseded handles stay
//! usable for a grace period so in-flight work can finish, then get closed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_GRACE_PERIOD};
use crate::db::Connector;
use crate::error::VaultDbError;
use crate::secret::{Lease, SecretReader};

/// Connection string with `{username}` and `{password}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsnTemplate(String);

impl DsnTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, username: &str, password: &str) -> String {
        self.0
            .replace("{username}", username)
            .replace("{password}", password)
    }
}

/// Construction-time settings for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Secret store path holding the database credentials.
    pub secret_path: String,
    pub dsn_template: DsnTemplate,
    /// Driver name passed to the connector, e.g. `postgres`.
    pub driver: String,
    /// When set, a lease is never reused for longer than this.
    pub refresh_interval: Option<Duration>,
    /// How long a superseded handle stays open before it is closed.
    pub grace_period: Duration,
}

impl ClientOptions {
    pub fn new(
        secret_path: impl Into<String>,
        dsn_template: impl Into<String>,
        driver: impl Into<String>,
    ) -> Self {
        Self {
            secret_path: secret_path.into(),
            dsn_template: DsnTemplate::new(dsn_template),
            driver: driver.into(),
            refresh_interval: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Options taken from the `database` section of the environment config.
    pub fn from_env() -> Result<Self, VaultDbError> {
        Ok(ClientOptions::from(&Config::load()?.database))
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// The caller's side of an acquire: an optional deadline and an optional
/// cancellation signal. Only checked before entering the refresh path.
#[derive(Debug, Clone, Default)]
pub struct CallerScope {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallerScope {
    /// A scope that never fires.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel: Some(cancel),
        }
    }

    pub fn cancel_on(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// `Err` once the caller has given up. Cancellation wins over the deadline.
    pub fn check(&self) -> Result<(), VaultDbError> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(VaultDbError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(VaultDbError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Point-in-time view of a client. Readable while a refresh is in flight.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ClientStatus {
    pub closed: bool,
    /// True while a secret read and reconnect is running.
    pub refreshing: bool,
    pub generation: Option<u64>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub lease_renew_at: Option<DateTime<Utc>>,
}

struct Current<H> {
    handle: H,
    lease: Lease,
    generation: u64,
    fetched_at: Instant,
}

struct Slot<H> {
    current: Option<Current<H>>,
    generations: u64,
}

/// Marks the status as refreshing until dropped, including when the
/// acquiring future is dropped mid-fetch.
struct RefreshMark<'a>(&'a watch::Sender<ClientStatus>);

impl<'a> RefreshMark<'a> {
    fn set(snapshot: &'a watch::Sender<ClientStatus>) -> Self {
        snapshot.send_modify(|s| s.refreshing = true);
        Self(snapshot)
    }
}

impl Drop for RefreshMark<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.refreshing = false);
    }
}

pub struct Client<R: SecretReader, C: Connector> {
    reader: R,
    connector: Arc<C>,
    options: ClientOptions,
    lifetime: CancellationToken,
    slot: Mutex<Slot<C::Handle>>,
    snapshot: watch::Sender<ClientStatus>,
    /// Deferred closes of superseded handles.
    drains: TaskTracker,
    /// Cuts every pending grace period short.
    expedite: CancellationToken,
}

impl<R: SecretReader, C: Connector> Client<R, C> {
    pub fn new(reader: R, connector: C, options: ClientOptions) -> Self {
        Self {
            reader,
            connector: Arc::new(connector),
            options,
            lifetime: CancellationToken::new(),
            slot: Mutex::new(Slot {
                current: None,
                generations: 0,
            }),
            snapshot: watch::Sender::new(ClientStatus::default()),
            drains: TaskTracker::new(),
            expedite: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Return the current handle, or open a new one if there is none or its
    /// lease is due for renewal.
    pub async fn acquire(&self, scope: &CallerScope) -> Result<C::Handle, VaultDbError> {
        self.acquire_current(scope).await.map(|(handle, _)| handle)
    }

    /// Acquire a handle and verify it answers. Returns the generation of the
    /// handle that was pinged.
    pub async fn ping(&self, scope: &CallerScope) -> Result<u64, VaultDbError> {
        let (handle, generation) = self.acquire_current(scope).await?;
        self.connector.ping(&handle).await?;
        Ok(generation)
    }

    /// Never waits on an in-flight refresh.
    pub fn status(&self) -> ClientStatus {
        let mut status = self.snapshot.borrow().clone();
        status.closed = self.is_closed();
        status
    }

    /// End the client's lifetime. Later acquires fail with
    /// [`VaultDbError::Closed`]; the current handle drains like a superseded one.
    pub async fn close(&self) {
        self.lifetime.cancel();
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.current.take() {
            info!(generation = old.generation, "client closed; draining current connection");
            self.schedule_close(old.handle, old.generation);
        }
        self.publish(None);
    }

    /// Close the client, then close every handle still in its grace period
    /// without waiting the period out. Returns once all of them are closed.
    pub async fn shutdown(&self) {
        self.close().await;
        self.expedite.cancel();
        self.drains.close();
        self.drains.wait().await;
        debug!("all superseded connections closed");
    }

    async fn acquire_current(
        &self,
        scope: &CallerScope,
    ) -> Result<(C::Handle, u64), VaultDbError> {
        if self.lifetime.is_cancelled() {
            return Err(VaultDbError::Closed);
        }
        scope.check()?;

        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.current.as_ref()
            && !self.needs_refresh(current)
        {
            return Ok((current.handle.clone(), current.generation));
        }

        let _mark = RefreshMark::set(&self.snapshot);
        let generation = slot.generations + 1;
        let fresh = self.fetch(generation).await?;
        slot.generations = generation;

        if self.lifetime.is_cancelled() {
            self.schedule_close(fresh.handle, fresh.generation);
            return Err(VaultDbError::Closed);
        }

        let handle = fresh.handle.clone();
        info!(
            generation,
            path = %self.options.secret_path,
            lease_id = %fresh.lease.lease_id(),
            renew_at = %fresh.lease.renew_deadline(),
            "database connection opened with fresh credentials"
        );
        if let Some(old) = slot.current.replace(fresh) {
            self.schedule_close(old.handle, old.generation);
        }
        self.publish(slot.current.as_ref());
        Ok((handle, generation))
    }

    fn publish(&self, current: Option<&Current<C::Handle>>) {
        self.snapshot.send_modify(|s| {
            s.generation = current.map(|c| c.generation);
            s.lease_expires_at = current.map(|c| c.lease.expiry_deadline());
            s.lease_renew_at = current.map(|c| c.lease.renew_deadline());
        });
    }

    fn needs_refresh(&self, current: &Current<C::Handle>) -> bool {
        current.lease.needs_refresh(Utc::now())
            || self
                .options
                .refresh_interval
                .is_some_and(|max_age| current.fetched_at.elapsed() >= max_age)
    }

    async fn fetch(&self, generation: u64) -> Result<Current<C::Handle>, VaultDbError> {
        let lease = self
            .reader
            .read(&self.lifetime, &self.options.secret_path)
            .await?;
        let (username, password) = lease.credentials()?;
        let dsn = self.options.dsn_template.render(username, password);

        let handle = self.connector.open(&self.options.driver, &dsn).await?;
        if let Err(e) = self.connector.ping(&handle).await {
            if let Err(close_err) = self.connector.close(handle).await {
                debug!(generation, error = %close_err, "closing unhealthy connection failed");
            }
            return Err(e);
        }

        Ok(Current {
            handle,
            lease,
            generation,
            fetched_at: Instant::now(),
        })
    }

    fn schedule_close(&self, handle: C::Handle, generation: u64) {
        let connector = Arc::clone(&self.connector);
        let expedite = self.expedite.clone();
        let grace = self.options.grace_period;
        debug!(
            generation,
            grace_secs = grace.as_secs(),
            "superseded connection scheduled for close"
        );
        self.drains.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(grace) => {}
                () = expedite.cancelled() => {}
            }
            match connector.close(handle).await {
                Ok(()) => debug!(generation, "superseded connection closed"),
                Err(e) => warn!(generation, error = %e, "closing superseded connection failed"),
            }
        });
    }
}
