#![allow(dead_code)]

use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vaultdb::db::Connector;
use vaultdb::secret::{Lease, SecretReader};
use vaultdb::{Client, ClientOptions, VaultDbError};

pub const SECRET_PATH: &str = "database/creds/app";
pub const DSN_TEMPLATE: &str = "postgres://{username}:{password}@db/app";

/// Lease issued now, lasting `ttl`, renewable after two thirds of it.
pub fn lease(n: usize, ttl: TimeDelta) -> Lease {
    let data = HashMap::from([
        ("username".to_string(), SecretString::from(format!("user-{n}"))),
        ("password".to_string(), SecretString::from(format!("pw-{n}"))),
    ]);
    Lease::issued(SECRET_PATH, data, Utc::now(), ttl, 2.0 / 3.0)
}

/// Lease whose renew deadline already passed but which has not expired.
pub fn renew_due_lease(n: usize) -> Lease {
    let now = Utc::now();
    let data = HashMap::from([
        ("username".to_string(), SecretString::from(format!("user-{n}"))),
        ("password".to_string(), SecretString::from(format!("pw-{n}"))),
    ]);
    Lease::new(
        SECRET_PATH,
        data,
        now + TimeDelta::hours(1),
        now - TimeDelta::seconds(1),
    )
}

/// Lease that is already past its expiry deadline.
pub fn expired_lease(n: usize) -> Lease {
    let now = Utc::now();
    let data = HashMap::from([
        ("username".to_string(), SecretString::from(format!("user-{n}"))),
        ("password".to_string(), SecretString::from(format!("pw-{n}"))),
    ]);
    Lease::new(
        SECRET_PATH,
        data,
        now - TimeDelta::seconds(1),
        now - TimeDelta::seconds(1),
    )
}

#[derive(Default)]
pub struct ReaderState {
    pub reads: AtomicUsize,
    pub paths: Mutex<Vec<String>>,
    script: Mutex<VecDeque<Result<Lease, VaultDbError>>>,
    delay: Mutex<Duration>,
}

impl ReaderState {
    pub fn push(&self, result: Result<Lease, VaultDbError>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Make every later read take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Always gives up the task at least once, like real I/O would.
async fn suspend(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// Reader that replays scripted results, then hands out hour-long leases.
#[derive(Clone, Default)]
pub struct MockReader {
    pub state: Arc<ReaderState>,
}

impl SecretReader for MockReader {
    async fn read(&self, lifetime: &CancellationToken, path: &str) -> Result<Lease, VaultDbError> {
        if lifetime.is_cancelled() {
            return Err(VaultDbError::Closed);
        }
        let n = self.state.reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.paths.lock().unwrap().push(path.to_string());
        let delay = *self.state.delay.lock().unwrap();
        suspend(delay).await;
        let scripted = self.state.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(lease(n, TimeDelta::hours(1))))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConn {
    pub id: usize,
    pub dsn: String,
}

#[derive(Default)]
pub struct ConnectorState {
    pub opens: AtomicUsize,
    pub pings: AtomicUsize,
    pub closed: Mutex<Vec<usize>>,
    pub dsns: Mutex<Vec<String>>,
    open_failures: Mutex<VecDeque<VaultDbError>>,
    ping_failures: Mutex<VecDeque<VaultDbError>>,
    ping_delay: Mutex<Duration>,
}

impl ConnectorState {
    pub fn fail_next_open(&self, e: VaultDbError) {
        self.open_failures.lock().unwrap().push_back(e);
    }

    pub fn fail_next_ping(&self, e: VaultDbError) {
        self.ping_failures.lock().unwrap().push_back(e);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<usize> {
        self.closed.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    pub state: Arc<ConnectorState>,
}

impl Connector for MockConnector {
    type Handle = MockConn;

    async fn open(&self, _driver: &str, dsn: &str) -> Result<MockConn, VaultDbError> {
        if let Some(e) = self.state.open_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        let id = self.state.opens.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        self.state.dsns.lock().unwrap().push(dsn.to_string());
        Ok(MockConn {
            id,
            dsn: dsn.to_string(),
        })
    }

    async fn ping(&self, _handle: &MockConn) -> Result<(), VaultDbError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.ping_delay.lock().unwrap();
        suspend(delay).await;
        match self.state.ping_failures.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn close(&self, handle: MockConn) -> Result<(), VaultDbError> {
        self.state.closed.lock().unwrap().push(handle.id);
        Ok(())
    }
}

pub type MockClient = Client<MockReader, MockConnector>;

pub fn options() -> ClientOptions {
    ClientOptions::new(SECRET_PATH, DSN_TEMPLATE, "postgres")
}

pub fn mock_client(options: ClientOptions) -> (MockClient, Arc<ReaderState>, Arc<ConnectorState>) {
    let reader = MockReader::default();
    let connector = MockConnector::default();
    let reader_state = reader.state.clone();
    let connector_state = connector.state.clone();
    (
        Client::new(reader, connector, options),
        reader_state,
        connector_state,
    )
}
