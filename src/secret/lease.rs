use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::error::VaultDbError;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const DEFAULT_RENEW_FRACTION: f64 = 2.0 / 3.0;

/// A time-bounded secret. Never mutated after creation; a newer lease simply
/// supersedes it.
#[derive(Debug)]
pub struct Lease {
    path: String,
    lease_id: String,
    renewable: bool,
    data: HashMap<String, SecretString>,
    expires_at: DateTime<Utc>,
    renew_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        path: impl Into<String>,
        data: HashMap<String, SecretString>,
        expires_at: DateTime<Utc>,
        renew_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            lease_id: String::new(),
            renewable: false,
            data,
            expires_at,
            renew_at: renew_at.min(expires_at),
        }
    }

    /// Build a lease issued at `issued_at` that lasts `duration`, due for
    /// renewal after `renew_fraction` of it has elapsed. A fraction outside
    /// `(0, 1]` falls back to [`DEFAULT_RENEW_FRACTION`]. A zero duration means
    /// the secret carries no lease and never expires on its own.
    pub fn issued(
        path: impl Into<String>,
        data: HashMap<String, SecretString>,
        issued_at: DateTime<Utc>,
        duration: TimeDelta,
        renew_fraction: f64,
    ) -> Self {
        if duration <= TimeDelta::zero() {
            return Self::new(path, data, DateTime::<Utc>::MAX_UTC, DateTime::<Utc>::MAX_UTC);
        }
        let fraction = if renew_fraction > 0.0 && renew_fraction <= 1.0 {
            renew_fraction
        } else {
            DEFAULT_RENEW_FRACTION
        };
        let renew_after_ms = (duration.num_milliseconds() as f64 * fraction).round() as i64;
        let renew_after = TimeDelta::try_milliseconds(renew_after_ms).unwrap_or(duration);
        let expires_at = issued_at
            .checked_add_signed(duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let renew_at = issued_at
            .checked_add_signed(renew_after)
            .unwrap_or(expires_at);
        Self::new(path, data, expires_at, renew_at)
    }

    pub fn with_lease_id(mut self, lease_id: impl Into<String>, renewable: bool) -> Self {
        self.lease_id = lease_id.into();
        self.renewable = renewable;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn renewable(&self) -> bool {
        self.renewable
    }

    pub fn expiry_deadline(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn renew_deadline(&self) -> DateTime<Utc> {
        self.renew_at
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|v| v.expose_secret())
    }

    /// True once either deadline has passed.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at || now >= self.renew_at
    }

    /// The `(username, password)` pair carried by this lease.
    pub fn credentials(&self) -> Result<(&str, &str), VaultDbError> {
        let field = |field: &'static str| {
            self.get(field).ok_or_else(|| VaultDbError::MissingSecretField {
                path: self.path.clone(),
                field,
            })
        };
        Ok((field(USERNAME_KEY)?, field(PASSWORD_KEY)?))
    }
}
