use chrono::{TimeDelta, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{Lease, SecretReader};
use crate::config::VaultConfig;
use crate::error::VaultDbError;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Reads leases from a Vault-compatible HTTP API (`GET /v1/{path}`).
///
/// Dynamic database secrets carry the credentials directly under `data`;
/// KV v2 secrets nest them one level deeper under `data.data`.
pub struct VaultReader {
    http: reqwest::Client,
    addr: Url,
    token: SecretString,
    renew_fraction: f64,
}

#[derive(Debug, Deserialize)]
struct VaultSecretResponse {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: i64,
    #[serde(default)]
    renewable: bool,
    #[serde(default)]
    data: Map<String, Value>,
}

impl VaultReader {
    pub fn new(cfg: &VaultConfig) -> Result<Self, VaultDbError> {
        cfg.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("vaultdb/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(cfg.request_timeout())
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self {
            http,
            addr: cfg.addr.clone(),
            token: SecretString::from(cfg.token.clone()),
            renew_fraction: cfg.renew_fraction,
        })
    }

    async fn fetch(&self, path: &str) -> Result<Lease, VaultDbError> {
        let url = self
            .addr
            .join(&format!("v1/{}", path.trim_start_matches('/')))?;
        let resp = self
            .http
            .get(url)
            .header(VAULT_TOKEN_HEADER, self.token.expose_secret())
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(VaultDbError::SecretNotFound(path.to_string())),
            StatusCode::FORBIDDEN => return Err(VaultDbError::LeaseDenied(path.to_string())),
            status if !status.is_success() => {
                return Err(VaultDbError::SecretStoreStatus {
                    path: path.to_string(),
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body: VaultSecretResponse = serde_json::from_slice(&resp.bytes().await?)?;
        debug!(
            path,
            lease_id = %body.lease_id,
            lease_duration = body.lease_duration,
            renewable = body.renewable,
            "secret lease received"
        );

        // Durations beyond chrono's range are treated as unbounded.
        let duration = TimeDelta::try_seconds(body.lease_duration).unwrap_or(TimeDelta::MAX);
        Ok(Lease::issued(
            path,
            flatten_secret_data(body.data),
            Utc::now(),
            duration,
            self.renew_fraction,
        )
        .with_lease_id(body.lease_id, body.renewable))
    }
}

impl SecretReader for VaultReader {
    async fn read(&self, lifetime: &CancellationToken, path: &str) -> Result<Lease, VaultDbError> {
        tokio::select! {
            biased;
            () = lifetime.cancelled() => Err(VaultDbError::Closed),
            res = self.fetch(path) => res,
        }
    }
}

fn flatten_secret_data(mut data: Map<String, Value>) -> HashMap<String, SecretString> {
    if let Some(Value::Object(inner)) = data.remove("data") {
        data = inner;
    }
    data.into_iter()
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k, SecretString::from(value)))
        })
        .collect()
}
