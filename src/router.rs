use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{CallerScope, Client, ClientStatus};
use crate::db::Connector;
use crate::error::VaultDbError;
use crate::secret::SecretReader;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the probe routes.
pub struct ProbeState<R: SecretReader, C: Connector> {
    pub client: Arc<Client<R, C>>,
}

impl<R: SecretReader, C: Connector> Clone for ProbeState<R, C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<R: SecretReader, C: Connector> ProbeState<R, C> {
    pub fn new(client: Arc<Client<R, C>>) -> Self {
        Self { client }
    }
}

pub fn probe_router<R: SecretReader, C: Connector>(state: ProbeState<R, C>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler::<R, C>))
        .route("/status", get(status_handler::<R, C>))
        .with_state(state)
}

async fn healthz_handler<R: SecretReader, C: Connector>(
    State(state): State<ProbeState<R, C>>,
) -> Result<Json<Value>, VaultDbError> {
    let generation = state
        .client
        .ping(&CallerScope::with_timeout(HEALTH_TIMEOUT))
        .await?;
    Ok(Json(json!({ "status": "ok", "generation": generation })))
}

async fn status_handler<R: SecretReader, C: Connector>(
    State(state): State<ProbeState<R, C>>,
) -> Json<ClientStatus> {
    Json(state.client.status())
}
