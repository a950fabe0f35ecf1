//! HTTP implementation of the remote applier port.
//!
//! Each entity type maps to a REST collection: `POST {endpoint}` creates,
//! `PUT`/`DELETE`/`GET {endpoint}/{remote_id}` address a single entity.

use std::time::Duration;

use async_trait::async_trait;
use offsync_common::{ErrorClassification, ErrorSeverity};
use offsync_core::RemoteApplier;
use offsync_domain::{EntityType, RemoteConfig, RemoteResult};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::errors::SyncError;
use crate::http::HttpClient;

const USER_AGENT: &str = concat!("offsync/", env!("CARGO_PKG_VERSION"));

/// [`RemoteApplier`] over a JSON REST API.
#[derive(Clone)]
pub struct HttpRemoteApplier {
    client: HttpClient,
    base_url: Url,
    config: RemoteConfig,
}

impl HttpRemoteApplier {
    /// Build an applier from the `remote` configuration section.
    pub fn new(config: RemoteConfig) -> Result<Self, SyncError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|err| {
            SyncError::Config(format!("invalid remote base URL '{}': {err}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "remote base URL '{}' cannot carry a path",
                config.base_url
            )));
        }

        let client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .bearer_token(config.api_token.clone())
            .build()?;

        Ok(Self { client, base_url, config })
    }

    /// Collection URL for an entity type, optionally addressing one entity.
    fn url_for(&self, entity_type: &EntityType, remote_id: Option<&str>) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        let endpoint = self.config.endpoint_for(entity_type.as_str());
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                SyncError::Config(format!(
                    "remote base URL '{}' cannot carry a path",
                    self.base_url
                ))
            })?;
            segments.pop_if_empty();
            segments.extend(endpoint.split('/').filter(|s| !s.is_empty()));
            if let Some(remote_id) = remote_id {
                segments.push(remote_id);
            }
        }
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, SyncError> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.client.send(request).await
    }
}

#[async_trait]
impl RemoteApplier for HttpRemoteApplier {
    #[instrument(skip(self, payload), fields(entity_type = %entity_type))]
    async fn create(&self, entity_type: &EntityType, payload: &Value) -> RemoteResult<String> {
        let url = self.url_for(entity_type, None)?;
        let response = self.call(Method::POST, url, Some(payload)).await?;
        let body = success_body(response).await?;

        let remote_id = created_id(&body, entity_type.as_str())
            .or_else(|| created_id(payload, entity_type.as_str()))
            .ok_or_else(|| {
                SyncError::Client(format!("create response for {entity_type} carried no id"))
            })?;
        debug!(remote_id = %remote_id, "remote create succeeded");
        Ok(remote_id)
    }

    #[instrument(skip(self, payload), fields(entity_type = %entity_type))]
    async fn update(
        &self,
        entity_type: &EntityType,
        remote_id: &str,
        payload: &Value,
    ) -> RemoteResult<()> {
        let url = self.url_for(entity_type, Some(remote_id))?;
        let response = self.call(Method::PUT, url, Some(payload)).await?;
        success_body(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(entity_type = %entity_type))]
    async fn delete(&self, entity_type: &EntityType, remote_id: &str) -> RemoteResult<()> {
        let url = self.url_for(entity_type, Some(remote_id))?;
        let response = self.call(Method::DELETE, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(remote_id, "remote entity already gone");
            return Ok(());
        }
        success_body(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(entity_type = %entity_type))]
    async fn exists(&self, entity_type: &EntityType, remote_id: &str) -> RemoteResult<bool> {
        let url = self.url_for(entity_type, Some(remote_id))?;
        let response = self.call(Method::GET, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        success_body(response).await?;
        Ok(true)
    }
}

/// Body of a 2xx response as JSON (`Null` when empty), or the classified error.
async fn success_body(response: Response) -> Result<Value, SyncError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let err = SyncError::from_status(status, &text);
        match err.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                warn!(
                    status = status.as_u16(),
                    severity = %err.severity(),
                    error = %err,
                    "remote rejected request"
                );
            }
            ErrorSeverity::Warning | ErrorSeverity::Info => {
                debug!(status = status.as_u16(), error = %err, "remote request failed");
            }
        }
        return Err(err);
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Identifier in a create response: `id`, `remoteId`, `data.id` or `{entity}.id`.
fn created_id(body: &Value, entity_type: &str) -> Option<String> {
    let candidates = [
        body.get("id"),
        body.get("remoteId"),
        body.pointer("/data/id"),
        body.get(entity_type).and_then(|entity| entity.get("id")),
    ];
    candidates.into_iter().flatten().find_map(|value| match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
