/// Outbound collaborators: service client and notification sender
///
/// Both report failures as [`CallError`], already classified: 408, 429, 5xx and connection
/// problems are `Transient`, a missed deadline is `Timeout`, and every other failure is
/// `Permanent`. Every call carries the deadline of the action that issued it.

use crate::error::CallError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

/// Calls a named remote service (Apollo, DomainExtractor, LeadScorer, ...)
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn call(
        &self,
        service_name: &str,
        endpoint: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<ServiceResponse, CallError>;
}

/// Delivers templated notifications
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, template_id: &str, params: &Value, timeout: Duration) -> Result<Value, CallError>;
}

/// Map an HTTP status onto the retry taxonomy
pub fn classify_status(status: u16, body: &Value) -> Result<(), CallError> {
    match status {
        200..=299 => Ok(()),
        408 | 429 | 500..=599 => Err(CallError::Transient(format!("status {}: {}", status, body))),
        _ => Err(CallError::Permanent(format!("status {}: {}", status, body))),
    }
}

/// reqwest-backed service client with a service-name to base-URL map
///
/// Request deadlines are set per call; the client itself only bounds connection setup.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: reqwest::Client,
    /// Key: service name, Value: base URL (e.g. "https://api.apollo.io")
    services: HashMap<String, String>,
}

impl HttpServiceClient {
    pub fn new(services: HashMap<String, String>, connect_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, services })
    }

    fn url(&self, service_name: &str, endpoint: &str) -> Result<String, CallError> {
        let base = self.services.get(service_name).ok_or_else(|| {
            CallError::Permanent(format!("no base URL configured for service '{}'", service_name))
        })?;
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }
}

/// Top-level scalar parameters as query pairs
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    params
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| match value {
                    Value::String(text) => Some((key.clone(), text.clone())),
                    Value::Number(_) | Value::Bool(_) => Some((key.clone(), value.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn transport_error(error: reqwest::Error, timeout: Duration) -> CallError {
    if error.is_timeout() {
        CallError::Timeout(timeout)
    } else if error.is_connect() || error.is_request() {
        CallError::Transient(error.to_string())
    } else {
        CallError::Permanent(error.to_string())
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn call(
        &self,
        service_name: &str,
        endpoint: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<ServiceResponse, CallError> {
        let url = self.url(service_name, endpoint)?;
        tracing::debug!("🌍 Service call: {} {} ({})", method, url, service_name);

        let request_builder = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url).query(&query_pairs(params)),
            "DELETE" => self.client.delete(&url).query(&query_pairs(params)),
            "POST" => self.client.post(&url).json(params),
            "PUT" => self.client.put(&url).json(params),
            "PATCH" => self.client.patch(&url).json(params),
            other => {
                return Err(CallError::Permanent(format!("unsupported HTTP method: {}", other)));
            }
        };

        let response = request_builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| transport_error(e, timeout))?;

        // Parse response body as JSON if possible, otherwise keep the text
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        classify_status(status, &body)?;

        tracing::debug!("📡 {} {} -> {}", method, url, status);
        Ok(ServiceResponse { status, body })
    }
}

/// Sends notifications through the notification service
pub struct ServiceNotificationSender {
    client: Arc<dyn ServiceClient>,
    service_name: String,
}

impl ServiceNotificationSender {
    pub fn new(client: Arc<dyn ServiceClient>, service_name: impl Into<String>) -> Self {
        Self {
            client,
            service_name: service_name.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for ServiceNotificationSender {
    async fn send(&self, template_id: &str, params: &Value, timeout: Duration) -> Result<Value, CallError> {
        let payload = json!({ "templateId": template_id, "params": params });
        let response = self
            .client
            .call(&self.service_name, "/send", "POST", &payload, timeout)
            .await?;
        Ok(response.body)
    }
}

/// Logs notifications instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, template_id: &str, params: &Value, _timeout: Duration) -> Result<Value, CallError> {
        tracing::info!("📣 Notification '{}': {}", template_id, params);
        Ok(json!({ "delivered": false, "templateId": template_id }))
    }
}
