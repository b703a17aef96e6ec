//! HTTP command gateway client.
//!
//! Set commands are `PUT {base}/api/v3/device/name/{device}/{command}` with
//! the parameters as a flat JSON object. Queries are a `GET` on the same
//! path that asks the gateway to return the event without publishing it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use glucoguard_core::{CommandDispatcher, CommandResponse, CommandSpec};

use crate::error::{GatewayError, Result};

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the command service
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:59882".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Issues commands against the remote command gateway.
#[derive(Debug, Clone)]
pub struct HttpCommandGateway {
    base: Url,
    client: Client,
}

impl HttpCommandGateway {
    /// Create a gateway client. Fails if the base URL cannot carry a path.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self { base, client })
    }

    /// Build the URL for a device command.
    pub fn build_url(&self, device: &str, command_name: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "v3", "device", "name", device, command_name]);
        Ok(url)
    }

    /// `PUT` a set command.
    pub async fn put_command(&self, device: &str, command: &CommandSpec) -> Result<CommandResponse> {
        let url = self.build_url(device, &command.command_name)?;
        debug!(%url, params = ?command.parameters, "Issuing set command");

        let response = self
            .client
            .put(url)
            .json(&command.parameters)
            .send()
            .await?;
        read_response(response).await
    }

    /// `GET` a command's current reading.
    pub async fn get_command(&self, device: &str, command_name: &str) -> Result<CommandResponse> {
        let mut url = self.build_url(device, command_name)?;
        url.query_pairs_mut()
            .append_pair("ds-pushevent", "false")
            .append_pair("ds-returnevent", "true");
        debug!(%url, "Issuing get command");

        let response = self.client.get(url).send().await?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<CommandResponse> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        warn!(status = status.as_u16(), body = %text, "Gateway rejected command");
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            body: text,
        });
    }

    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    };
    Ok(CommandResponse::with_body(status.as_u16(), body))
}

#[async_trait]
impl CommandDispatcher for HttpCommandGateway {
    async fn issue(&self, device: &str, command: &CommandSpec) -> glucoguard_core::Result<CommandResponse> {
        self.put_command(device, command)
            .await
            .map_err(|e| e.into_core(device, &command.command_name))
    }

    async fn query(&self, device: &str, command_name: &str) -> glucoguard_core::Result<CommandResponse> {
        self.get_command(device, command_name)
            .await
            .map_err(|e| e.into_core(device, command_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base_url: &str) -> HttpCommandGateway {
        HttpCommandGateway::new(&GatewayConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_building() {
        let url = gateway("http://edgex-core-command:59882")
            .build_url("insulin-injector", "WriteBoolValue")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://edgex-core-command:59882/api/v3/device/name/insulin-injector/WriteBoolValue"
        );
    }

    #[test]
    fn test_url_building_with_prefix_and_spaces() {
        let url = gateway("http://gateway/core/")
            .build_url("pump 1", "Start")
            .unwrap();
        assert_eq!(url.as_str(), "http://gateway/core/api/v3/device/name/pump%201/Start");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpCommandGateway::new(&GatewayConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUrl(_)));

        assert!(HttpCommandGateway::new(&GatewayConfig {
            base_url: "mailto:ops@example.com".to_string(),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_error_classification() {
        let err = GatewayError::Rejected {
            status: 404,
            body: "device not found".to_string(),
        }
        .into_core("insulin-injector", "WriteBoolValue");
        assert!(err.to_string().contains("404"));
        assert!(!err.is_timeout());

        assert!(GatewayError::Timeout.into_core("a", "b").is_timeout());
    }
}
