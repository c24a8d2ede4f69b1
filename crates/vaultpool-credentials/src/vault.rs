//! HashiCorp Vault KV reader.
//!
//! Issues `GET /v1/<path>` with the `X-Vault-Token` header over HTTP/1.1
//! and maps the answer onto [`SecretStore`] semantics:
//!
//! | Vault answer              | Result                          |
//! |---------------------------|---------------------------------|
//! | 200 with `data` object    | `Ok(Some(data))`                |
//! | 404                       | `Ok(None)`                      |
//! | connect/timeout/other     | `Err(Unreachable)`              |
//! | undecodable body          | `Err(Malformed)`                |
//!
//! Only plain `http` is spoken; TLS is expected to be terminated by a local
//! Vault agent or sidecar.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tracing::debug;

use vaultpool_core::ConfigError;
use vaultpool_core::config::SecretStoreSection;

use crate::error::SecretStoreError;
use crate::store::{BoxFuture, SecretData, SecretStore};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal Vault client reading KV secrets.
#[derive(Clone)]
pub struct VaultClient {
    host: String,
    port: u16,
    token: String,
    timeout: Duration,
}

impl VaultClient {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a client from the `[secret_store]` section.
    pub fn from_section(section: &SecretStoreSection) -> Result<Self, ConfigError> {
        let scheme = section.scheme.as_deref().unwrap_or("http");
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(ConfigError::invalid(
                "secret_store.scheme",
                format!("unsupported scheme `{scheme}` (only `http` is supported)"),
            ));
        }
        let host = section.host.as_deref().unwrap_or(DEFAULT_HOST);
        if host.trim().is_empty() {
            return Err(ConfigError::invalid("secret_store.host", "must not be empty"));
        }
        let token = section.token.clone().unwrap_or_default();
        if token.is_empty() {
            return Err(ConfigError::invalid(
                "secret_store.token",
                "required when the secret store is enabled",
            ));
        }
        Ok(Self::new(host, section.port.unwrap_or(DEFAULT_PORT), token))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn get(&self, path: &str) -> Result<Option<SecretData>, SecretStoreError> {
        let address = self.address();
        let request_path = format!("/v1/{}", path.trim_start_matches('/'));

        let result = tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| SecretStoreError::Unreachable(format!("connect {address}: {e}")))?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| SecretStoreError::Unreachable(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "vault connection closed with error");
                }
            });

            let req = http::Request::builder()
                .method("GET")
                .uri(&request_path)
                .header("host", &address)
                .header("x-vault-token", &self.token)
                .header("user-agent", "vaultpool/0.1")
                .body(Empty::<Bytes>::new())
                .map_err(|e| SecretStoreError::Unreachable(format!("build request: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| SecretStoreError::Unreachable(format!("request failed: {e}")))?;

            let status = resp.status();
            if status == http::StatusCode::NOT_FOUND {
                debug!(%path, "vault returned 404");
                return Ok(None);
            }
            if !status.is_success() {
                return Err(SecretStoreError::Unreachable(format!(
                    "vault returned {status} for {path}"
                )));
            }

            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| SecretStoreError::Unreachable(format!("read body: {e}")))?
                .to_bytes();
            parse_response(&body)
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(SecretStoreError::Unreachable(format!(
                "timed out after {:?} reading {path}",
                self.timeout
            ))),
        }
    }
}

impl SecretStore for VaultClient {
    fn read<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretData>, SecretStoreError>> {
        Box::pin(self.get(path))
    }
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Extract the `data` object from a Vault read response body.
fn parse_response(body: &[u8]) -> Result<Option<SecretData>, SecretStoreError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| SecretStoreError::Malformed(format!("invalid json: {e}")))?;
    match value.get("data") {
        Some(serde_json::Value::Object(map)) => Ok(Some(map.clone())),
        Some(serde_json::Value::Null) | None => Ok(None),
        Some(_) => Err(SecretStoreError::Malformed(
            "`data` is not an object".to_string(),
        )),
    }
}
