//! Per-identity endpoint allocation.

use crate::mcp::error::McpError;
use crate::mcp::transport::{Endpoint, HttpEndpoint};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_URL_FIELD: &str = "serverUrl";

const PROVISIONING_TIMEOUT_SECONDS: u64 = 30;

#[async_trait]
/// Allocates a dedicated endpoint for an identity key.
pub trait EndpointProvisioner: Send + Sync {
    async fn provision(&self, identity: &str) -> Result<Endpoint, McpError>;
}

/// Provisions endpoints by POSTing `{"userId", "servers"}` to an allocation
/// API and reading the server URL out of the JSON reply.
pub struct HttpProvisioner {
    client: reqwest::Client,
    url: String,
    api_key: String,
    servers: Vec<String>,
    url_field: String,
    template: HttpEndpoint,
}

impl fmt::Debug for HttpProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProvisioner")
            .field("url", &self.url)
            .field("servers", &self.servers)
            .field("url_field", &self.url_field)
            .finish()
    }
}

impl HttpProvisioner {
    /// `template` supplies the headers and bearer token reused for every
    /// provisioned endpoint; its URL is ignored.
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        servers: Vec<String>,
        url_field: Option<String>,
        template: HttpEndpoint,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVISIONING_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| McpError::ProvisioningFailed(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            servers,
            url_field: url_field.unwrap_or_else(|| DEFAULT_URL_FIELD.to_string()),
            template,
        })
    }
}

#[async_trait]
impl EndpointProvisioner for HttpProvisioner {
    async fn provision(&self, identity: &str) -> Result<Endpoint, McpError> {
        debug!(url = %self.url, identity = %identity, "Requesting dedicated MCP endpoint");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "userId": identity, "servers": self.servers }))
            .send()
            .await
            .map_err(|err| McpError::ProvisioningFailed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::ProvisioningFailed(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| McpError::ProvisioningFailed(format!("Invalid response: {err}")))?;
        let url = body
            .get(&self.url_field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                McpError::ProvisioningFailed(format!(
                    "Response is missing '{}'",
                    self.url_field
                ))
            })?;

        Ok(Endpoint::StreamableHttp(HttpEndpoint {
            url: url.to_string(),
            headers: self.template.headers.clone(),
            bearer_token: self.template.bearer_token.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(listener: TcpListener, status: &'static str, body: &'static str) -> String {
        let (mut stream, _) = listener.accept().await.expect("accept should succeed");
        let mut request = Vec::new();
        let mut chunk = [0_u8; 2048];
        loop {
            let read = stream.read(&mut chunk).await.expect("read should succeed");
            request.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&request);
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= split + 4 + length || read == 0 {
                    break;
                }
            }
            if read == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("write should succeed");
        String::from_utf8_lossy(&request).to_string()
    }

    fn template() -> HttpEndpoint {
        HttpEndpoint {
            url: String::new(),
            headers: BTreeMap::from([("X-Tenant".to_string(), "acme".to_string())]),
            bearer_token: Some("server-token".to_string()),
        }
    }

    fn disable_proxies() {
        std::env::set_var("NO_PROXY", "*");
        std::env::set_var("no_proxy", "*");
    }

    #[tokio::test]
    async fn provision_reads_server_url_from_response() {
        disable_proxies();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let server = tokio::spawn(serve_once(
            listener,
            "200 OK",
            r#"{"serverUrl":"https://strata.example.com/u/1"}"#,
        ));

        let provisioner = HttpProvisioner::new(
            format!("http://{addr}/strata/create"),
            "api-key",
            vec!["github".to_string()],
            None,
            template(),
        )
        .expect("provisioner should build");
        let endpoint = provisioner
            .provision("user-1")
            .await
            .expect("provisioning should succeed");

        match endpoint {
            Endpoint::StreamableHttp(http) => {
                assert_eq!(http.url, "https://strata.example.com/u/1");
                assert_eq!(http.bearer_token.as_deref(), Some("server-token"));
                assert_eq!(http.headers.get("X-Tenant").map(String::as_str), Some("acme"));
            }
            other => panic!("unexpected endpoint: {other:?}"),
        }

        let request = server.await.expect("server task should join");
        assert!(request.starts_with("POST /strata/create"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer api-key"));
        assert!(request.contains("\"userId\":\"user-1\""));
    }

    #[tokio::test]
    async fn provision_fails_without_url_field() {
        disable_proxies();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let server = tokio::spawn(serve_once(listener, "200 OK", r#"{"id":"abc"}"#));

        let provisioner = HttpProvisioner::new(
            format!("http://{addr}/strata/create"),
            "api-key",
            Vec::new(),
            None,
            template(),
        )
        .expect("provisioner should build");
        let err = provisioner
            .provision("user-1")
            .await
            .expect_err("missing field should fail");
        assert!(matches!(err, McpError::ProvisioningFailed(_)));
        server.await.expect("server task should join");
    }

    #[tokio::test]
    async fn provision_surfaces_http_errors() {
        disable_proxies();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let server = tokio::spawn(serve_once(
            listener,
            "403 Forbidden",
            r#"{"error":"bad key"}"#,
        ));

        let provisioner = HttpProvisioner::new(
            format!("http://{addr}/strata/create"),
            "wrong",
            Vec::new(),
            Some("url".to_string()),
            template(),
        )
        .expect("provisioner should build");
        let err = provisioner
            .provision("user-2")
            .await
            .expect_err("403 should fail");
        assert!(err.to_string().contains("403"));
        server.await.expect("server task should join");
    }
}
