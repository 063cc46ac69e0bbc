//! Forwards relay-issued GraphQL operations to the local API.

use std::time::Duration;

use serde_json::Value;

use crate::domain::GraphqlOperation;
use crate::error::RelayError;

/// Header carrying the device's own API key on local API calls.
pub const API_KEY_HEADER: &str = "x-api-key";

/// HTTP client for the on-device GraphQL endpoint.
///
/// Authenticates with the device's own API key, never with anything the
/// relay supplied, so the relay cannot act as an arbitrary local caller.
#[derive(Debug, Clone)]
pub struct LocalApiProxy {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LocalApiProxy {
    /// Builds a proxy for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if the HTTP client cannot be
    /// constructed.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::InvalidConfig(format!("local api client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// Executes `operation` and returns the GraphQL response body.
    ///
    /// A body that is a JSON object carrying `data` or `errors` is returned
    /// as-is, GraphQL-level errors included.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::LocalApi`] when the local API is unreachable,
    /// times out, or answers with something that is not a GraphQL response.
    pub async fn execute(&self, operation: &GraphqlOperation) -> Result<Value, RelayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(operation)
            .send()
            .await
            .map_err(|e| RelayError::LocalApi(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| RelayError::LocalApi(format!("unreadable response ({status}): {e}")))?;

        match &body {
            Value::Object(map) if map.contains_key("data") || map.contains_key("errors") => {
                Ok(body)
            }
            _ => Err(RelayError::LocalApi(format!(
                "malformed graphql response ({status})"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use serde_json::json;
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn serve(reply: Value) -> (SocketAddr, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let app = Router::new().route(
            "/graphql",
            post(move |headers: HeaderMap, axum::Json(body): axum::Json<Value>| {
                let recorder = Arc::clone(&recorder);
                let reply = reply.clone();
                async move {
                    let key = headers
                        .get(API_KEY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    recorder.lock().await.push((key, body));
                    axum::Json(reply)
                }
            }),
        );
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("local addr");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, seen)
    }

    fn proxy(addr: SocketAddr) -> LocalApiProxy {
        match LocalApiProxy::new(
            format!("http://{addr}/graphql"),
            "device-key",
            Duration::from_secs(5),
        ) {
            Ok(proxy) => proxy,
            Err(e) => panic!("proxy: {e}"),
        }
    }

    #[tokio::test]
    async fn forwards_body_with_device_key() {
        let (addr, seen) = serve(json!({"data": {"ping": "pong"}})).await;
        let result = proxy(addr).execute(&GraphqlOperation::new("{ping}")).await;

        let Ok(body) = result else {
            panic!("expected success");
        };
        assert_eq!(body, json!({"data": {"ping": "pong"}}));

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        let Some((key, request)) = seen.first() else {
            panic!("one request recorded");
        };
        assert_eq!(key.as_deref(), Some("device-key"));
        assert_eq!(request, &json!({"query": "{ping}"}));
    }

    #[tokio::test]
    async fn graphql_errors_pass_through() {
        let (addr, _) = serve(json!({"errors": [{"message": "forbidden"}]})).await;
        let result = proxy(addr).execute(&GraphqlOperation::new("{secret}")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn malformed_response_is_error() {
        let (addr, _) = serve(json!(["not", "graphql"])).await;
        let result = proxy(addr).execute(&GraphqlOperation::new("{ping}")).await;
        assert!(matches!(result, Err(RelayError::LocalApi(_))));
    }

    #[tokio::test]
    async fn unreachable_api_is_error() {
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("local addr");
        };
        drop(listener);

        let result = proxy(addr).execute(&GraphqlOperation::new("{ping}")).await;
        assert!(matches!(result, Err(RelayError::LocalApi(_))));
    }
}
