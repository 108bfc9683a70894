use std::time::Duration;

use butler_schemas::{ErrorKind, ToolError, TraceContext};
use serde_json::Value;

/// Resolves a butler name to a base URL. The switchboard's registry table
/// (`butler_registry`, see `butler-db::registry`) is the production
/// implementation; tests supply a fixed map.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, butler_name: &str) -> Option<String>;
}

/// Thin reqwest-backed client for calling a named tool on a named butler.
///
/// Errors at every layer — unresolvable butler, transport failure, non-2xx
/// response, malformed body — collapse into a `ToolError` so callers never
/// have to distinguish "the peer returned `{"error":...}`" from "the
/// connection never completed."
pub struct RpcClient<R: EndpointResolver> {
    http: reqwest::Client,
    resolver: R,
}

impl<R: EndpointResolver> RpcClient<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            resolver,
        }
    }

    pub async fn call_tool(
        &self,
        butler_name: &str,
        tool_name: &str,
        args: Value,
        trace_context: Option<TraceContext>,
    ) -> Result<Value, ToolError> {
        let base = self.resolver.resolve(butler_name).ok_or_else(|| {
            ToolError::new(
                ErrorKind::ButlerUnreachable,
                format!("no registry entry for butler '{butler_name}'"),
            )
        })?;

        let mut body = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("args".to_string(), other);
                map
            }
        };
        if let Some(tc) = &trace_context {
            body.insert(
                "trace_context".to_string(),
                serde_json::to_value(tc).expect("TraceContext always serializes"),
            );
        }

        let url = format!("{}/v1/tools/{}", base.trim_end_matches('/'), tool_name);
        let resp = self
            .http
            .post(&url)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| {
                ToolError::new(
                    ErrorKind::ButlerUnreachable,
                    format!("calling {butler_name}.{tool_name}: {e}"),
                )
            })?;

        let value: Value = resp.json().await.map_err(|e| {
            ToolError::new(
                ErrorKind::InternalError,
                format!("decoding response from {butler_name}.{tool_name}: {e}"),
            )
        })?;

        if let Some(err_obj) = value.get("error") {
            let parsed: ToolError = serde_json::from_value(err_obj.clone()).unwrap_or_else(|_| {
                ToolError::new(
                    ErrorKind::InternalError,
                    format!("malformed error body from {butler_name}.{tool_name}"),
                )
            });
            return Err(parsed);
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct MapResolver(BTreeMap<String, String>);

    impl EndpointResolver for MapResolver {
        fn resolve(&self, butler_name: &str) -> Option<String> {
            self.0.get(butler_name).cloned()
        }
    }

    #[tokio::test]
    async fn unresolvable_butler_is_butler_unreachable() {
        let client = RpcClient::new(MapResolver(BTreeMap::new()));
        let err = client
            .call_tool("messenger", "send", Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorKind::ButlerUnreachable.as_str());
    }
}
