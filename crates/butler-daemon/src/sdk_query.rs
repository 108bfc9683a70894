//! Default production `SdkQuery`: posts the prompt to a configured HTTP
//! endpoint and treats the JSON response body as the session output. A real
//! model-session adapter streams status while it runs; this daemon only
//! consumes the terminal `SessionOutcome`, so a thin reqwest call is the
//! whole of what the spawner needs from it, in keeping with how
//! `butler-rpc::RpcClient` already talks to peer butlers over the same
//! JSON-over-HTTP shape.

use async_trait::async_trait;
use butler_spawner::{SdkQuery, SessionOptions, SessionOutcome};
use tokio_util::sync::CancellationToken;

pub struct HttpSdkQuery {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSdkQuery {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SdkQuery for HttpSdkQuery {
    async fn query(&self, prompt: &str, options: &SessionOptions, cancel: CancellationToken) -> SessionOutcome {
        let body = serde_json::json!({
            "prompt": prompt,
            "trigger_source": options.trigger_source,
            "request_id": options.request_id,
            "extra": options.extra,
        });

        let request = self.http.post(&self.endpoint).json(&body).send();

        tokio::select! {
            _ = cancel.cancelled() => SessionOutcome::cancelled(),
            result = request => match result {
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => match resp.json::<serde_json::Value>().await {
                        Ok(value) => SessionOutcome::ok(value),
                        Err(e) => SessionOutcome::failed(format!("decode session response: {e}")),
                    },
                    Err(e) => SessionOutcome::failed(format!("session endpoint returned error status: {e}")),
                },
                Err(e) => SessionOutcome::failed(format!("session request failed: {e}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_stored_verbatim() {
        let q = HttpSdkQuery::new("http://localhost:9100/session");
        assert_eq!(q.endpoint, "http://localhost:9100/session");
    }
}
