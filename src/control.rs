//! Call Control Client
//!
//! Listener-side client of the relay server's two endpoints. Only the JSON
//! `success` / `error` fields decide the outcome; HTTP status codes are not
//! surfaced to the user.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// Control message type sent when the user leaves the type blank.
pub const DEFAULT_CONTROL_TYPE: &str = "assistant_message";

#[derive(Error, Debug)]
pub enum ControlError {
    /// Rejected before any request was made.
    #[error("{0}")]
    Validation(String),

    /// The relay answered with `success: false`.
    #[error("{0}")]
    Remote(String),

    /// The request never produced a readable answer.
    #[error("Request to relay server failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// What the relay hands back for a placed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLinks {
    pub listen_url: String,
    pub control_url: Option<String>,
    pub call_id: Option<String>,
}

impl CallLinks {
    /// URL control messages go to. Older relays return no control URL, in which
    /// case the listen URL is used as the call's handle.
    pub fn control_target(&self) -> &str {
        self.control_url.as_deref().unwrap_or(&self.listen_url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    #[serde(default)]
    success: bool,
    listen_url: Option<String>,
    control_url: Option<String>,
    call_id: Option<String>,
    error: Option<String>,
}

impl RelayResponse {
    fn failure(self) -> ControlError {
        ControlError::Remote(self.error.unwrap_or_else(|| "Unknown error".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct CallControlClient {
    client: Client,
    server_url: String,
}

impl CallControlClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            client: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ask the relay to place a call. A failed attempt is returned as-is, never retried.
    pub async fn initiate_call(
        &self,
        phone_number: &str,
        customer_name: &str,
    ) -> Result<CallLinks, ControlError> {
        debug!("Initiating call to {}", phone_number);

        let body: RelayResponse = self
            .client
            .post(format!("{}/initiate-call", self.server_url))
            .json(&json!({
                "phoneNumber": phone_number,
                "customerName": customer_name,
            }))
            .send()
            .await
            .map_err(log_transport)?
            .json()
            .await
            .map_err(log_transport)?;

        if !body.success {
            return Err(body.failure());
        }

        let listen_url = body
            .listen_url
            .ok_or_else(|| ControlError::Remote("Relay response is missing listenUrl".to_string()))?;

        Ok(CallLinks {
            listen_url,
            control_url: body.control_url,
            call_id: body.call_id,
        })
    }

    /// Send a control message into a live call.
    ///
    /// An empty `message` is rejected without contacting the relay. A blank
    /// `control_type` falls back to [`DEFAULT_CONTROL_TYPE`].
    pub async fn send_control(
        &self,
        control_url: &str,
        control_type: Option<&str>,
        message: &str,
    ) -> Result<bool, ControlError> {
        if message.is_empty() {
            return Err(ControlError::Validation(
                "Please enter a message to send.".to_string(),
            ));
        }

        let control_type = control_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CONTROL_TYPE);

        let body: RelayResponse = self
            .client
            .post(format!("{}/control-call", self.server_url))
            .json(&json!({
                "controlUrl": control_url,
                "type": control_type,
                "message": message,
            }))
            .send()
            .await
            .map_err(log_transport)?
            .json()
            .await
            .map_err(log_transport)?;

        if body.success {
            Ok(true)
        } else {
            Err(body.failure())
        }
    }
}

fn log_transport(err: reqwest::Error) -> ControlError {
    error!("Relay request failed: {}", err);
    ControlError::Transport(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_initiate_call_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initiate-call"))
            .and(body_json(json!({"phoneNumber": "+15551234567", "customerName": "Jane"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "listenUrl": "wss://x/y"})),
            )
            .mount(&server)
            .await;

        let links = CallControlClient::new(&server.uri())
            .initiate_call("+15551234567", "Jane")
            .await
            .unwrap();

        assert_eq!(links.listen_url, "wss://x/y");
        assert_eq!(links.control_target(), "wss://x/y");
    }

    #[tokio::test]
    async fn test_initiate_call_surfaces_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initiate-call"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "error": "Invalid Key"})),
            )
            .mount(&server)
            .await;

        let err = CallControlClient::new(&server.uri())
            .initiate_call("+15551234567", "Jane")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Remote(ref m) if m == "Invalid Key"));
    }

    #[tokio::test]
    async fn test_empty_message_never_hits_network() {
        let server = MockServer::start().await;
        let client = CallControlClient::new(&server.uri());

        let err = client
            .send_control("https://x/control", None, "")
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::Validation(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_control_uses_default_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/control-call"))
            .and(body_json(json!({
                "controlUrl": "https://x/control",
                "type": "assistant_message",
                "message": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let sent = CallControlClient::new(&server.uri())
            .send_control("https://x/control", Some("  "), "hello")
            .await
            .unwrap();
        assert!(sent);
    }

    #[tokio::test]
    async fn test_unreadable_response_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/control-call"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = CallControlClient::new(&server.uri())
            .send_control("https://x/control", Some("say"), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Transport(_)));
    }
}
