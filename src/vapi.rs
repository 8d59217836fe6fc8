//! Remote calling API client.
//!
//! Places outbound phone calls and injects control messages into live calls.
//! Every created call comes back with a monitor block holding the listen URL
//! (live audio feed) and the control URL (message injection endpoint).

use crate::config::VapiConfig;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum VapiError {
    #[error("Remote API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Remote API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API response is missing {0}")]
    MissingField(&'static str),
}

impl VapiError {
    /// HTTP status to relay back to the caller.
    pub fn status(&self) -> u16 {
        match self {
            VapiError::Api { status, .. } => *status,
            VapiError::Http(e) => e.status().map(|s| s.as_u16()).unwrap_or(502),
            VapiError::MissingField(_) => 502,
        }
    }
}

/// Handles returned for a freshly created call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCall {
    pub id: Option<String>,
    pub listen_url: String,
    pub control_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallPayload<'a> {
    assistant_id: &'a str,
    phone_number_id: &'a str,
    customer: Customer<'a>,
}

#[derive(Debug, Serialize)]
struct Customer<'a> {
    number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ControlPayload<'a> {
    #[serde(rename = "type")]
    control_type: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    id: Option<String>,
    monitor: Option<Monitor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Monitor {
    listen_url: Option<String>,
    control_url: Option<String>,
}

/// Client for the remote calling API.
#[derive(Debug, Clone)]
pub struct VapiClient {
    client: Client,
    api_key: String,
    assistant_id: String,
    phone_number_id: String,
    base_url: String,
}

impl VapiClient {
    pub fn new(config: &VapiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            assistant_id: config.assistant_id.clone(),
            phone_number_id: config.phone_number_id.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Place an outbound call to `phone_number`.
    ///
    /// Not retried: each attempt may ring a real phone.
    pub async fn create_call(
        &self,
        phone_number: &str,
        customer_name: &str,
    ) -> Result<CreatedCall, VapiError> {
        info!("Creating call to {}", phone_number);

        let name = customer_name.trim();
        let payload = CreateCallPayload {
            assistant_id: &self.assistant_id,
            phone_number_id: &self.phone_number_id,
            customer: Customer {
                number: phone_number,
                name: (!name.is_empty()).then_some(name),
            },
        };

        let response = self
            .client
            .post(format!("{}/call", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let response = check_status(response).await?;
        let call: CallResponse = response.json().await?;

        let monitor = call.monitor.ok_or(VapiError::MissingField("monitor"))?;
        let listen_url = monitor
            .listen_url
            .ok_or(VapiError::MissingField("monitor.listenUrl"))?;

        info!(call_id = ?call.id, "Call created");
        Ok(CreatedCall {
            id: call.id,
            listen_url,
            control_url: monitor.control_url,
        })
    }

    /// Post a control message to a live call's control URL.
    pub async fn send_control(
        &self,
        control_url: &str,
        control_type: &str,
        message: &str,
    ) -> Result<(), VapiError> {
        info!("Sending {} control message", control_type);

        let response = self
            .client
            .post(control_url)
            .json(&ControlPayload {
                control_type,
                message,
            })
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`VapiError::Api`] with the best message available.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, VapiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    warn!(status = status.as_u16(), "Remote API error: {}", message);
    Err(VapiError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Pull a human readable message out of an error body.
///
/// The API reports validation failures as `{"message": [..]}` and other errors as
/// `{"message": ".."}` or `{"error": ".."}`; anything else is passed through raw.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    match value.get("message") {
        Some(serde_json::Value::String(message)) => return Some(message.clone()),
        Some(serde_json::Value::Array(items)) => {
            let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            if !parts.is_empty() {
                return Some(parts.join("; "));
            }
        }
        _ => {}
    }

    value
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> VapiClient {
        VapiClient::new(&VapiConfig {
            api_key: "secret".to_string(),
            assistant_id: "asst_1".to_string(),
            phone_number_id: "pn_1".to_string(),
            api_base_url: format!("{}/", base_url),
        })
    }

    #[tokio::test]
    async fn test_create_call_returns_monitor_urls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({
                "assistantId": "asst_1",
                "phoneNumberId": "pn_1",
                "customer": {"number": "+15551234567", "name": "Jane"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "call_1",
                "monitor": {"listenUrl": "wss://x/y", "controlUrl": "https://x/control"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let call = client(&server.uri())
            .create_call("+15551234567", "Jane")
            .await
            .unwrap();

        assert_eq!(
            call,
            CreatedCall {
                id: Some("call_1".to_string()),
                listen_url: "wss://x/y".to_string(),
                control_url: Some("https://x/control".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_blank_customer_name_is_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .and(body_json(json!({
                "assistantId": "asst_1",
                "phoneNumberId": "pn_1",
                "customer": {"number": "+15551234567"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "monitor": {"listenUrl": "wss://x/y"}
            })))
            .mount(&server)
            .await;

        let call = client(&server.uri())
            .create_call("+15551234567", "  ")
            .await
            .unwrap();
        assert_eq!(call.id, None);
        assert_eq!(call.control_url, None);
    }

    #[tokio::test]
    async fn test_api_error_keeps_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": ["customer.number must be a valid phone number"],
                "error": "Bad Request"
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_call("123", "Jane")
            .await
            .unwrap_err();

        assert_eq!(err.status(), 400);
        assert!(matches!(
            err,
            VapiError::Api { ref message, .. } if message == "customer.number must be a valid phone number"
        ));
    }

    #[tokio::test]
    async fn test_missing_listen_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "call_1"})))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_call("+15551234567", "Jane")
            .await
            .unwrap_err();
        assert!(matches!(err, VapiError::MissingField("monitor")));
        assert_eq!(err.status(), 502);
    }

    #[tokio::test]
    async fn test_send_control_posts_type_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/control/abc"))
            .and(body_json(json!({"type": "say", "message": "hello"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let control_url = format!("{}/control/abc", server.uri());
        client(&server.uri())
            .send_control(&control_url, "say", "hello")
            .await
            .unwrap();
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(r#"{"message":"nope"}"#).as_deref(), Some("nope"));
        assert_eq!(error_message(r#"{"error":"denied"}"#).as_deref(), Some("denied"));
        assert_eq!(error_message("plain text").as_deref(), Some("plain text"));
        assert_eq!(error_message("   "), None);
    }
}
