//! Call relay endpoints.
//!
//! POST /initiate-call
//! Body: {"phoneNumber": "+15551234567", "customerName": "Jane"}
//!
//! POST /control-call
//! Body: {"controlUrl": "https://...", "type": "say", "message": "Hello"}

use crate::control::DEFAULT_CONTROL_TYPE;
use crate::error::{AppError, AppResult};
use crate::state::{AppState, RelayEvent};

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallRequest {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub customer_name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallResponse {
    pub success: bool,
    pub listen_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCallRequest {
    #[serde(default)]
    pub control_url: String,
    #[serde(default, rename = "type")]
    pub control_type: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Body extractor settings for the relay endpoints: unreadable JSON is a 400
/// with the usual `{success: false, error}` body.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into())
}

pub async fn initiate_call(
    state: web::Data<AppState>,
    req: web::Json<InitiateCallRequest>,
) -> AppResult<HttpResponse> {
    let phone_number = req.phone_number.trim();
    if phone_number.is_empty() {
        return Err(AppError::ValidationError("phoneNumber is required".to_string()));
    }

    let call = state
        .vapi
        .create_call(phone_number, &req.customer_name)
        .await
        .map_err(|e| {
            tracing::error!("Error initiating call: {}", e);
            state.record_relay(RelayEvent::RemoteFailure);
            AppError::from(e)
        })?;

    state.record_relay(RelayEvent::CallInitiated);
    Ok(HttpResponse::Ok().json(InitiateCallResponse {
        success: true,
        listen_url: call.listen_url,
        control_url: call.control_url,
        call_id: call.id,
    }))
}

pub async fn control_call(
    state: web::Data<AppState>,
    req: web::Json<ControlCallRequest>,
) -> AppResult<HttpResponse> {
    if req.control_url.trim().is_empty() {
        return Err(AppError::ValidationError("controlUrl is required".to_string()));
    }
    if req.message.is_empty() {
        return Err(AppError::ValidationError("message is required".to_string()));
    }

    let control_type = req
        .control_type
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_CONTROL_TYPE);

    state
        .vapi
        .send_control(req.control_url.trim(), control_type, &req.message)
        .await
        .map_err(|e| {
            tracing::error!("Error sending control message: {}", e);
            state.record_relay(RelayEvent::RemoteFailure);
            AppError::from(e)
        })?;

    state.record_relay(RelayEvent::ControlSent);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}
