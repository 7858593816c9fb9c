//! Control API request and response types
//!
//! One JSON object per line in each direction:
//! `{"id":"req-1","action":"add_taint","taint":"team=infra"}` is answered by
//! `{"id":"req-1","success":true,"data":{...}}`.

use crate::anchor::AnchorFault;
use crate::error::ConfluxError;
use serde::{Deserialize, Serialize};

/// Actions accepted on the control socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Report anchor state, TUN and taints
    Status,
    /// Attach a taint and persist it
    AddTaint,
    /// Detach a taint and persist the removal
    RemoveTaint,
    /// Fetch the anchor identifier
    GetId,
}

/// API request from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Request ID for tracking
    #[serde(default = "default_request_id")]
    pub id: String,

    /// Action to perform
    pub action: ControlAction,

    /// Taint argument for `add_taint` / `remove_taint`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint: Option<String>,
}

impl ApiRequest {
    /// Create a new API request
    pub fn new(action: ControlAction) -> Self {
        Self {
            id: default_request_id(),
            action,
            taint: None,
        }
    }

    /// Create a taint request
    pub fn with_taint(action: ControlAction, taint: impl Into<String>) -> Self {
        Self {
            taint: Some(taint.into()),
            ..Self::new(action)
        }
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::SerializationError(e.to_string()))
    }
}

/// API response to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Request ID this response corresponds to
    pub id: String,

    /// Whether the request was successful
    pub success: bool,

    /// Optional result data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Optional error information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    /// Create a successful response
    pub fn success(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: String, error: ApiError) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::SerializationError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

/// API error types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "message")]
pub enum ApiError {
    /// Failed to parse request
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize response
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Request is missing an argument or has an invalid one
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid action for current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The anchor rejected the call
    #[error("Anchor rejected request: {0}")]
    AnchorRejected(AnchorFault),

    /// The anchor cannot be reached
    #[error("Anchor unavailable: {0}")]
    AnchorUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<ConfluxError> for ApiError {
    fn from(err: ConfluxError) -> Self {
        match err {
            ConfluxError::Validation(msg) => ApiError::InvalidRequest(msg),
            ConfluxError::InvalidState(msg) => ApiError::InvalidState(msg),
            ConfluxError::CapabilityRejected(fault) => ApiError::AnchorRejected(fault),
            ConfluxError::TransportUnavailable(msg) => ApiError::AnchorUnavailable(msg),
            ConfluxError::Config(msg) => ApiError::ConfigError(msg),
            ConfluxError::Serialization(msg) => ApiError::SerializationError(msg),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

fn default_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("req-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_request_json() {
        let req = ApiRequest::with_taint(ControlAction::AddTaint, "team=infra");
        let json = req.to_json().unwrap();
        assert!(json.contains(r#""action":"add_taint""#));

        let parsed = ApiRequest::from_json(&json).unwrap();
        assert_eq!(parsed.id, req.id);
        assert_eq!(parsed.action, ControlAction::AddTaint);
        assert_eq!(parsed.taint.as_deref(), Some("team=infra"));
    }

    #[test]
    fn test_request_id_defaults() {
        let req = ApiRequest::from_json(r#"{"action":"status"}"#).unwrap();
        assert!(req.id.starts_with("req-"));
        assert!(req.taint.is_none());
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(matches!(
            ApiRequest::from_json(r#"{"action":"reboot"}"#),
            Err(ApiError::ParseError(_))
        ));
    }

    #[test]
    fn test_api_response_error() {
        let resp = ApiResponse::error(
            "test-1".to_string(),
            ApiError::InvalidRequest("taint is required".to_string()),
        );

        assert!(!resp.success);
        assert!(resp.data.is_none());
        let json = resp.to_json().unwrap();
        assert!(json.contains(r#""type":"InvalidRequest""#));
    }

    #[test]
    fn test_api_error_conversion() {
        let api_error: ApiError =
            ConfluxError::CapabilityRejected(AnchorFault::NotReady("no tun".to_string())).into();
        assert_eq!(
            api_error,
            ApiError::AnchorRejected(AnchorFault::NotReady("no tun".to_string()))
        );

        let api_error: ApiError = ConfluxError::Config("test error".to_string()).into();
        assert_eq!(api_error, ApiError::ConfigError("test error".to_string()));
    }
}
