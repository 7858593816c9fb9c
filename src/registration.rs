//! Guardian registration client
//!
//! Registration exchanges a one-time registration token for the conflux id
//! and anchor token stored in [`ConfluxConfig`](crate::config::ConfluxConfig).
//! Calls are blocking; async callers run them on `spawn_blocking`.

use crate::config::ConfluxConfig;
use crate::error::{ConfluxError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use ureq::{Agent, AgentBuilder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST {guardian}/conflux/register`
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// One-time registration token
    pub registration_token: String,
    /// Guardian base URL; not sent
    #[serde(skip)]
    pub guardian: String,
    /// Free-form tag for the conflux
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// Optional JWT for identity-bound registration
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwt: String,
    /// JWKS URL used to verify `jwt`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwks_url: String,
    /// Expected JWT audience
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub audience: String,
    /// Expected JWT issuer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    /// Requested overlay address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("registration_token", &"<redacted>")
            .field("guardian", &self.guardian)
            .field("tag", &self.tag)
            .field("jwks_url", &self.jwks_url)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("ip", &self.ip)
            .finish()
    }
}

/// Guardian's answer to a registration
#[derive(Clone, Deserialize)]
pub struct RegistrationResponse {
    /// Assigned conflux identifier
    pub conflux_id: String,
    /// Anchor token
    pub token: String,
}

impl std::fmt::Debug for RegistrationResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationResponse")
            .field("conflux_id", &self.conflux_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// HTTP client for the Guardian
pub struct GuardianClient {
    agent: Agent,
    base_url: String,
}

impl GuardianClient {
    /// Client for the Guardian at `base_url`
    pub fn new(base_url: &str) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Register a new conflux
    pub fn register(&self, request: &RegistrationRequest) -> Result<RegistrationResponse> {
        if request.registration_token.is_empty() {
            return Err(ConfluxError::Validation(
                "registration token is required".to_string(),
            ));
        }

        let url = format!("{}/conflux/register", self.base_url);
        debug!("Registering conflux at {}", url);

        let response = self
            .agent
            .post(&url)
            .send_json(request)
            .map_err(|e| registration_error("register", e))?;

        let registered: RegistrationResponse = response.into_json().map_err(|e| {
            ConfluxError::Registration(format!("invalid registration response: {}", e))
        })?;

        info!("Registered conflux {}", registered.conflux_id);
        Ok(registered)
    }

    /// Unregister the conflux described by `config`
    pub fn unregister(&self, registration_token: &str, config: &ConfluxConfig) -> Result<()> {
        if config.conflux_id.is_empty() {
            return Err(ConfluxError::Validation(
                "config has no conflux id".to_string(),
            ));
        }

        let url = format!("{}/conflux/{}", self.base_url, config.conflux_id);
        debug!("Unregistering conflux at {}", url);

        self.agent
            .delete(&url)
            .set("Authorization", &format!("Bearer {}", registration_token))
            .call()
            .map_err(|e| registration_error("unregister", e))?;

        info!("Unregistered conflux {}", config.conflux_id);
        Ok(())
    }
}

fn registration_error(operation: &str, err: ureq::Error) -> ConfluxError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            ConfluxError::Registration(format!(
                "{} failed with status {}: {}",
                operation,
                code,
                body.trim()
            ))
        }
        ureq::Error::Transport(t) => {
            ConfluxError::Registration(format!("{} failed: {}", operation, t))
        }
    }
}
