//! Command handler for control API
//!
//! Every request locks the anchor session, so calls from the control socket
//! are serialized with the runtime's own bring-up and unwind.

use crate::anchor::AnchorSession;
use crate::config::ConfigStore;
use crate::control::{ApiError, ApiRequest, ApiResponse, ControlAction};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Dispatches control requests to the anchor session
pub struct CommandHandler {
    session: Arc<Mutex<AnchorSession>>,
    store: Option<ConfigStore>,
}

impl CommandHandler {
    /// Create a handler; taint changes are mirrored into `store` when given
    pub fn new(session: Arc<Mutex<AnchorSession>>, store: Option<ConfigStore>) -> Self {
        Self { session, store }
    }

    /// Handle an API request
    pub async fn handle_request(&self, request: ApiRequest) -> ApiResponse {
        debug!("Handling request {}: {:?}", request.id, request.action);

        let result = match request.action {
            ControlAction::Status => self.handle_status().await,
            ControlAction::AddTaint => self.handle_taint(&request, true).await,
            ControlAction::RemoveTaint => self.handle_taint(&request, false).await,
            ControlAction::GetId => self.handle_get_id().await,
        };

        match result {
            Ok(data) => {
                info!(
                    "Request {} completed successfully: {:?}",
                    request.id, request.action
                );
                ApiResponse::success(request.id, data)
            }
            Err(e) => {
                error!("Request {} failed: {}", request.id, e);
                ApiResponse::error(request.id, e)
            }
        }
    }

    async fn handle_status(&self) -> Result<Option<serde_json::Value>, ApiError> {
        let session = self.session.lock().await;
        Ok(Some(json!({
            "state": session.state(),
            "connected": session.is_connected(),
            "peer": session.peer(),
            "tun": session.tun(),
            "taints": session.taints(),
        })))
    }

    async fn handle_taint(
        &self,
        request: &ApiRequest,
        add: bool,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        let taint = request
            .taint
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidRequest("taint is required".to_string()))?;

        // Held until the store is written, so concurrent changes cannot
        // overwrite each other's load-modify-save
        let mut session = self.session.lock().await;
        if add {
            session.add_taint(taint).await?;
        } else {
            session.remove_taint(taint).await?;
        }
        let taints = session.taints().clone();

        let persisted = match &self.store {
            Some(store) => persist_taint(store.clone(), taint.to_string(), add).await,
            None => false,
        };
        drop(session);

        Ok(Some(json!({
            "taint": taint,
            "taints": taints,
            "persisted": persisted,
        })))
    }

    async fn handle_get_id(&self) -> Result<Option<serde_json::Value>, ApiError> {
        let id = self.session.lock().await.get_id().await?;
        Ok(Some(json!({ "id": id })))
    }
}

async fn persist_taint(store: ConfigStore, taint: String, add: bool) -> bool {
    let result = tokio::task::spawn_blocking(move || {
        store.update(|config| {
            if add {
                config.taints.add(&taint);
            } else {
                config.taints.remove(&taint);
            }
        })
    })
    .await;

    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Taint change applied but not persisted: {}", e);
            false
        }
        Err(e) => {
            warn!("Taint persistence task failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{AnchorClient, ReferenceAnchor};
    use crate::anchor::emulator::serve_connection;
    use crate::config::ConfluxConfig;
    use crate::transport::Transport;

    fn handler(store: Option<ConfigStore>) -> (CommandHandler, Arc<std::sync::Mutex<ReferenceAnchor>>) {
        let anchor = Arc::new(std::sync::Mutex::new(ReferenceAnchor::with_id("anchor-test")));
        let (a, b) = tokio::io::duplex(8192);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        tokio::spawn(serve_connection(br, bw, anchor.clone()));

        let client = AnchorClient::new(Transport::from_io(ar, aw, "duplex"));
        let session = Arc::new(Mutex::new(AnchorSession::new(client)));
        (CommandHandler::new(session, store), anchor)
    }

    #[tokio::test]
    async fn test_status_reports_state() {
        let (handler, _anchor) = handler(None);
        let response = handler
            .handle_request(ApiRequest::new(ControlAction::Status))
            .await;

        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["state"], "uninitialized");
        assert_eq!(data["connected"], true);
        assert!(data["tun"].is_null());
    }

    #[tokio::test]
    async fn test_taint_requires_argument() {
        let (handler, anchor) = handler(None);
        let response = handler
            .handle_request(ApiRequest::new(ControlAction::AddTaint))
            .await;

        assert!(!response.success);
        assert!(matches!(response.error, Some(ApiError::InvalidRequest(_))));
        assert!(anchor.lock().unwrap().journal().is_empty());
    }

    #[tokio::test]
    async fn test_taints_mirrored_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save(&ConfluxConfig::default()).unwrap();
        let (handler, anchor) = handler(Some(store.clone()));

        let response = handler
            .handle_request(ApiRequest::with_taint(ControlAction::AddTaint, "team=infra"))
            .await;
        assert!(response.success);
        assert_eq!(response.data.unwrap()["persisted"], true);
        assert!(store.load().unwrap().taints.contains("team=infra"));
        assert!(anchor.lock().unwrap().taints().contains("team=infra"));

        let response = handler
            .handle_request(ApiRequest::with_taint(ControlAction::RemoveTaint, "team=infra"))
            .await;
        assert!(response.success);
        assert!(store.load().unwrap().taints.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_taint_changes_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save(&ConfluxConfig::default()).unwrap();
        let (handler, _anchor) = handler(Some(store.clone()));
        let handler = Arc::new(handler);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler
                        .handle_request(ApiRequest::with_taint(
                            ControlAction::AddTaint,
                            format!("key{}=value", i),
                        ))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().success);
        }

        let persisted = store.load().unwrap().taints;
        assert_eq!(persisted.len(), 8);
        for i in 0..8 {
            assert!(persisted.contains(&format!("key{}=value", i)));
        }
    }

    #[tokio::test]
    async fn test_get_id_before_create_is_rejected() {
        let (handler, _anchor) = handler(None);
        let response = handler
            .handle_request(ApiRequest::new(ControlAction::GetId))
            .await;

        assert!(!response.success);
        assert!(matches!(response.error, Some(ApiError::AnchorRejected(_))));
    }
}
