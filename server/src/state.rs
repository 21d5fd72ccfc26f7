//! Shared application state.

use questline_core::ingest::EventStreamProcessor;
use questline_core::service::TaskService;
use std::sync::Arc;
use tokio::sync::watch;

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The task engine.
    pub service: Arc<TaskService>,
    /// Driver for duplex event-stream sessions.
    pub processor: Arc<EventStreamProcessor>,
    /// Flips to `true` on graceful shutdown; open stream sessions observe
    /// it as cancellation.
    pub shutdown: watch::Receiver<bool>,
}
