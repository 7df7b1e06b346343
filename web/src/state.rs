//! Application state for Axum handlers.

use request_relay_runtime::IntakeHandler;
use std::sync::Arc;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    intake: Arc<IntakeHandler>,
}

impl AppState {
    /// Create state around an intake handler.
    #[must_use]
    pub const fn new(intake: Arc<IntakeHandler>) -> Self {
        Self { intake }
    }

    /// The intake handler requests are submitted to.
    #[must_use]
    pub fn intake(&self) -> &IntakeHandler {
        &self.intake
    }
}
