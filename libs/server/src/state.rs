use docindex_core::{EventEnvelope, RebuildCoordinator};
use std::{sync::Arc, time::Instant};

/// Turns an event into the payload written to an observer's stream.
///
/// Markup lives entirely on this side: the core only hands out envelopes.
pub type FragmentRenderer = Arc<dyn Fn(&EventEnvelope) -> String + Send + Sync>;

pub fn json_renderer() -> FragmentRenderer {
    Arc::new(|envelope: &EventEnvelope| {
        serde_json::to_string(envelope)
            .unwrap_or_else(|_| "{\"error\":\"serialization_failed\"}".to_string())
    })
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RebuildCoordinator,
    pub renderer: FragmentRenderer,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(coordinator: RebuildCoordinator) -> Self {
        Self {
            coordinator,
            renderer: json_renderer(),
            started_at: Instant::now(),
        }
    }

    pub fn with_renderer(mut self, renderer: FragmentRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn render(&self, envelope: &EventEnvelope) -> String {
        (self.renderer)(envelope)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
