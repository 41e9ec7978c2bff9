use std::sync::Arc;

use crate::application::coherence::CoherenceEngine;
use crate::infra::metrics::{MetricsObserver, RequestLog};

#[derive(Clone)]
pub struct HttpState {
    pub engine: CoherenceEngine,
    pub metrics: Arc<MetricsObserver>,
    pub requests: Arc<RequestLog>,
}

impl HttpState {
    /// Wire `metrics` in as the engine's outcome observer.
    pub fn new(engine: CoherenceEngine, metrics: Arc<MetricsObserver>) -> Self {
        Self {
            engine: engine.with_observer(metrics.clone()),
            metrics,
            requests: Arc::new(RequestLog::default()),
        }
    }

    pub fn with_request_log(mut self, requests: RequestLog) -> Self {
        self.requests = Arc::new(requests);
        self
    }
}
