use std::time::{Duration, Instant};

use tracing::debug;

/// Diagnostic step clock owned by a single build or apply call.
///
/// Every `step` logs its message together with the time spent since the
/// previous step of the same call, so concurrent calls never share timing
/// state.
#[derive(Debug)]
pub struct StepTimer {
    operation: &'static str,
    started: Instant,
    last: Option<Instant>,
}

impl StepTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
            last: None,
        }
    }

    pub fn step(&mut self, message: &str) {
        let now = Instant::now();
        match self.last {
            Some(prev) => {
                let since_prev_ms = now.duration_since(prev).as_millis() as u64;
                debug!(op = self.operation, since_prev_ms, "{message}");
            }
            None => debug!(op = self.operation, "{message}"),
        }
        self.last = Some(now);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
