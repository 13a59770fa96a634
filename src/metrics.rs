/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Engine counters exposed on `/metrics`.
//!
//! Plain shared atomics; workers increment, the HTTP surface renders the
//! Prometheus text exposition. The counters are process-wide across all
//! worker instances.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the dispatch engine.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    /// Rows claimed from the outbox.
    pub claimed: AtomicU64,
    /// Rows transitioned to `done`.
    pub succeeded: AtomicU64,
    /// Rows rescheduled for retry.
    pub retried: AtomicU64,
    /// Rows transitioned to `dead`.
    pub dead: AtomicU64,
    /// Database connectivity failures observed by workers.
    pub connection_failures: AtomicU64,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders the counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);
        for (name, help, value) in [
            (
                "outboxd_events_claimed_total",
                "Outbox rows claimed for processing",
                self.claimed.load(Ordering::Relaxed),
            ),
            (
                "outboxd_events_succeeded_total",
                "Outbox rows processed successfully",
                self.succeeded.load(Ordering::Relaxed),
            ),
            (
                "outboxd_events_retried_total",
                "Outbox rows scheduled for retry",
                self.retried.load(Ordering::Relaxed),
            ),
            (
                "outboxd_events_dead_total",
                "Outbox rows moved to the dead-letter queue",
                self.dead.load(Ordering::Relaxed),
            ),
            (
                "outboxd_db_connection_failures_total",
                "Database connectivity failures observed by workers",
                self.connection_failures.load(Ordering::Relaxed),
            ),
        ] {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }

    pub fn add_claimed(&self, n: u64) {
        self.claimed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dead(&self) {
        self.dead.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_connection_failures(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_emits_all_counters_in_exposition_format() {
        let metrics = DispatcherMetrics::new();
        metrics.add_claimed(3);
        metrics.incr_succeeded();
        metrics.incr_succeeded();
        metrics.incr_retried();
        metrics.incr_dead();

        let text = metrics.render();
        assert!(text.contains("# TYPE outboxd_events_claimed_total counter"));
        assert!(text.contains("outboxd_events_claimed_total 3"));
        assert!(text.contains("outboxd_events_succeeded_total 2"));
        assert!(text.contains("outboxd_events_retried_total 1"));
        assert!(text.contains("outboxd_events_dead_total 1"));
        assert!(text.contains("outboxd_db_connection_failures_total 0"));
    }
}
