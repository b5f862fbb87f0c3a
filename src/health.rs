//! Liveness probe for the dispatch pipeline.
//!
//! A ping unit travels the same queue the conversions use. A timely `"pong"`
//! proves the queue accepts work and at least one worker is draining it.

use crate::dispatch::{TaskDispatcher, PING_REPLY};
use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Body of the health endpoint, identical in shape for both outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Dependency name → `"connected"` or `"unknown"`.
    pub services: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

const DEPENDENCIES: [&str; 3] = ["dispatcher", "worker_pool", "job_store"];

/// Round-trips a ping through a [`TaskDispatcher`] under a fixed deadline.
#[derive(Clone)]
pub struct HealthProbe {
    dispatcher: Arc<dyn TaskDispatcher>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, timeout: Duration) -> Self {
        Self { dispatcher, timeout }
    }

    /// Never waits longer than the configured timeout.
    pub async fn check(&self) -> HealthReport {
        match self.round_trip().await {
            Ok(()) => report(HealthStatus::Healthy, "connected", None),
            Err(e) => {
                warn!("health probe failed: {e}");
                report(HealthStatus::Unhealthy, "unknown", Some(e.to_string()))
            }
        }
    }

    async fn round_trip(&self) -> Result<(), ServiceError> {
        let reply = tokio::time::timeout(self.timeout, self.dispatcher.ping())
            .await
            .map_err(|_| ServiceError::ProbeTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;
        if reply != PING_REPLY {
            return Err(ServiceError::ProbeMismatch { reply });
        }
        Ok(())
    }
}

fn report(status: HealthStatus, state: &str, detail: Option<String>) -> HealthReport {
    HealthReport {
        status,
        services: DEPENDENCIES
            .iter()
            .map(|name| (name.to_string(), state.to_string()))
            .collect(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ConversionTask;
    use async_trait::async_trait;

    enum Behaviour {
        Reply(&'static str),
        Hang,
        Down,
    }

    struct FakeDispatcher(Behaviour);

    #[async_trait]
    impl TaskDispatcher for FakeDispatcher {
        async fn enqueue(&self, _task: ConversionTask) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn ping(&self) -> Result<String, ServiceError> {
            match self.0 {
                Behaviour::Reply(r) => Ok(r.to_string()),
                Behaviour::Hang => std::future::pending().await,
                Behaviour::Down => Err(ServiceError::DispatchFailed {
                    reason: "queue is closed".into(),
                }),
            }
        }
    }

    fn probe(b: Behaviour) -> HealthProbe {
        HealthProbe::new(Arc::new(FakeDispatcher(b)), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn pong_is_healthy() {
        let r = probe(Behaviour::Reply("pong")).check().await;
        assert!(r.is_healthy());
        assert_eq!(r.services["dispatcher"], "connected");
        assert_eq!(r.services.len(), 3);
        assert!(r.detail.is_none());
    }

    #[tokio::test]
    async fn wrong_reply_is_unhealthy() {
        let r = probe(Behaviour::Reply("pang")).check().await;
        assert_eq!(r.status, HealthStatus::Unhealthy);
        assert!(r.detail.unwrap().contains("pang"));
    }

    #[tokio::test]
    async fn no_reply_times_out() {
        let start = std::time::Instant::now();
        let r = probe(Behaviour::Hang).check().await;
        assert_eq!(r.status, HealthStatus::Unhealthy);
        assert_eq!(r.services["worker_pool"], "unknown");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn closed_queue_is_unhealthy() {
        let r = probe(Behaviour::Down).check().await;
        assert!(!r.is_healthy());
    }

    #[test]
    fn report_wire_format() {
        let r = report(HealthStatus::Unhealthy, "unknown", None);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "unhealthy");
        assert_eq!(v["services"]["job_store"], "unknown");
    }
}
