// Per-component health flags and the registry the liveness endpoint reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-writer health bit. Starts unhealthy until the owner observes success.
#[derive(Debug, Default)]
pub struct HealthFlag(AtomicBool);

impl HealthFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A component that reports whether its primary duty is currently succeeding.
pub trait HealthCheck: Send + Sync {
    /// Used in logs only; never exposed by the liveness endpoint.
    fn name(&self) -> &'static str;
    fn is_healthy(&self) -> bool;
}

/// Fixed set of health checks, aggregated into one pass/fail signal.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checks: Arc<Vec<Arc<dyn HealthCheck>>>,
}

impl HealthRegistry {
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        Self {
            checks: Arc::new(checks),
        }
    }

    /// True when every registered check reports healthy (vacuously true when empty).
    pub fn is_healthy(&self) -> bool {
        let mut healthy = true;
        for check in self.checks.iter() {
            if !check.is_healthy() {
                tracing::debug!(component = check.name(), "component unhealthy");
                healthy = false;
            }
        }
        healthy
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
