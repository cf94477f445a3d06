//! Admission control for the acceleration backend's memory.
//!
//! ```text
//!  usage ──► utilization > critical? ──yes──► reclaim ──► still critical? ──yes──► grow
//!                 │                                │                              │
//!                 no                               no                      refused → deny
//!                 ▼                                ▼                              ▼
//!           estimate(n) ◄──────────────────────────┴──────────────────────────────┘
//!                 │
//!       would not fit → reclaim, re-estimate → still not → deny
//!       recommendation = use_reference        → deny
//!       otherwise                             → admit
//! ```
//!
//! Every decision carries an action tag. Snapshots are re-queried on every
//! call; the last one is kept for display only. The reference path never
//! goes through the guard.

use logflow_core::{AccelerationBackend, MemorySnapshot, Recommendation};
use serde::Serialize;

use crate::config::MemoryGuardConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    SufficientMemory,
    ProceedAfterReclaim,
    ProceedAfterGrowth,
    InsufficientMemoryPostReclaim,
    RecommendationFallback,
    GrowthFailed,
    BackendUnavailable,
}

impl GuardAction {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardAction::SufficientMemory => "sufficient_memory",
            GuardAction::ProceedAfterReclaim => "proceed_after_reclaim",
            GuardAction::ProceedAfterGrowth => "proceed_after_growth",
            GuardAction::InsufficientMemoryPostReclaim => "insufficient_memory_post_reclaim",
            GuardAction::RecommendationFallback => "recommendation_fallback",
            GuardAction::GrowthFailed => "growth_failed",
            GuardAction::BackendUnavailable => "backend_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuardDecision {
    pub ok: bool,
    pub action: GuardAction,
}

impl GuardDecision {
    fn admit(action: GuardAction) -> Self {
        Self { ok: true, action }
    }

    fn deny(action: GuardAction) -> Self {
        Self { ok: false, action }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GuardStats {
    pub admitted: u64,
    pub denied: u64,
    pub reclaims: u64,
    pub growths: u64,
}

#[derive(Debug)]
pub struct MemoryGuard {
    config: MemoryGuardConfig,
    last_snapshot: Option<MemorySnapshot>,
    stats: GuardStats,
}

impl MemoryGuard {
    pub fn new(config: MemoryGuardConfig) -> Self {
        Self {
            config,
            last_snapshot: None,
            stats: GuardStats::default(),
        }
    }

    pub fn can_proceed(&mut self, backend: &mut dyn AccelerationBackend, n: usize) -> GuardDecision {
        let decision = self.evaluate(backend, n);
        if decision.ok {
            self.stats.admitted += 1;
        } else {
            self.stats.denied += 1;
            log::debug!("Memory guard denied {n} entries: {}", decision.action.as_str());
        }
        decision
    }

    fn evaluate(&mut self, backend: &mut dyn AccelerationBackend, n: usize) -> GuardDecision {
        let mut snapshot = self.observe(backend);
        if !snapshot.available {
            return GuardDecision::deny(GuardAction::BackendUnavailable);
        }

        let mut action = GuardAction::SufficientMemory;
        let mut reclaimed = false;

        if snapshot.utilization > self.config.critical_utilization {
            self.reclaim(backend);
            reclaimed = true;
            snapshot = self.observe(backend);
            action = GuardAction::ProceedAfterReclaim;

            if snapshot.utilization > self.config.critical_utilization {
                let wanted = backend
                    .estimate_memory_for(n)
                    .estimated_bytes
                    .max(snapshot.total_bytes / 4)
                    .min(self.config.max_growth_bytes);
                if !backend.grow_capacity(wanted) {
                    return GuardDecision::deny(GuardAction::GrowthFailed);
                }
                self.stats.growths += 1;
                self.observe(backend);
                action = GuardAction::ProceedAfterGrowth;
            }
        }

        let mut estimate = backend.estimate_memory_for(n);
        if !estimate.would_fit {
            if reclaimed {
                return GuardDecision::deny(GuardAction::InsufficientMemoryPostReclaim);
            }
            self.reclaim(backend);
            self.observe(backend);
            estimate = backend.estimate_memory_for(n);
            if !estimate.would_fit {
                return GuardDecision::deny(GuardAction::InsufficientMemoryPostReclaim);
            }
            action = GuardAction::ProceedAfterReclaim;
        }

        if estimate.recommendation == Recommendation::UseReference {
            return GuardDecision::deny(GuardAction::RecommendationFallback);
        }
        GuardDecision::admit(action)
    }

    /// Scheduled check: reclaim when utilization sits above the critical
    /// mark. Returns `true` if a reclaim ran.
    pub fn periodic_check(&mut self, backend: &mut dyn AccelerationBackend) -> bool {
        let snapshot = self.observe(backend);
        if !snapshot.available || snapshot.utilization <= self.config.critical_utilization {
            return false;
        }
        log::info!(
            "Backend utilization at {:.0}%, reclaiming",
            snapshot.utilization * 100.0
        );
        self.reclaim(backend);
        self.observe(backend);
        true
    }

    pub fn is_under_pressure(&self, snapshot: &MemorySnapshot) -> bool {
        snapshot.available && snapshot.utilization > self.config.pressure_utilization
    }

    /// Most recent snapshot. For display; admission always re-queries.
    pub fn last_snapshot(&self) -> Option<MemorySnapshot> {
        self.last_snapshot
    }

    pub fn stats(&self) -> GuardStats {
        self.stats
    }

    fn observe(&mut self, backend: &dyn AccelerationBackend) -> MemorySnapshot {
        let snapshot = backend.memory_usage();
        self.last_snapshot = Some(snapshot);
        snapshot
    }

    fn reclaim(&mut self, backend: &mut dyn AccelerationBackend) {
        backend.reclaim();
        self.stats.reclaims += 1;
    }
}
