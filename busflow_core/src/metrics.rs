//! Tracker Metrics Module
//! ======================
//!
//! Per-cycle and lifetime counters for the reconciliation loop:
//! - **CycleReport**: what one feed batch did to the registry
//! - **FrameSummary**: what one animation frame did to the tweens
//! - **TrackerStats**: running totals across every cycle
//!
//! All three are plain data and serialize to JSON for the simulation export.

use crate::registry::{Eviction, EvictionReason};
use crate::validation::Rejection;
use serde::{Deserialize, Serialize};

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Records in the batch as received
    pub records: usize,
    /// Records that passed validation
    pub accepted: usize,
    pub created: usize,
    pub updated: usize,
    /// Accepted records whose identity appeared earlier in the same batch
    pub duplicates: usize,

    pub missing_identity: usize,
    pub missing_route: usize,
    pub malformed_coordinates: usize,

    /// Entities removed by this cycle's sweep
    pub evicted: Vec<Eviction>,

    /// Batch was identical to the previous one; reconciliation skipped
    pub skipped_identical: bool,

    /// Registry size after the cycle
    pub tracked: usize,
}

impl CycleReport {
    pub fn record_rejection(&mut self, reason: Rejection) {
        match reason {
            Rejection::MissingIdentity => self.missing_identity += 1,
            Rejection::MissingRoute => self.missing_route += 1,
            Rejection::MalformedCoordinates => self.malformed_coordinates += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.missing_identity + self.missing_route + self.malformed_coordinates
    }

    pub fn evicted_for(&self, reason: EvictionReason) -> usize {
        self.evicted.iter().filter(|e| e.reason == reason).count()
    }
}

/// Outcome of one animation frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub advanced: usize,
    pub completed: usize,
    pub halted: usize,
}

/// Lifetime totals, folded from every `CycleReport`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub cycles: u64,
    pub empty_cycles: u64,
    pub skipped_cycles: u64,
    pub frames: u64,

    pub records: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub created: u64,
    pub updated: u64,
    pub duplicates: u64,

    pub evicted_expired: u64,
    pub evicted_inconsistent: u64,

    /// Largest registry size seen after any cycle
    pub peak_tracked: usize,
}

impl TrackerStats {
    pub fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        if report.records == 0 {
            self.empty_cycles += 1;
        }
        if report.skipped_identical {
            self.skipped_cycles += 1;
        }
        self.records += report.records as u64;
        self.accepted += report.accepted as u64;
        self.rejected += report.rejected() as u64;
        self.created += report.created as u64;
        self.updated += report.updated as u64;
        self.duplicates += report.duplicates as u64;
        self.evicted_expired += report.evicted_for(EvictionReason::GraceExpired) as u64;
        self.evicted_inconsistent += report.evicted_for(EvictionReason::Inconsistent) as u64;
        self.peak_tracked = self.peak_tracked.max(report.tracked);
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    /// Fraction of received records that were rejected, 0 when none arrived.
    pub fn rejection_rate(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            self.rejected as f64 / self.records as f64
        }
    }

    pub fn total_evicted(&self) -> u64 {
        self.evicted_expired + self.evicted_inconsistent
    }
}
