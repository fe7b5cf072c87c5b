//! Reconciliation of remote listings with local ordering.

use std::sync::{Mutex, PoisonError};

use protocol::{CapabilitySnapshot, RemoteHost, Result, Session, SessionType};

use super::parser::parse_listing;
use super::probe::{run_probe, CapabilityProber, ProbeReport};
use super::registry::{apply_manual_order, dedupe};

/// A fully reconciled view, ready to be swapped into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Sessions in display order.
    pub sessions: Vec<Session>,
    /// Capabilities reported by the same round trip.
    pub capabilities: CapabilitySnapshot,
}

/// Fetches remote state in one round trip and merges it with the
/// persisted manual order.
#[derive(Debug, Default)]
pub struct Reconciler {
    prober: Mutex<CapabilityProber>,
}

impl Reconciler {
    /// Creates a reconciler with an empty timezone cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized server timezone offset, once known.
    pub fn timezone_offset(&self) -> Option<i32> {
        self.prober
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timezone_offset()
    }

    /// Runs the probe over `connection_id` and reconciles the result.
    pub async fn fetch(
        &self,
        host: &dyn RemoteHost,
        connection_id: &str,
        order: &[String],
    ) -> Result<Reconciled> {
        let output = run_probe(host, connection_id).await?;
        let report = self
            .prober
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .interpret(&output);

        Ok(reconcile(report, order))
    }
}

/// Parses both listings, drops duplicates and applies the manual order.
pub fn reconcile(report: ProbeReport, order: &[String]) -> Reconciled {
    let candidates: Vec<Session> = SessionType::ALL
        .iter()
        .flat_map(|t| parse_listing(*t, report.sections.listing(*t)))
        .collect();

    let sessions = apply_manual_order(dedupe(candidates), order);
    tracing::debug!(
        sessions = sessions.len(),
        screen = report.capabilities.screen_available,
        tmux = report.capabilities.tmux_available,
        "Reconciled remote listing"
    );

    Reconciled {
        sessions,
        capabilities: report.capabilities,
    }
}
