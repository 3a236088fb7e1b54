//! Billing reconciliation at session end
//!
//! Elapsed time since the second participant joined is capped at the session
//! maximum and submitted once. Failures are reported, never retried.

mod client;

pub use client::HttpBillingClient;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::SessionResult;

/// Body of `POST /billing/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub cost_bearer: String,
    pub appointment_id: String,
    #[serde(rename = "expertise")]
    pub expertise_level: String,
    pub seconds_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BillingOutcome {
    Submitted { seconds_used: u64 },
    /// Two participants were never present
    Skipped,
    Failed { message: String },
    /// A record was already submitted for this session
    Duplicate,
}

#[async_trait::async_trait]
pub trait BillingSubmitter: Send + Sync {
    async fn submit(&self, record: &BillingRecord) -> SessionResult<()>;
}

/// Whole seconds billed for `elapsed`, never more than `cap`
pub fn seconds_used(elapsed: Duration, cap: Duration) -> u64 {
    elapsed.min(cap).as_secs()
}

pub struct BillingReconciler {
    submitter: Arc<dyn BillingSubmitter>,
    cost_bearer: String,
    expertise_level: String,
    cap: Duration,
    submitted: AtomicBool,
}

impl BillingReconciler {
    pub fn new(
        submitter: Arc<dyn BillingSubmitter>,
        cost_bearer: impl Into<String>,
        expertise_level: impl Into<String>,
        cap: Duration,
    ) -> Self {
        Self {
            submitter,
            cost_bearer: cost_bearer.into(),
            expertise_level: expertise_level.into(),
            cap,
            submitted: AtomicBool::new(false),
        }
    }

    /// Build the record from the timer start; `None` if it never started
    pub fn prepare(
        &self,
        appointment_id: &str,
        started: Option<Instant>,
        now: Instant,
    ) -> Option<BillingRecord> {
        let started = started?;
        Some(BillingRecord {
            cost_bearer: self.cost_bearer.clone(),
            appointment_id: appointment_id.to_string(),
            expertise_level: self.expertise_level.clone(),
            seconds_used: seconds_used(now.saturating_duration_since(started), self.cap),
        })
    }

    /// Submit at most once per reconciler
    pub async fn reconcile(&self, record: Option<BillingRecord>) -> BillingOutcome {
        let Some(record) = record else {
            info!("Session never reached two participants, nothing to bill");
            return BillingOutcome::Skipped;
        };

        if self.submitted.swap(true, Ordering::SeqCst) {
            return BillingOutcome::Duplicate;
        }

        info!(
            "Submitting billing for appointment {}: {}s",
            record.appointment_id, record.seconds_used
        );

        match self.submitter.submit(&record).await {
            Ok(()) => BillingOutcome::Submitted {
                seconds_used: record.seconds_used,
            },
            Err(e) => {
                error!("Billing submission failed: {}", e);
                BillingOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}
