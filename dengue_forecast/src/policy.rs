//! Commit decisions for freshly trained models

use crate::config::CommitPolicyKind;
use serde::{Deserialize, Serialize};
use series_math::RegressionMetrics;

/// Whether a trained model replaces the committed one, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitDecision {
    pub commit: bool,
    pub reason: String,
}

impl CommitDecision {
    pub fn accept(reason: impl Into<String>) -> Self {
        Self {
            commit: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            commit: false,
            reason: reason.into(),
        }
    }
}

/// Decides between a new model and the one currently committed
pub trait CommitPolicy: Send + Sync {
    /// `previous` is `None` when nothing is committed for the location yet
    fn decide(&self, new: &RegressionMetrics, previous: Option<&RegressionMetrics>)
        -> CommitDecision;
}

impl<F> CommitPolicy for F
where
    F: Fn(&RegressionMetrics, Option<&RegressionMetrics>) -> CommitDecision + Send + Sync,
{
    fn decide(
        &self,
        new: &RegressionMetrics,
        previous: Option<&RegressionMetrics>,
    ) -> CommitDecision {
        self(new, previous)
    }
}

/// Commit every successfully trained model
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCommit;

impl CommitPolicy for AlwaysCommit {
    fn decide(&self, _new: &RegressionMetrics, _previous: Option<&RegressionMetrics>) -> CommitDecision {
        CommitDecision::accept("New model trained successfully")
    }
}

/// Commit when R² does not get worse, or when it stays within
/// `r2_tolerance` of the previous R² and RMSE improves
#[derive(Debug, Clone, Copy)]
pub struct CompareMetrics {
    pub r2_tolerance: f64,
}

impl Default for CompareMetrics {
    fn default() -> Self {
        Self { r2_tolerance: 0.95 }
    }
}

impl CommitPolicy for CompareMetrics {
    fn decide(
        &self,
        new: &RegressionMetrics,
        previous: Option<&RegressionMetrics>,
    ) -> CommitDecision {
        let prev = match previous {
            Some(prev) => prev,
            None => return CommitDecision::accept("No existing model to compare against"),
        };

        let better = new.r2 >= prev.r2;
        let comparable = new.r2 >= prev.r2 * self.r2_tolerance && new.rmse < prev.rmse;
        if better || comparable {
            CommitDecision::accept("New model has better or comparable performance metrics")
        } else {
            CommitDecision::reject("New model metrics are worse than existing model")
        }
    }
}

/// Build the policy named in the settings
pub fn from_kind(kind: CommitPolicyKind) -> Box<dyn CommitPolicy> {
    match kind {
        CommitPolicyKind::Always => Box::new(AlwaysCommit),
        CommitPolicyKind::CompareMetrics => Box::new(CompareMetrics::default()),
    }
}
