//! Saga state machine (persisted progress, no step logic).
//!
//! - A run walks an ordered step list forward, one action per step
//! - On the first failing action it flips to compensating and walks back
//! - Every transition is persisted before the next step runs
//!
//! Infra owns the step list and the executor; this module only defines the
//! state record and its legal transitions.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use ratewatch_core::SagaId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    InProgress,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SagaStatus::InProgress => "in_progress",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, SagaStatus::InProgress)
    }
}

impl FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SagaStatus::InProgress),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            other => Err(format!("unknown saga status '{other}'")),
        }
    }
}

impl core::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted progress of one saga run.
///
/// While `status` is `InProgress`, `current_step` is the index of the step to run
/// (or compensate) next. Terminal states are never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaState {
    pub id: SagaId,
    pub current_step: usize,
    /// Subject address as submitted; validating it is the first step's job.
    pub email: String,
    pub is_compensating: bool,
    pub status: SagaStatus,
}

impl SagaState {
    pub fn start(email: impl Into<String>) -> Self {
        Self {
            id: SagaId::new(),
            current_step: 0,
            email: email.into(),
            is_compensating: false,
            status: SagaStatus::InProgress,
        }
    }

    /// Forward progress after a successful action.
    pub fn advance(&mut self) {
        debug_assert!(!self.status.is_terminal() && !self.is_compensating);
        self.current_step += 1;
    }

    /// Switch to unwinding after `current_step`'s action failed.
    ///
    /// The failed step did not take effect, so unwinding starts at the step
    /// below it. Returns `false` when there is nothing below to unwind.
    pub fn begin_compensation(&mut self) -> bool {
        debug_assert!(!self.status.is_terminal());
        self.is_compensating = true;
        self.step_back()
    }

    /// Move one step down while compensating. Returns `false` once the bottom
    /// of the list has been passed.
    pub fn step_back(&mut self) -> bool {
        match self.current_step.checked_sub(1) {
            Some(prev) => {
                self.current_step = prev;
                true
            }
            None => false,
        }
    }

    pub fn complete(&mut self) {
        self.status = SagaStatus::Completed;
    }

    pub fn fail(&mut self) {
        self.status = SagaStatus::Failed;
    }
}
