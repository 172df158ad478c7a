use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Pipeline stage a job is currently in.
///
/// `pending → processing → reconstructed → complete`, with `failed` reachable
/// from any non-terminal state. `complete` and `failed` are terminal.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Reconstructed,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Reconstructed => "reconstructed",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Processing, Reconstructed) => true,
            (Reconstructed, Complete) => true,
            (Pending | Processing | Reconstructed, Failed) => true,
            _ => false,
        }
    }

    /// States from which a transition into `next` is allowed.
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Reconstructed,
            JobStatus::Complete,
            JobStatus::Failed,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }
}

/// Derived measurements of a reconstructed pile.
///
/// Kept as one value so the five fields are always present or absent together.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Measurements {
    /// Cubic metres
    pub volume: f64,
    /// Metres along X
    pub length: f64,
    /// Metres along Y
    pub width: f64,
    /// Metres along Z
    pub height: f64,
    /// Kilograms
    pub weight: f64,
}

/// Reason recorded with a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReason {
    pub code: String,
    pub message: String,
}

/// A coal pile measurement job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PileJob {
    pub id: Uuid,
    pub user_id: i64,
    pub status: JobStatus,
    pub model_path: Option<String>,
    #[serde(flatten)]
    pub measurements: Option<Measurements>,
    pub error: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PileJob {
    pub fn new(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: JobStatus::Pending,
            model_path: None,
            measurements: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_happy_path_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Reconstructed));
        assert!(JobStatus::Reconstructed.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Reconstructed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Complete));
        assert!(!JobStatus::Reconstructed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Reconstructed,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            assert!(!JobStatus::Failed.can_transition_to(next));
            assert!(!JobStatus::Complete.can_transition_to(next));
        }
    }

    #[test]
    fn test_failed_predecessors() {
        assert_eq!(
            JobStatus::predecessors(JobStatus::Failed),
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Reconstructed
            ]
        );
        assert_eq!(
            JobStatus::predecessors(JobStatus::Complete),
            vec![JobStatus::Reconstructed]
        );
    }

    #[test]
    fn test_status_string_round_trip() {
        assert_eq!(JobStatus::Reconstructed.to_string(), "reconstructed");
        assert_eq!(
            JobStatus::from_str("complete").unwrap(),
            JobStatus::Complete
        );
        assert!(JobStatus::from_str("completed").is_err());
    }

    #[test]
    fn test_measurements_serialize_flat() {
        let mut job = PileJob::new(1);
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("volume").is_none());

        job.measurements = Some(Measurements {
            volume: 12.5,
            length: 5.0,
            width: 2.5,
            height: 1.0,
            weight: 16250.0,
        });
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["volume"], 12.5);
        assert_eq!(json["weight"], 16250.0);
        assert_eq!(json["status"], "pending");
    }
}
