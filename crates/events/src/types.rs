//! Event types for the Carousel status/log stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the run's event sequence, starting at 0
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(sequence: u64, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All events a pipeline run can emit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run lifecycle
    /// The engine accepted the run and is about to prepare artifacts
    RunStarted {
        run_id: Uuid,
        topic: String,
        stage_count: usize,
    },

    /// Output files from a previous run were removed
    ArtifactsCleared { run_id: Uuid, removed: Vec<String> },

    /// Every stage completed
    RunCompleted { run_id: Uuid, artifacts: Vec<String> },

    /// The run stopped on a fatal error
    RunFailed {
        run_id: Uuid,
        stage: Option<String>,
        error_kind: String,
        message: String,
    },

    /// The run stopped on a rejection or cancellation signal
    RunCancelled {
        run_id: Uuid,
        stage: Option<String>,
        reason: String,
    },

    // Stage lifecycle
    StageStarted {
        run_id: Uuid,
        stage: String,
        index: usize,
    },

    StageCompleted {
        run_id: Uuid,
        stage: String,
        output_key: String,
        duration_ms: u64,
    },

    /// A file was atomically written to its final path
    ArtifactCommitted {
        run_id: Uuid,
        stage: String,
        name: String,
        path: String,
    },

    // Approval checkpoints
    ApprovalRequested {
        run_id: Uuid,
        request_id: Uuid,
        stage: String,
        prompt: String,
        deadline: Option<DateTime<Utc>>,
    },

    /// A reply matched no accepted token; the request is still pending
    ApprovalReprompted {
        run_id: Uuid,
        request_id: Uuid,
        reply: String,
    },

    ApprovalResolved {
        run_id: Uuid,
        request_id: Uuid,
        stage: String,
        resolution: String,
    },

    // Tool calls
    /// A transient tool failure is being retried after a backoff
    ToolRetry {
        run_id: Uuid,
        stage: String,
        tool: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
}

impl Event {
    /// Get the run ID associated with this event
    pub fn run_id(&self) -> Uuid {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::ArtifactsCleared { run_id, .. }
            | Event::RunCompleted { run_id, .. }
            | Event::RunFailed { run_id, .. }
            | Event::RunCancelled { run_id, .. }
            | Event::StageStarted { run_id, .. }
            | Event::StageCompleted { run_id, .. }
            | Event::ArtifactCommitted { run_id, .. }
            | Event::ApprovalRequested { run_id, .. }
            | Event::ApprovalReprompted { run_id, .. }
            | Event::ApprovalResolved { run_id, .. }
            | Event::ToolRetry { run_id, .. } => *run_id,
        }
    }

    /// Whether this event ends the run's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::RunCompleted { .. } | Event::RunFailed { .. } | Event::RunCancelled { .. }
        )
    }

    /// Snake-case event name as it appears in the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Event::RunStarted { .. } => "run_started",
            Event::ArtifactsCleared { .. } => "artifacts_cleared",
            Event::RunCompleted { .. } => "run_completed",
            Event::RunFailed { .. } => "run_failed",
            Event::RunCancelled { .. } => "run_cancelled",
            Event::StageStarted { .. } => "stage_started",
            Event::StageCompleted { .. } => "stage_completed",
            Event::ArtifactCommitted { .. } => "artifact_committed",
            Event::ApprovalRequested { .. } => "approval_requested",
            Event::ApprovalReprompted { .. } => "approval_reprompted",
            Event::ApprovalResolved { .. } => "approval_resolved",
            Event::ToolRetry { .. } => "tool_retry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let event = Event::RunStarted {
            run_id: Uuid::new_v4(),
            topic: "Test topic".to_string(),
            stage_count: 5,
        };
        let envelope = EventEnvelope::new(7, event);

        assert!(!envelope.id.is_nil());
        assert_eq!(envelope.sequence, 7);
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::StageStarted {
            run_id: Uuid::new_v4(),
            stage: "research".to_string(),
            index: 0,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stage_started\""));
        assert!(json.contains("\"stage\":\"research\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"approval_resolved","run_id":"550e8400-e29b-41d4-a716-446655440000","request_id":"550e8400-e29b-41d4-a716-446655440001","stage":"document_assembly","resolution":"approved"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::ApprovalResolved {
                stage, resolution, ..
            } => {
                assert_eq!(stage, "document_assembly");
                assert_eq!(resolution, "approved");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_name_matches_serialized_tag() {
        let event = Event::ToolRetry {
            run_id: Uuid::new_v4(),
            stage: "visual_design".to_string(),
            tool: "generate_image".to_string(),
            attempt: 1,
            max_attempts: 3,
            delay_ms: 500,
            error: "rate limited".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.name());
    }

    #[test]
    fn test_terminal_events() {
        let run_id = Uuid::new_v4();
        assert!(Event::RunCompleted {
            run_id,
            artifacts: vec![]
        }
        .is_terminal());
        assert!(Event::RunCancelled {
            run_id,
            stage: None,
            reason: "user".to_string()
        }
        .is_terminal());
        assert!(!Event::StageStarted {
            run_id,
            stage: "research".to_string(),
            index: 0
        }
        .is_terminal());
        assert_eq!(
            Event::ArtifactsCleared {
                run_id,
                removed: vec![]
            }
            .run_id(),
            run_id
        );
    }
}
