use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::{ContextKey, StageId};

/// One stage output recorded in the context store. The payload is structured
/// data or file references, never raw binary content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub stage: StageId,
    pub key: ContextKey,
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(stage: StageId, key: ContextKey, payload: serde_json::Value) -> Self {
        Self {
            stage,
            key,
            payload,
            produced_at: Utc::now(),
        }
    }
}
