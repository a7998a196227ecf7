use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::stage::StageId;

/// A named output file produced by a stage and exposed outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub produced_by: StageId,
}

impl Artifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, produced_by: StageId) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            produced_by,
        }
    }
}
