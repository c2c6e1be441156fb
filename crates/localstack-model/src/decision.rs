//! Build decision record

use serde::{Deserialize, Serialize};

/// Whether a build is required, and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDecision {
    pub required: bool,
    pub reasons: Vec<String>,
}

impl BuildDecision {
    /// Decision that no build is needed
    pub fn not_required() -> Self {
        Self::default()
    }

    /// Append a reason and mark the build required
    pub fn require(&mut self, reason: impl Into<String>) {
        self.required = true;
        self.reasons.push(reason.into());
    }
}
