//! The atomic unit of storage: `(id, vector, payload)` plus whatever
//! passthrough metadata the caller attached.

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
    /// Inconsistently populated upstream; carried through verbatim rather
    /// than modeled strongly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
            metadata: None,
        }
    }

    pub fn with_indexed_at(mut self, indexed_at: chrono::DateTime<chrono::Utc>) -> Self {
        self.metadata = Some(serde_json::json!({ "indexed_at": indexed_at.to_rfc3339() }));
        self
    }
}
