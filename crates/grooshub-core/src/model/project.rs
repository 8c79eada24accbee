use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clamp_confidence;

/// What the assistant knows about one project: hard numbers that were
/// stated explicitly and softer, confidence-scored context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMemory {
    pub project_id: String,
    pub org_id: String,
    /// e.g. `gross_floor_area_m2 = 12500`, `dwelling_count = 140`.
    pub hard_values: BTreeMap<String, f64>,
    pub soft_context: Vec<SoftContextEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectMemory {
    pub fn new(project_id: String, org_id: String) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            org_id,
            hard_values: BTreeMap::new(),
            soft_context: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hard_values.is_empty() && self.soft_context.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftContextEntry {
    pub id: Uuid,
    pub category: SoftContextCategory,
    pub text: String,
    pub confidence: f32,
    pub source_chat_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SoftContextEntry {
    pub fn new(category: SoftContextCategory, text: String, confidence: f32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            category,
            text,
            confidence: clamp_confidence(confidence),
            source_chat_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_source_chat(mut self, chat_id: Option<Uuid>) -> Self {
        self.source_chat_id = chat_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftContextCategory {
    Preference,
    Constraint,
    Goal,
    Decision,
    Note,
}

impl std::fmt::Display for SoftContextCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preference => write!(f, "preference"),
            Self::Constraint => write!(f, "constraint"),
            Self::Goal => write!(f, "goal"),
            Self::Decision => write!(f, "decision"),
            Self::Note => write!(f, "note"),
        }
    }
}

impl std::str::FromStr for SoftContextCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "constraint" => Ok(Self::Constraint),
            "goal" => Ok(Self::Goal),
            "decision" => Ok(Self::Decision),
            "note" => Ok(Self::Note),
            _ => Err(format!("unknown soft context category: {s}")),
        }
    }
}

/// Changes to apply to a [`ProjectMemory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectDelta {
    #[serde(default)]
    pub hard_values: BTreeMap<String, f64>,
    #[serde(default)]
    pub soft_context: Vec<SoftContextEntry>,
}

impl ProjectDelta {
    pub fn is_empty(&self) -> bool {
        self.hard_values.is_empty() && self.soft_context.is_empty()
    }
}
