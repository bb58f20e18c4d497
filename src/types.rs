use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::dom_features::DomDocument;

/// Named feature values. A key that is absent (or mapped to NaN) is the
/// distinct "missing" state the tree traversal routes through its default
/// branch — it is never coerced to zero.
pub type FeatureVector = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Label {
    Phishing,
    Safe,
    Uncertain,
    Unknown,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Phishing => "Phishing",
            Label::Safe => "Safe",
            Label::Uncertain => "Uncertain",
            Label::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub label: Label,
    pub probability: f64,
    pub p_url: f64,
    pub p_dom: f64,
}

impl Verdict {
    /// Verdict returned for a session no decision has been recorded for.
    pub fn unknown() -> Self {
        Self {
            label: Label::Unknown,
            probability: 0.0,
            p_url: 0.0,
            p_dom: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub url_features: FeatureVector,
    #[serde(default)]
    pub dom_features: Option<FeatureVector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub document: Option<DomDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub decision_id: Uuid,
    pub latency_ms: f64,
}
