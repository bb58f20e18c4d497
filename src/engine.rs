use std::sync::Arc;
use tracing::warn;

use crate::dom_features::extract_dom_features;
use crate::error::AppError;
use crate::model::Ensemble;
use crate::types::{AnalyzeRequest, Label, ScoreRequest, Verdict};
use crate::url_features::UrlFeatureExtractor;
use crate::verdicts::{InMemoryVerdictStore, VerdictStore};

/// Probability substituted when the DOM branch is unavailable (no features,
/// or the DOM ensemble faulted). The trained system's constant is 0.55, not
/// the mathematically neutral 0.5; preserving it keeps output bit-compatible.
pub const DOM_FALLBACK_PROBABILITY: f64 = 0.55;

/// Single decision threshold for the combined probability.
pub const PHISHING_THRESHOLD: f64 = 0.71;

pub struct ScoringEngine {
    url_extractor: UrlFeatureExtractor,
    url_model: Arc<Ensemble>,
    dom_model: Arc<Ensemble>,
    alpha: f64,
    verdicts: InMemoryVerdictStore,
}

impl ScoringEngine {
    pub fn new(url_model: Arc<Ensemble>, dom_model: Arc<Ensemble>, alpha: f64) -> Self {
        Self {
            url_extractor: UrlFeatureExtractor::new(),
            url_model,
            dom_model,
            alpha,
            verdicts: InMemoryVerdictStore::new(),
        }
    }

    /// Blend the per-model probabilities. Both inputs must already be finite
    /// values in [0, 1]; violations are caller defects, not clamped here.
    pub fn combine(p_url: f64, p_dom: f64, alpha: f64) -> f64 {
        debug_assert!(p_url.is_finite() && (0.0..=1.0).contains(&p_url));
        debug_assert!(p_dom.is_finite() && (0.0..=1.0).contains(&p_dom));
        debug_assert!((0.0..=1.0).contains(&alpha));
        alpha * p_url + (1.0 - alpha) * p_dom
    }

    pub fn label_for(probability: f64) -> Label {
        if probability >= PHISHING_THRESHOLD {
            Label::Phishing
        } else {
            Label::Safe
        }
    }

    /// Score a pre-extracted feature payload.
    ///
    /// A URL-model fault is treated as model-unavailable (probability 0.5);
    /// a DOM-model fault or absent DOM features takes the fixed 0.55
    /// fallback. Neither propagates a failure.
    pub fn score(&self, request: &ScoreRequest) -> Verdict {
        let p_url = match self.url_model.score(&request.url_features) {
            Ok(p) => p,
            Err(e) => {
                warn!("URL model evaluation failed: {}", e);
                0.5
            }
        };

        let p_dom = match &request.dom_features {
            Some(feats) => match self.dom_model.score(feats) {
                Ok(p) => p,
                Err(e) => {
                    warn!("DOM model evaluation failed: {}", e);
                    DOM_FALLBACK_PROBABILITY
                }
            },
            None => DOM_FALLBACK_PROBABILITY,
        };

        let p_final = Self::combine(p_url, p_dom, self.alpha);
        let verdict = Verdict {
            label: Self::label_for(p_final),
            probability: p_final,
            p_url,
            p_dom,
        };

        if let Some(session_id) = &request.session_id {
            self.verdicts.put(session_id, verdict.clone());
        }

        verdict
    }

    /// Full pipeline for a raw URL and an optional document tree: extract
    /// both feature vectors, then score. URL extraction failure is the
    /// caller's error; DOM extraction failure is recovered via the fallback.
    pub fn analyze(&self, request: &AnalyzeRequest) -> Result<Verdict, AppError> {
        // Observers score the location without its query or fragment
        let page_url = request
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or(&request.url);

        let url_features = self.url_extractor.extract(page_url)?;
        let dom_features = request.document.as_ref().and_then(|doc| {
            let feats = extract_dom_features(doc, page_url);
            if feats.is_none() {
                warn!("DOM features unavailable for {}", page_url);
            }
            feats
        });

        Ok(self.score(&ScoreRequest {
            session_id: request.session_id.clone(),
            url_features,
            dom_features,
        }))
    }

    pub fn verdict_for(&self, session_id: &str) -> Verdict {
        self.verdicts.get(session_id)
    }

    pub fn end_session(&self, session_id: &str) {
        self.verdicts.remove(session_id);
    }
}
