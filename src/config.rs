use serde::Deserialize;
use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub url_model_path: String,
    pub dom_model_path: String,
    pub alpha_path: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            bind_addr: env::var("SUPARNA_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            url_model_path: env::var("SUPARNA_URL_MODEL")
                .unwrap_or_else(|_| "./models/url_model.json".to_string()),
            dom_model_path: env::var("SUPARNA_DOM_MODEL")
                .unwrap_or_else(|_| "./models/dom_model.json".to_string()),
            alpha_path: env::var("SUPARNA_ALPHA")
                .unwrap_or_else(|_| "./models/alpha.json".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct AlphaFile {
    alpha: f64,
}

/// Weight given to the URL model, read from a `{"alpha": x}` JSON file.
/// Unreadable or malformed sources default to 0.5; finite values are
/// clamped into [0, 1].
pub async fn load_alpha(path: &str) -> f64 {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => parse_alpha(&raw),
        Err(e) => {
            warn!("Failed to read blend weight from {}: {}, defaulting to 0.5", path, e);
            0.5
        }
    }
}

fn parse_alpha(raw: &str) -> f64 {
    match serde_json::from_str::<AlphaFile>(raw) {
        Ok(f) if f.alpha.is_finite() => f.alpha.clamp(0.0, 1.0),
        Ok(f) => {
            warn!("Non-finite blend weight {}, defaulting to 0.5", f.alpha);
            0.5
        }
        Err(e) => {
            warn!("Failed to parse blend weight config: {}, defaulting to 0.5", e);
            0.5
        }
    }
}
