use moka::future::Cache;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::Ensemble;

/// Loads and memoizes model artifacts for the process lifetime. Concurrent
/// callers arriving while a load is in flight share the same load and the
/// same resulting ensemble — no duplicate reads, no stampede.
pub struct ModelStore {
    cache: Cache<String, Arc<Ensemble>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().max_capacity(16).build(),
        }
    }

    /// Load the artifact at `path` against the given feature ordering.
    /// Unreadable artifacts degrade to the empty ensemble (diagnostic only).
    pub async fn load(&self, path: &str, expected_names: &'static [&'static str]) -> Arc<Ensemble> {
        let owned = path.to_string();
        self.cache
            .get_with(path.to_string(), async move {
                let ensemble = match tokio::fs::read_to_string(&owned).await {
                    Ok(raw) => Ensemble::from_json(&raw, expected_names),
                    Err(e) => {
                        warn!("Failed to read model artifact {}: {}, using empty ensemble", owned, e);
                        Ensemble::empty(expected_names)
                    }
                };
                info!("Loaded model artifact {} ({} trees)", owned, ensemble.len());
                Arc::new(ensemble)
            })
            .await
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}
