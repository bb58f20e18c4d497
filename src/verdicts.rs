use dashmap::DashMap;

use crate::types::Verdict;

/// Last-verdict-per-session store. Writes for independent keys never
/// contend; a read racing a write for the same key sees either value
/// (last write wins — verdicts are advisory). Eviction policy is the
/// integrator's; `remove` is the session-end hook.
pub trait VerdictStore: Send + Sync {
    fn put(&self, session_id: &str, verdict: Verdict);
    fn get(&self, session_id: &str) -> Verdict;
    fn remove(&self, session_id: &str);
}

pub struct InMemoryVerdictStore {
    verdicts: DashMap<String, Verdict>,
}

impl InMemoryVerdictStore {
    pub fn new() -> Self {
        Self {
            verdicts: DashMap::new(),
        }
    }
}

impl Default for InMemoryVerdictStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictStore for InMemoryVerdictStore {
    fn put(&self, session_id: &str, verdict: Verdict) {
        self.verdicts.insert(session_id.to_string(), verdict);
    }

    fn get(&self, session_id: &str) -> Verdict {
        self.verdicts
            .get(session_id)
            .map(|v| v.clone())
            .unwrap_or_else(Verdict::unknown)
    }

    fn remove(&self, session_id: &str) {
        self.verdicts.remove(session_id);
    }
}
