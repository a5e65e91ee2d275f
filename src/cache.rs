//! Variable cache: latest value per keyword, with per-entry timestamp
//! (spec §3, §4.1).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalogue::{Catalogue, NetworkMode};

/// One cached variable: its value, the mode it was cached under, and when
/// it was last written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Most recent value seen for this keyword.
    pub value: String,
    /// Monotonic (per keyword) update timestamp, milliseconds since epoch.
    pub last_updated: u64,
    /// Mode this keyword was resolved to at the time of the write.
    pub mode: NetworkMode,
}

/// In-memory cache mapping keyword → latest value.
///
/// Never holds a pure-DELTA or BIGMOM/MCPMOM keyword (spec §3 invariant):
/// [`Cache::put`] is a no-op for those. Mutated only from the router core
/// task (spec §5).
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<String, CacheEntry>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Cache {
        Cache::default()
    }

    /// Insert or update a cached value. Pure-DELTA keywords are silently
    /// dropped, never stored, per the cache's core invariant.
    pub fn put(&mut self, keyword: &str, value: String, mode: NetworkMode) {
        if !mode.is_cacheable() {
            return;
        }
        let last_updated = match self.entries.get(keyword) {
            // `last_updated` must be monotonic per keyword even if the
            // wall clock doesn't advance between two updates in the same ms.
            Some(prev) => now_millis().max(prev.last_updated + 1),
            None => now_millis(),
        };
        self.entries.insert(
            keyword.to_string(),
            CacheEntry {
                value,
                last_updated,
                mode,
            },
        );
    }

    /// Look up a cached value.
    pub fn get(&self, keyword: &str) -> Option<&CacheEntry> {
        self.entries.get(keyword)
    }

    /// Remove everything cached. The router core never calls this on
    /// upstream disconnect (spec §4.4 — stale values beat no values), but
    /// operator tooling or tests may want a clean slate.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether any entry is cached for this keyword.
    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.contains_key(keyword)
    }

    /// Snapshot the cache in catalogue-declared order, for welcome replay
    /// and the `bang` reply. Only returns entries actually present in the
    /// cache; unseen keywords are skipped.
    pub fn snapshot_ordered<'a>(&'a self, catalogue: &'a Catalogue) -> Vec<(&'a str, &'a CacheEntry)> {
        catalogue
            .order()
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k.as_str(), e)))
            .collect()
    }

    /// Same as [`Cache::snapshot_ordered`] but restricted to non-pure-DELTA
    /// entries whose mode is replayable in a general welcome/`bang` walk.
    pub fn snapshot_replayable<'a>(&'a self, catalogue: &'a Catalogue) -> Vec<(&'a str, &'a CacheEntry)> {
        self.snapshot_ordered(catalogue)
            .into_iter()
            .filter(|(_, e)| e.mode.is_replayable())
            .collect()
    }

    /// Serialize the whole cache to a JSON-friendly map, for the optional
    /// disk snapshot (spec §6, SPEC_FULL §A.6).
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.value.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::NetworkMode;

    fn catalogue_with(order: &[(&str, NetworkMode)]) -> Catalogue {
        let mut text = String::new();
        for (k, m) in order {
            let mode_str = match m {
                NetworkMode::Continuous => "CONTINUOUS",
                NetworkMode::Econ => "ECON",
                NetworkMode::Delta => "DELTA",
                NetworkMode::BigMom => "BIGMOM",
                NetworkMode::Start { also_econ: false } => "START",
                NetworkMode::Start { also_econ: true } => "START+ECON",
                NetworkMode::Demand => "DEMAND",
            };
            text.push_str(&format!("{k} {mode_str}\n"));
        }
        let f = tempfile_write(&text);
        Catalogue::load(f.path()).unwrap()
    }

    fn tempfile_write(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn never_caches_pure_delta() {
        let mut cache = Cache::new();
        cache.put("Qi198", "5".into(), NetworkMode::Delta);
        assert!(cache.get("Qi198").is_none());
    }

    #[test]
    fn snapshot_preserves_catalogue_order() {
        let cat = catalogue_with(&[
            ("b", NetworkMode::Econ),
            ("a", NetworkMode::Econ),
            ("c", NetworkMode::Delta),
        ]);
        let mut cache = Cache::new();
        cache.put("a", "1".into(), NetworkMode::Econ);
        cache.put("b", "2".into(), NetworkMode::Econ);
        cache.put("c", "3".into(), NetworkMode::Delta);
        let snap = cache.snapshot_ordered(&cat);
        let keys: Vec<&str> = snap.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn replayable_snapshot_excludes_pure_start() {
        let cat = catalogue_with(&[
            ("version", NetworkMode::Start { also_econ: false }),
            ("layout", NetworkMode::Start { also_econ: true }),
        ]);
        let mut cache = Cache::new();
        cache.put("version", "10.0".into(), NetworkMode::Start { also_econ: false });
        cache.put("layout", "L1".into(), NetworkMode::Start { also_econ: true });
        let snap = cache.snapshot_replayable(&cat);
        let keys: Vec<&str> = snap.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["layout"]);
    }
}
