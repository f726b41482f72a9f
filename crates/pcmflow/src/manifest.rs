//! Optional sidecar manifests.
//!
//! A manifest is a JSON document describing out-of-band stream properties;
//! the transmuxer consults `seekTable.index_range` to size its initial
//! index read. The default factory has no manifests; hosts register them
//! per path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Parsed manifest JSON.
pub struct Manifest {
    json: serde_json::Value,
}

impl Manifest {
    pub fn new(json: serde_json::Value) -> Self {
        Self { json }
    }

    pub fn json(&self) -> &serde_json::Value {
        &self.json
    }

    /// The `seekTable.index_range` byte range, when present.
    pub fn index_range(&self) -> Option<(usize, usize)> {
        let range = self.json.get("seekTable")?.get("index_range")?.as_array()?;
        let start = range.first()?.as_u64()? as usize;
        let end = range.last()?.as_u64()? as usize;
        Some((start, end))
    }
}

/// Path → manifest lookup shared across decoders.
#[derive(Default)]
pub struct ManifestFactory {
    manifests: Mutex<HashMap<String, Arc<Manifest>>>,
}

impl ManifestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<String>, json: serde_json::Value) {
        self.manifests
            .lock()
            .insert(path.into(), Arc::new(Manifest::new(json)));
    }

    pub fn create_manifest(&self, path: &str) -> Option<Arc<Manifest>> {
        self.manifests.lock().get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_range_reads_the_seek_table() {
        let manifest = Manifest::new(serde_json::json!({
            "seekTable": { "index_range": [0, 1234] }
        }));
        assert_eq!(manifest.index_range(), Some((0, 1234)));

        let manifest = Manifest::new(serde_json::json!({}));
        assert_eq!(manifest.index_range(), None);
    }
}
