use std::{collections::HashMap, fs, path::Path};

use serde_json::{json, Value};

/// Remediation data keyed by class label. Values are passed through to
/// clients untouched, whatever shape they have in the JSON file.
#[derive(Debug, Clone, Default)]
pub struct DiseaseTable {
    entries: HashMap<String, Value>,
}

impl DiseaseTable {
    /// Loads the table. A missing or malformed file leaves the table empty so
    /// predictions still succeed with placeholder advice.
    pub fn load(path: &Path) -> Self {
        let parsed = fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|raw| {
                serde_json::from_str::<HashMap<String, Value>>(&raw)
                    .map_err(|err| err.to_string())
            });

        match parsed {
            Ok(entries) => {
                tracing::info!(
                    path = %path.display(),
                    entries = entries.len(),
                    "disease data loaded"
                );
                DiseaseTable { entries }
            }
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "failed to load disease data"
                );
                DiseaseTable::default()
            }
        }
    }

    pub fn from_entries(entries: HashMap<String, Value>) -> Self {
        DiseaseTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn solution(&self, label: &str) -> Value {
        self.entries
            .get(label)
            .cloned()
            .unwrap_or_else(|| json!({ "message": "No data available" }))
    }
}
