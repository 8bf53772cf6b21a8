//! Rules Registry - Store and reuse mapping rule sets
//!
//! Saves rule sets to disk and matches them to incoming CSV formats by the
//! source columns they read. The registry is caller-owned: each instance loads
//! the directory once and writes through on every change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, RegistryResult};
use crate::rules::MappingRules;

/// Minimum share of stored source columns that must be present in the input.
const COMPATIBILITY_THRESHOLD: f64 = 0.5;

/// Weight of history in the success-rate moving average.
const SUCCESS_DECAY: f64 = 0.9;

/// A stored rule set with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRules {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub rules: MappingRules,
    /// Source columns these rules read
    pub source_columns: Vec<String>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    pub last_used: Option<String>,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    pub use_count: u32,
}

/// Registry of stored rule sets
pub struct RulesRegistry {
    registry_dir: PathBuf,
    entries: HashMap<String, StoredRules>,
}

impl RulesRegistry {
    /// Open the registry in the configured directory (`FIELDMAP_RULES_DIR`).
    pub fn new() -> Self {
        Self::with_dir(crate::config::rules_dir())
    }

    /// Open a registry in a custom directory.
    ///
    /// A missing directory is an empty registry; it is created on first save.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self {
            registry_dir: dir.as_ref().to_path_buf(),
            entries: HashMap::new(),
        };
        registry.load_all();
        registry
    }

    pub fn dir(&self) -> &Path {
        &self.registry_dir
    }

    /// Load every stored rule set. Unreadable files, and files whose rules no
    /// longer pass [`MappingRules::from_value`], are skipped with a warning.
    fn load_all(&mut self) {
        let entries = match fs::read_dir(&self.registry_dir) {
            Ok(e) => e,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let loaded = fs::read_to_string(&path)
                .map_err(RegistryError::from)
                .and_then(|content| read_stored(&content));
            match loaded {
                Ok(stored) => {
                    self.entries.insert(stored.id.clone(), stored);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping stored rules"),
            }
        }
        tracing::debug!(dir = %self.registry_dir.display(), count = self.entries.len(), "rules registry loaded");
    }

    /// All stored rule sets, sorted by name
    pub fn list(&self) -> Vec<&StoredRules> {
        let mut all: Vec<&StoredRules> = self.entries.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn get(&self, id: &str) -> RegistryResult<&StoredRules> {
        self.entries
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find rule sets compatible with the given CSV headers.
    ///
    /// Sorted by compatibility score times success rate, best first.
    pub fn find_compatible(&self, headers: &[String]) -> Vec<(&StoredRules, f64)> {
        let mut compatible: Vec<_> = self
            .entries
            .values()
            .filter_map(|stored| {
                let score = compatibility(&stored.source_columns, headers);
                (score > COMPATIBILITY_THRESHOLD).then_some((stored, score))
            })
            .collect();

        compatible.sort_by(|a, b| {
            let score_a = a.1 * a.0.success_rate;
            let score_b = b.1 * b.0.success_rate;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        compatible
    }

    /// Save a rule set and return its new id.
    pub fn save(
        &mut self,
        rules: MappingRules,
        name: &str,
        source_columns: Vec<String>,
    ) -> RegistryResult<String> {
        fs::create_dir_all(&self.registry_dir)?;

        let id = self.generate_id(name);
        let stored = StoredRules {
            id: id.clone(),
            name: name.to_string(),
            rules,
            source_columns,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_used: None,
            success_rate: 1.0,
            use_count: 0,
        };

        self.write(&stored)?;
        tracing::info!(%id, name, "rules saved");
        self.entries.insert(id.clone(), stored);
        Ok(id)
    }

    /// Import a rules document from a JSON file.
    ///
    /// The document is fully validated before it is stored. Without a name,
    /// the file stem is used.
    pub fn import(&mut self, path: &Path, name: Option<&str>) -> RegistryResult<String> {
        let rules = MappingRules::load_path(path)?;
        let name = name.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("imported")
        });
        let columns = rules.source_fields();
        self.save(rules, name, columns)
    }

    /// Record one use of a rule set (exponential moving average).
    pub fn update_stats(&mut self, id: &str, success: bool) -> RegistryResult<()> {
        let stored = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        stored.success_rate = stored.success_rate * SUCCESS_DECAY
            + if success { 1.0 - SUCCESS_DECAY } else { 0.0 };
        stored.last_used = Some(chrono::Utc::now().to_rfc3339());
        stored.use_count += 1;

        let stored = stored.clone();
        self.write(&stored)
    }

    /// Delete a rule set from memory and disk
    pub fn delete(&mut self, id: &str) -> RegistryResult<()> {
        if self.entries.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        fs::remove_file(self.path_for(id))?;
        Ok(())
    }

    fn write(&self, stored: &StoredRules) -> RegistryResult<()> {
        let content = serde_json::to_string_pretty(stored)?;
        fs::write(self.path_for(&stored.id), content)?;
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.registry_dir.join(format!("{}.json", id))
    }

    /// Slug of the name plus a millisecond timestamp, suffixed if taken.
    fn generate_id(&self, name: &str) -> String {
        let slug = slugify(name);
        let slug = if slug.is_empty() { "rules".to_string() } else { slug };
        let base = format!("{}-{}", slug, chrono::Utc::now().timestamp_millis());

        let mut id = base.clone();
        let mut n = 1;
        while self.entries.contains_key(&id) || self.path_for(&id).exists() {
            n += 1;
            id = format!("{}-{}", base, n);
        }
        id
    }
}

impl Default for RulesRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive share of `stored` columns present in `headers`.
fn compatibility(stored: &[String], headers: &[String]) -> f64 {
    if stored.is_empty() {
        return 0.0;
    }

    let headers_lower: Vec<String> = headers.iter().map(|c| c.to_lowercase()).collect();
    let matched = stored
        .iter()
        .filter(|col| headers_lower.contains(&col.to_lowercase()))
        .count();

    matched as f64 / stored.len() as f64
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a stored rule set, re-checking its rules like a freshly loaded document.
fn read_stored(content: &str) -> RegistryResult<StoredRules> {
    let raw: Value = serde_json::from_str(content)?;
    let rules = MappingRules::from_value(raw.get("rules").cloned().unwrap_or(Value::Null))?;
    let mut stored: StoredRules = serde_json::from_value(raw)?;
    stored.rules = rules;
    Ok(stored)
}
