use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One localized form of a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    /// Display text.
    #[serde(rename = "name")]
    pub text: String,
    /// Language slot, e.g. `JA` or `EN`.
    pub language: String,
}

impl NameEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let text = value.get("name")?.as_str()?;
        let language = value.get("language")?.as_str()?;
        Some(Self::new(text, language))
    }
}

/// A catalog entry and its title forms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Title forms in catalog order.
    #[serde(default)]
    pub names: Vec<NameEntry>,
}

impl CatalogEntry {
    /// Creates an entry from its names.
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = NameEntry>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    fn from_value(value: &Value) -> Self {
        let names = value
            .get("names")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(NameEntry::from_value).collect())
            .unwrap_or_default();
        Self { names }
    }
}

/// Read-only view of the host's title catalog, keyed by opaque entry id.
///
/// Deserialisation is lenient: anything that does not look like a catalog
/// entry or a name object is dropped rather than reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct CatalogSnapshot {
    entries: IndexMap<String, CatalogEntry>,
}

impl CatalogSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_entry(mut self, id: impl Into<String>, entry: CatalogEntry) -> Self {
        self.insert(id, entry);
        self
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, id: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(id.into(), entry);
    }

    /// Number of entries, including entries without names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Parses the host's JSON cache shape. Malformed parts are skipped.
    ///
    /// # Errors
    /// Returns an error when `raw` is not valid JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(raw).map(Self::from)
    }
}

impl From<Value> for CatalogSnapshot {
    fn from(value: Value) -> Self {
        let Value::Object(map) = value else {
            return Self::default();
        };
        let entries = map
            .iter()
            .map(|(id, entry)| (id.clone(), CatalogEntry::from_value(entry)))
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_host_cache_shape() {
        let snapshot = CatalogSnapshot::from_json_str(
            r#"{
                "101": { "names": [
                    { "name": "Shingeki no Kyojin", "language": "JA" },
                    { "name": "Attack on Titan", "language": "EN" }
                ]},
                "102": { "names": [] }
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.len(), 2);
        let (id, entry) = snapshot.entries().next().unwrap();
        assert_eq!(id, "101");
        assert_eq!(entry.names[1], NameEntry::new("Attack on Titan", "EN"));
    }

    #[test]
    fn malformed_parts_are_dropped() {
        let snapshot = CatalogSnapshot::from(json!({
            "1": { "names": [
                { "name": 5, "language": "JA" },
                { "language": "EN" },
                { "name": "Ok", "language": "EN" }
            ] },
            "2": { "names": "nope" },
            "3": 17,
        }));
        let names: Vec<_> = snapshot
            .entries()
            .flat_map(|(_, entry)| entry.names.iter().map(|n| n.text.clone()))
            .collect();
        assert_eq!(names, vec!["Ok".to_string()]);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn non_object_root_is_empty() {
        assert!(CatalogSnapshot::from(json!([1, 2, 3])).is_empty());
        let parsed: CatalogSnapshot = serde_json::from_value(json!(null)).unwrap();
        assert!(parsed.is_empty());
    }
}
