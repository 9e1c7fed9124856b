//! Provider-priority presets: which provider wins per field or asset kind.

use serde::{Deserialize, Serialize};

/// The two resolution categories a priority entry can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityCategory {
    Metadata,
    Image,
}

impl PriorityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityCategory::Metadata => "metadata",
            PriorityCategory::Image => "image",
        }
    }
}

/// Media families the balanced defaults distinguish between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    Movies,
    Tv,
    Music,
}

/// Fields whose value must never come from a provider. These resolve to
/// `["local"]` regardless of the active preset.
pub const FORCED_LOCAL_FIELDS: &[&str] = &["runtime", "codec", "file_path", "file_size"];

/// One ordered provider list for a (category, key) pair inside a preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPriority {
    pub category: PriorityCategory,
    /// Field name for metadata entries, asset-kind name for image entries.
    pub key: String,
    pub providers: Vec<String>,
}

/// A named set of field priorities. Exactly one preset is active at a time;
/// any manual edit switches the active preset to `custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPreset {
    pub name: String,
    pub entries: Vec<FieldPriority>,
    /// Providers the user has switched off entirely.
    pub disabled_providers: Vec<String>,
}

impl PriorityPreset {
    pub const CUSTOM: &'static str = "custom";
    pub const BALANCED: &'static str = "balanced";

    pub fn is_custom(&self) -> bool {
        self.name == Self::CUSTOM
    }

    pub fn entry(&self, category: PriorityCategory, key: &str) -> Option<&FieldPriority> {
        self.entries
            .iter()
            .find(|entry| entry.category == category && entry.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_entry_lookup_matches_category_and_key() {
        let preset = PriorityPreset {
            name: PriorityPreset::CUSTOM.into(),
            entries: vec![FieldPriority {
                category: PriorityCategory::Metadata,
                key: "plot".into(),
                providers: vec!["tmdb".into(), "imdb".into()],
            }],
            disabled_providers: vec![],
        };
        assert!(preset.entry(PriorityCategory::Metadata, "plot").is_some());
        assert!(preset.entry(PriorityCategory::Image, "plot").is_none());
        assert!(preset.entry(PriorityCategory::Metadata, "title").is_none());
    }
}
