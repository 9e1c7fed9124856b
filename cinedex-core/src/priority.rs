//! Resolves which providers may answer for a given field or asset kind,
//! in what order.

use cinedex_model::{
    MediaClass, PriorityCategory, PriorityPreset, ProviderName, FORCED_LOCAL_FIELDS,
};

/// Pure resolution over the active preset. Construct once per request with
/// the preset loaded from the store.
#[derive(Debug, Clone)]
pub struct PriorityResolver {
    active: PriorityPreset,
    class: MediaClass,
}

impl PriorityResolver {
    pub fn new(active: PriorityPreset, class: MediaClass) -> Self {
        Self { active, class }
    }

    /// Ordered provider names for `(category, key)`. First match wins:
    /// forced-local fields, then custom-preset entries (minus disabled
    /// providers), then the balanced defaults. `local` is always last when
    /// present.
    pub fn resolve(&self, category: PriorityCategory, key: &str) -> Vec<ProviderName> {
        if FORCED_LOCAL_FIELDS.contains(&key) {
            return vec![ProviderName::from(ProviderName::LOCAL)];
        }

        if self.active.is_custom() {
            if let Some(entry) = self.active.entry(category, key) {
                let mut providers: Vec<ProviderName> = entry
                    .providers
                    .iter()
                    .filter(|name| !self.active.disabled_providers.contains(*name))
                    .map(|name| ProviderName::from(name.as_str()))
                    .collect();
                Self::pin_local_last(&mut providers);
                if !providers.is_empty() {
                    return providers;
                }
            }
        }

        let mut providers = Self::balanced_defaults(self.class, category);
        providers.retain(|name| {
            name.is_local() || !self.active.disabled_providers.contains(&name.0)
        });
        providers
    }

    fn balanced_defaults(class: MediaClass, category: PriorityCategory) -> Vec<ProviderName> {
        let names: &[&str] = match (class, category) {
            (MediaClass::Movies, PriorityCategory::Metadata) => &["imdb", "tmdb", "local"],
            (MediaClass::Movies, PriorityCategory::Image) => &["fanart_tv", "tmdb", "local"],
            (MediaClass::Tv, PriorityCategory::Metadata) => &["tvdb", "tmdb", "local"],
            (MediaClass::Tv, PriorityCategory::Image) => {
                &["fanart_tv", "tvdb", "tmdb", "local"]
            }
            (MediaClass::Music, PriorityCategory::Metadata) => {
                &["musicbrainz", "theaudiodb", "local"]
            }
            (MediaClass::Music, PriorityCategory::Image) => {
                &["theaudiodb", "musicbrainz", "local"]
            }
        };
        names.iter().map(|name| ProviderName::from(*name)).collect()
    }

    fn pin_local_last(providers: &mut Vec<ProviderName>) {
        if let Some(pos) = providers.iter().position(|p| p.is_local()) {
            if pos != providers.len() - 1 {
                let local = providers.remove(pos);
                providers.push(local);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinedex_model::FieldPriority;

    fn balanced() -> PriorityPreset {
        PriorityPreset {
            name: PriorityPreset::BALANCED.into(),
            entries: vec![],
            disabled_providers: vec![],
        }
    }

    fn names(providers: &[ProviderName]) -> Vec<&str> {
        providers.iter().map(|p| p.as_str()).collect()
    }

    #[test]
    fn forced_local_fields_resolve_to_local_regardless_of_preset() {
        for field in FORCED_LOCAL_FIELDS {
            let resolver = PriorityResolver::new(balanced(), MediaClass::Movies);
            assert_eq!(
                names(&resolver.resolve(PriorityCategory::Metadata, field)),
                vec!["local"],
                "field {field}"
            );

            let custom = PriorityPreset {
                name: PriorityPreset::CUSTOM.into(),
                entries: vec![FieldPriority {
                    category: PriorityCategory::Metadata,
                    key: (*field).to_string(),
                    providers: vec!["tmdb".into()],
                }],
                disabled_providers: vec![],
            };
            let resolver = PriorityResolver::new(custom, MediaClass::Movies);
            assert_eq!(
                names(&resolver.resolve(PriorityCategory::Metadata, field)),
                vec!["local"],
                "custom preset must not override forced-local {field}"
            );
        }
    }

    #[test]
    fn balanced_defaults_per_class() {
        let movies = PriorityResolver::new(balanced(), MediaClass::Movies);
        assert_eq!(
            names(&movies.resolve(PriorityCategory::Metadata, "plot")),
            vec!["imdb", "tmdb", "local"]
        );
        assert_eq!(
            names(&movies.resolve(PriorityCategory::Image, "poster")),
            vec!["fanart_tv", "tmdb", "local"]
        );

        let tv = PriorityResolver::new(balanced(), MediaClass::Tv);
        assert_eq!(
            names(&tv.resolve(PriorityCategory::Image, "poster")),
            vec!["fanart_tv", "tvdb", "tmdb", "local"]
        );

        let music = PriorityResolver::new(balanced(), MediaClass::Music);
        assert_eq!(
            names(&music.resolve(PriorityCategory::Metadata, "title")),
            vec!["musicbrainz", "theaudiodb", "local"]
        );
    }

    #[test]
    fn custom_entries_win_and_drop_disabled_providers() {
        let custom = PriorityPreset {
            name: PriorityPreset::CUSTOM.into(),
            entries: vec![FieldPriority {
                category: PriorityCategory::Metadata,
                key: "plot".into(),
                providers: vec!["local".into(), "tmdb".into(), "imdb".into()],
            }],
            disabled_providers: vec!["imdb".into()],
        };
        let resolver = PriorityResolver::new(custom, MediaClass::Movies);
        // imdb filtered out; local pinned last.
        assert_eq!(
            names(&resolver.resolve(PriorityCategory::Metadata, "plot")),
            vec!["tmdb", "local"]
        );
    }

    #[test]
    fn custom_preset_falls_back_to_defaults_for_unknown_keys() {
        let custom = PriorityPreset {
            name: PriorityPreset::CUSTOM.into(),
            entries: vec![],
            disabled_providers: vec![],
        };
        let resolver = PriorityResolver::new(custom, MediaClass::Movies);
        assert_eq!(
            names(&resolver.resolve(PriorityCategory::Metadata, "tagline")),
            vec!["imdb", "tmdb", "local"]
        );
    }

    #[test]
    fn disabled_providers_are_dropped_from_defaults_too() {
        let preset = PriorityPreset {
            name: PriorityPreset::BALANCED.into(),
            entries: vec![],
            disabled_providers: vec!["imdb".into()],
        };
        let resolver = PriorityResolver::new(preset, MediaClass::Movies);
        assert_eq!(
            names(&resolver.resolve(PriorityCategory::Metadata, "plot")),
            vec!["tmdb", "local"]
        );
    }
}
