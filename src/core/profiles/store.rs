//! Read-only profile snapshots and the store that swaps them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    builtin_snapshot, AudienceProfile, Layer, LayerType, ProfileError, DEFAULT_PROFILE_KEY,
};

/// Result of a layer lookup. `fell_back` is set when the requested profile
/// key was unknown and the default layer of that type was returned instead.
#[derive(Debug, Clone, Copy)]
pub struct LayerLookup<'a> {
    pub layer: &'a Layer,
    pub fell_back: bool,
}

/// Immutable view over all layers, audience profiles and emotion lexicons.
///
/// A snapshot always holds a default layer for every [`LayerType`] and a
/// default audience, so lookups never fail.
#[derive(Debug, Clone)]
pub struct ProfileSnapshot {
    revision: u64,
    layers: HashMap<LayerType, HashMap<String, Layer>>,
    audiences: HashMap<String, AudienceProfile>,
    /// language -> emotion -> keywords (lowercase)
    emotion_lexicon: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl ProfileSnapshot {
    pub fn new(
        layers: impl IntoIterator<Item = Layer>,
        audiences: impl IntoIterator<Item = AudienceProfile>,
        emotion_lexicon: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    ) -> Self {
        let mut by_type: HashMap<LayerType, HashMap<String, Layer>> = HashMap::new();
        for layer in layers {
            by_type
                .entry(layer.layer_type())
                .or_default()
                .insert(layer.profile_key().to_string(), layer);
        }
        for layer_type in LayerType::MERGE_ORDER {
            by_type
                .entry(layer_type)
                .or_default()
                .entry(DEFAULT_PROFILE_KEY.to_string())
                .or_insert_with(|| {
                    Layer::new(layer_type, DEFAULT_PROFILE_KEY, "Empty default", "", 0.0)
                });
        }

        let mut audiences: HashMap<String, AudienceProfile> = audiences
            .into_iter()
            .map(|a| (a.key.clone(), a))
            .collect();
        audiences
            .entry(DEFAULT_PROFILE_KEY.to_string())
            .or_insert_with(AudienceProfile::default);

        let emotion_lexicon = emotion_lexicon
            .into_iter()
            .map(|(lang, emotions)| {
                let emotions = emotions
                    .into_iter()
                    .map(|(emotion, words)| {
                        let words = words.into_iter().map(|w| w.to_lowercase()).collect();
                        (emotion.to_lowercase(), words)
                    })
                    .collect();
                (lang.to_lowercase(), emotions)
            })
            .collect();

        Self {
            revision: 0,
            layers: by_type,
            audiences,
            emotion_lexicon,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Resolve `(layer_type, profile_key)`, falling back to the default layer.
    pub fn layer(&self, layer_type: LayerType, profile_key: &str) -> LayerLookup<'_> {
        // `new` guarantees the default entry for every type.
        let of_type = &self.layers[&layer_type];
        match of_type.get(profile_key) {
            Some(layer) => LayerLookup {
                layer,
                fell_back: false,
            },
            None => LayerLookup {
                layer: &of_type[DEFAULT_PROFILE_KEY],
                fell_back: true,
            },
        }
    }

    /// Resolve an audience profile, falling back to the default audience.
    pub fn audience(&self, key: &str) -> (&AudienceProfile, bool) {
        match self.audiences.get(key) {
            Some(profile) => (profile, false),
            None => (&self.audiences[DEFAULT_PROFILE_KEY], true),
        }
    }

    /// Keywords marking the given emotion in the given language.
    ///
    /// Unknown emotions use every keyword of the language; unknown languages
    /// yield an empty list.
    pub fn emotion_keywords(&self, language: &str, emotion: &str) -> Vec<&str> {
        let Some(emotions) = self.emotion_lexicon.get(&language.to_lowercase()) else {
            return Vec::new();
        };
        let emotion = emotion.to_lowercase();
        let matching: Vec<&str> = emotions
            .iter()
            .filter(|(name, _)| name.contains(&emotion) || emotion.contains(name.as_str()))
            .flat_map(|(_, words)| words.iter().map(String::as_str))
            .collect();
        if !matching.is_empty() {
            return matching;
        }
        emotions
            .values()
            .flat_map(|words| words.iter().map(String::as_str))
            .collect()
    }

    /// All profile keys registered for a layer type, sorted.
    pub fn profile_keys(&self, layer_type: LayerType) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .layers
            .get(&layer_type)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    pub fn audience_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.audiences.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn layer_count(&self) -> usize {
        self.layers.values().map(HashMap::len).sum()
    }

    /// Overlay a profile document onto this snapshot, producing the next revision.
    pub fn merge_document(&self, doc: ProfileDocument) -> Result<ProfileSnapshot, ProfileError> {
        let mut next = self.clone();
        next.revision = self.revision + 1;

        for spec in doc.layers {
            let layer_type =
                LayerType::parse(&spec.layer_type).ok_or_else(|| ProfileError::InvalidLayer {
                    layer_type: spec.layer_type.clone(),
                    profile_key: spec.profile_key.clone(),
                    reason: "unknown layer type".to_string(),
                })?;
            if spec.profile_key.trim().is_empty() {
                return Err(ProfileError::InvalidLayer {
                    layer_type: spec.layer_type,
                    profile_key: spec.profile_key,
                    reason: "profile key must not be empty".to_string(),
                });
            }
            let name = spec.name.unwrap_or_else(|| spec.profile_key.clone());
            let layer = Layer::new(layer_type, spec.profile_key, name, spec.content, spec.weight);
            next.layers
                .entry(layer_type)
                .or_default()
                .insert(layer.profile_key().to_string(), layer);
        }

        for audience in doc.audiences {
            audience.validate()?;
            next.audiences.insert(audience.key.clone(), audience);
        }

        for (language, emotions) in doc.emotions {
            let entry = next.emotion_lexicon.entry(language.to_lowercase()).or_default();
            for (emotion, words) in emotions {
                entry.insert(
                    emotion.to_lowercase(),
                    words.into_iter().map(|w| w.to_lowercase()).collect(),
                );
            }
        }

        Ok(next)
    }

    /// Parse a TOML profile document and overlay it onto the built-in profiles.
    pub fn from_toml_str(document: &str) -> Result<ProfileSnapshot, ProfileError> {
        let doc: ProfileDocument = toml::from_str(document)?;
        builtin_snapshot().merge_document(doc)
    }
}

// ============================================================================
// Profile Documents
// ============================================================================

/// On-disk shape of a profile document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDocument {
    pub layers: Vec<LayerSpec>,
    pub audiences: Vec<AudienceProfile>,
    pub emotions: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub layer_type: String,
    pub profile_key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
    #[serde(default = "default_layer_weight")]
    pub weight: f32,
}

fn default_layer_weight() -> f32 {
    1.0
}

// ============================================================================
// Store
// ============================================================================

/// Holds the current snapshot. Readers take an `Arc` and keep it for the
/// whole run; reload replaces the pointer without touching live readers.
#[derive(Debug)]
pub struct ProfileStore {
    current: RwLock<Arc<ProfileSnapshot>>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(builtin_snapshot())
    }
}

impl ProfileStore {
    pub fn new(snapshot: ProfileSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ProfileSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the snapshot. The new revision is always higher than the old one.
    pub fn reload(&self, mut snapshot: ProfileSnapshot) -> Arc<ProfileSnapshot> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if snapshot.revision <= guard.revision {
            snapshot.revision = guard.revision + 1;
        }
        let next = Arc::new(snapshot);
        *guard = Arc::clone(&next);
        info!(
            revision = next.revision,
            layers = next.layer_count(),
            "Profile snapshot reloaded"
        );
        next
    }

    /// Parse a TOML document over the built-in profiles and swap it in.
    /// On error the current snapshot stays active.
    pub fn reload_from_toml(&self, document: &str) -> Result<Arc<ProfileSnapshot>, ProfileError> {
        let snapshot = ProfileSnapshot::from_toml_str(document)?;
        Ok(self.reload(snapshot))
    }
}
