//! Style preset table.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, warn};

use super::{StyleResolver, StyleSettings};

#[derive(Debug, Default, Deserialize)]
struct PresetFile {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    presets: BTreeMap<String, StyleSettings>,
}

/// Style presets loaded from `{"default": id, "presets": {id: {...}}}`.
///
/// Presets are normalized on load: unknown keys are dropped and missing
/// fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StylePresetTable {
    default: Option<String>,
    presets: BTreeMap<String, StyleSettings>,
}

impl StylePresetTable {
    pub fn new(presets: BTreeMap<String, StyleSettings>) -> Self {
        Self {
            default: None,
            presets,
        }
    }

    /// Loads the preset file. A missing or unreadable file yields an empty
    /// table, so every lookup fails.
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            warn!(path = %path.display(), "No style preset file found");
            return Self::default();
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<PresetFile>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(file) => {
                info!(
                    count = file.presets.len(),
                    default = ?file.default,
                    "Loaded style presets"
                );
                Self {
                    default: file.default,
                    presets: file.presets,
                }
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load style presets");
                Self::default()
            }
        }
    }

    pub fn default_style(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl StyleResolver for StylePresetTable {
    fn resolve(&self, style_id: &str) -> Option<StyleSettings> {
        let preset = self.presets.get(style_id).cloned();
        if preset.is_none() {
            warn!(style = %style_id, "Requested invalid style preset");
        }
        preset
    }
}
