//! Per-engine JSON voice catalogs.
//!
//! When `configs/voices/<engine_id>_voices.json` exists it is the source of
//! truth for that engine's voice list; otherwise adapters fall back to their
//! built-in defaults. Schema:
//!
//! ```json
//! {
//!   "metadata": { "version": "1.2", "source": "upstream dump", "updatedAt": "..." },
//!   "voices": {
//!     "zh-CN-XiaoxiaoNeural": {
//!       "name": "Xiaoxiao", "language": "zh-CN", "gender": "female",
//!       "description": "...", "personalities": ["warm"],
//!       "isPopular": true, "isRecommended": true
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::descriptor::VoiceInfo;
use crate::error::{RecitoError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CatalogMetadata {
    pub version: String,
    pub source: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CatalogVoice {
    pub name: String,
    pub language: String,
    pub gender: String,
    pub description: String,
    pub personalities: Vec<String>,
    pub is_popular: bool,
    pub is_recommended: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VoiceCatalog {
    pub metadata: CatalogMetadata,
    pub voices: BTreeMap<String, CatalogVoice>,
}

impl VoiceCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| RecitoError::Config(format!("voice catalog {}: {e}", path.display())))
    }

    /// Flatten into the adapter-facing voice list.
    pub fn voice_infos(&self) -> Vec<VoiceInfo> {
        self.voices
            .iter()
            .map(|(id, voice)| {
                let mut custom_attrs = BTreeMap::new();
                if !voice.description.is_empty() {
                    custom_attrs.insert("description".into(), voice.description.clone());
                }
                if !voice.personalities.is_empty() {
                    custom_attrs.insert("personalities".into(), voice.personalities.join(","));
                }
                custom_attrs.insert("isPopular".into(), voice.is_popular.to_string());
                custom_attrs.insert("isRecommended".into(), voice.is_recommended.to_string());
                VoiceInfo {
                    id: id.clone(),
                    name: if voice.name.is_empty() {
                        id.clone()
                    } else {
                        voice.name.clone()
                    },
                    language: voice.language.clone(),
                    gender: voice.gender.clone(),
                    quality: String::new(),
                    custom_attrs,
                }
            })
            .collect()
    }
}

/// Conventional catalog path for an engine under a config root.
pub fn catalog_path(config_root: &Path, engine_id: &str) -> PathBuf {
    config_root
        .join("voices")
        .join(format!("{engine_id}_voices.json"))
}

/// Catalog voices when a catalog exists and parses, else the built-in list.
pub fn catalog_or_default(
    config_root: Option<&Path>,
    engine_id: &str,
    default_voices: impl FnOnce() -> Vec<VoiceInfo>,
) -> Vec<VoiceInfo> {
    if let Some(root) = config_root {
        let path = catalog_path(root, engine_id);
        if path.exists() {
            match VoiceCatalog::load(&path) {
                Ok(catalog) if !catalog.voices.is_empty() => return catalog.voice_infos(),
                Ok(_) => {}
                Err(e) => {
                    warn!(engine = engine_id, error = %e, "ignoring unreadable voice catalog");
                }
            }
        }
    }
    default_voices()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_JSON: &str = r#"{
        "metadata": { "version": "1.0", "source": "test" },
        "voices": {
            "zh-CN-XiaoxiaoNeural": {
                "name": "Xiaoxiao",
                "language": "zh-CN",
                "gender": "female",
                "description": "news voice",
                "personalities": ["warm", "calm"],
                "isPopular": true,
                "isRecommended": false
            }
        }
    }"#;

    #[test]
    fn catalog_parses_and_flattens() {
        let catalog: VoiceCatalog = serde_json::from_str(CATALOG_JSON).expect("parse catalog");
        let voices = catalog.voice_infos();
        assert_eq!(voices.len(), 1);
        let voice = &voices[0];
        assert_eq!(voice.id, "zh-CN-XiaoxiaoNeural");
        assert_eq!(voice.name, "Xiaoxiao");
        assert_eq!(voice.custom_attrs.get("isPopular").unwrap(), "true");
        assert_eq!(voice.custom_attrs.get("personalities").unwrap(), "warm,calm");
    }

    #[test]
    fn missing_catalog_uses_default_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let voices = catalog_or_default(Some(dir.path()), "online_voice", || {
            vec![VoiceInfo {
                id: "builtin".into(),
                ..VoiceInfo::default()
            }]
        });
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].id, "builtin");
    }

    #[test]
    fn present_catalog_overrides_default_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = catalog_path(dir.path(), "online_voice");
        fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        fs::write(&path, CATALOG_JSON).expect("write catalog");
        let voices = catalog_or_default(Some(dir.path()), "online_voice", Vec::new);
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].id, "zh-CN-XiaoxiaoNeural");
    }
}
