//! VaM face JSON.
//!
//! Morphs live in the `geometry` storable, either at the top level or inside
//! an atom:
//!
//! ```json
//! { "storables": [ { "id": "geometry", "morphs": [
//!     { "name": "Jaw Width", "value": "0.25", "animatable": "true" } ] } ] }
//! ```
//!
//! VaM writes numbers and booleans as strings; both spellings are accepted.

use facesynth_core::face::{DEFAULT_MORPH_MAX, DEFAULT_MORPH_MIN};
use facesynth_core::{FaceStore, FaceStoreError, FaceVector, MorphSlot};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

const GEOMETRY_STORABLE: &str = "geometry";

#[derive(Deserialize)]
struct VamDocument {
    #[serde(default)]
    storables: Vec<Storable>,
    #[serde(default)]
    atoms: Vec<Atom>,
}

#[derive(Deserialize)]
struct Atom {
    #[serde(default)]
    storables: Vec<Storable>,
}

#[derive(Deserialize)]
struct Storable {
    id: String,
    #[serde(default)]
    morphs: Vec<RawMorph>,
}

#[derive(Deserialize)]
struct RawMorph {
    name: Option<String>,
    uid: Option<String>,
    value: Option<Loose>,
    animatable: Option<Loose>,
    min: Option<Loose>,
    max: Option<Loose>,
}

/// A JSON scalar that may have been written as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Loose {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Loose::Number(v) => Some(*v),
            Loose::Text(s) => s.trim().parse().ok(),
            Loose::Bool(_) => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Loose::Bool(b) => Some(*b),
            Loose::Text(s) => s.trim().parse().ok(),
            Loose::Number(v) => Some(*v != 0.0),
        }
    }
}

#[derive(Serialize)]
struct SavedDocument<'a> {
    storables: [SavedStorable<'a>; 1],
}

#[derive(Serialize)]
struct SavedStorable<'a> {
    id: &'static str,
    morphs: Vec<SavedMorph<'a>>,
}

#[derive(Serialize)]
struct SavedMorph<'a> {
    name: &'a str,
    value: String,
    animatable: String,
    min: String,
    max: String,
}

/// [`FaceStore`] for VaM appearance files.
#[derive(Debug, Clone)]
pub struct VamFaceStore {
    /// Range for morphs that carry no `min`/`max` of their own.
    pub default_min: f64,
    pub default_max: f64,
}

impl Default for VamFaceStore {
    fn default() -> Self {
        Self {
            default_min: DEFAULT_MORPH_MIN,
            default_max: DEFAULT_MORPH_MAX,
        }
    }
}

impl VamFaceStore {
    /// Parse a face from JSON text.
    pub fn parse(&self, text: &str) -> Result<FaceVector, FaceStoreError> {
        let doc: VamDocument = serde_json::from_str(text)?;
        let geometry = doc
            .storables
            .iter()
            .chain(doc.atoms.iter().flat_map(|a| a.storables.iter()))
            .find(|s| s.id == GEOMETRY_STORABLE)
            .ok_or_else(|| FaceStoreError::Malformed("no geometry storable".into()))?;

        let mut entries = Vec::with_capacity(geometry.morphs.len());
        for (i, raw) in geometry.morphs.iter().enumerate() {
            let name = raw
                .name
                .as_ref()
                .or(raw.uid.as_ref())
                .ok_or_else(|| FaceStoreError::Malformed(format!("morph {i} has no name")))?;
            let value = number(name, &raw.value, "value")?
                .ok_or_else(|| FaceStoreError::Malformed(format!("morph {name} has no value")))?;
            let min = number(name, &raw.min, "min")?.unwrap_or(self.default_min);
            let max = number(name, &raw.max, "max")?.unwrap_or(self.default_max);
            let animatable = match &raw.animatable {
                None => false,
                Some(v) => v.as_bool().ok_or_else(|| {
                    FaceStoreError::Malformed(format!("morph {name}: animatable is not a boolean"))
                })?,
            };
            entries.push((MorphSlot::new(name.clone(), min, max, animatable), value));
        }
        Ok(FaceVector::from_slots(entries)?)
    }

    /// Render a face as JSON text.
    pub fn render(&self, face: &FaceVector) -> Result<String, FaceStoreError> {
        let morphs = face
            .schema()
            .slots()
            .iter()
            .zip(face.values())
            .map(|(slot, value)| SavedMorph {
                name: &slot.name,
                value: value.to_string(),
                animatable: slot.animatable.to_string(),
                min: slot.min.to_string(),
                max: slot.max.to_string(),
            })
            .collect();
        let doc = SavedDocument {
            storables: [SavedStorable {
                id: GEOMETRY_STORABLE,
                morphs,
            }],
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

fn number(morph: &str, field: &Option<Loose>, what: &str) -> Result<Option<f64>, FaceStoreError> {
    field
        .as_ref()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                FaceStoreError::Malformed(format!("morph {morph}: {what} is not a number"))
            })
        })
        .transpose()
}

impl FaceStore for VamFaceStore {
    fn load(&self, path: &Path) -> Result<FaceVector, FaceStoreError> {
        let text = std::fs::read_to_string(path)?;
        self.parse(&text)
    }

    /// Write to a sibling temp file, then rename over the target.
    fn save(&self, face: &FaceVector, path: &Path) -> Result<(), FaceStoreError> {
        let text = self.render(face)?;
        let file_name = path.file_name().ok_or_else(|| {
            FaceStoreError::Malformed(format!("not a file path: {}", path.display()))
        })?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, path)
        };
        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        tracing::trace!(path = %path.display(), morphs = face.len(), "saved face");
        Ok(())
    }
}
