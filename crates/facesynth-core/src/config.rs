//! Training configuration loader.
//!
//! A configuration document names the base face and lists the input and
//! output parameter programs:
//!
//! ```json
//! {
//!   "config_version": 1,
//!   "baseJson": "base.json",
//!   "inputs":  [{ "name": "encoding", "params": [{ "name": "angle", "value": "0" }] }],
//!   "outputs": [{ "name": "json", "params": [] }]
//! }
//! ```

use crate::engine::{EvalError, Example, ParamEngine, Shape};
use crate::face::FaceVector;
use crate::program::{parse_params, AngleSet, ParamParseWarning, ParamSpec};
use crate::store::{FaceStore, FaceStoreError};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Document version this reader understands.
pub const CONFIG_VERSION: i64 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config version mismatch: file was {found}, reader was {}", CONFIG_VERSION)]
    Version { found: String },
    #[error("config has no base face reference (baseJson)")]
    MissingBase,
    #[error("config field {field} must be {expected}")]
    Field {
        field: &'static str,
        expected: &'static str,
    },
    #[error("failed to load face {path}: {source}")]
    Face {
        path: PathBuf,
        #[source]
        source: FaceStoreError,
    },
}

/// One example's derived vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingVector {
    pub inputs: Vec<f64>,
    pub outputs: Vec<f64>,
}

/// Parsed configuration plus the vector shape fixed by the first example.
#[derive(Debug)]
pub struct Config {
    base_face: FaceVector,
    inputs: Vec<ParamSpec>,
    outputs: Vec<ParamSpec>,
    angles: AngleSet,
    warnings: Vec<ParamParseWarning>,
    shape: Option<Shape>,
}

impl Config {
    /// Read a configuration file. Relative face paths resolve against its directory.
    pub fn load<S: FaceStore + ?Sized>(path: &Path, store: &S) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&text)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_value(&doc, base_dir, store)
    }

    /// Build from an already-parsed document. A present version tag is
    /// checked before anything else is read; an absent one is accepted.
    pub fn from_value<S: FaceStore + ?Sized>(
        doc: &Value,
        base_dir: &Path,
        store: &S,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = doc.get("config_version") {
            if v.as_i64() != Some(CONFIG_VERSION) {
                return Err(ConfigError::Version {
                    found: v.to_string(),
                });
            }
        }

        let base_ref = path_field(doc, "baseJson")?
            .or(path_field(doc, "baseSchemaRef")?)
            .ok_or(ConfigError::MissingBase)?;
        let min_ref = path_field(doc, "minJson")?;
        let max_ref = path_field(doc, "maxJson")?;

        let load = |rel: &str| {
            let path = base_dir.join(rel);
            store
                .load(&path)
                .map_err(|source| ConfigError::Face { path, source })
        };
        let mut base_face = load(base_ref)?;
        let min_face = min_ref.map(load).transpose()?;
        let max_face = max_ref.map(load).transpose()?;
        base_face
            .apply_bounds(min_face.as_ref(), max_face.as_ref())
            .map_err(|e| ConfigError::Face {
                path: base_dir.join(base_ref),
                source: e.into(),
            })?;
        base_face.trim_to_animatable();

        let inputs = parse_params("inputs", section(doc, "inputs")?);
        let outputs = parse_params("outputs", section(doc, "outputs")?);
        let angles: AngleSet = inputs
            .items
            .iter()
            .chain(&outputs.items)
            .flat_map(ParamSpec::angles)
            .collect();

        let mut warnings = inputs.warnings;
        warnings.extend(outputs.warnings);

        tracing::info!(
            base = base_ref,
            morphs = base_face.len(),
            inputs = inputs.items.len(),
            outputs = outputs.items.len(),
            skipped = warnings.len(),
            angles = ?angles.as_slice(),
            "loaded training config"
        );

        Ok(Self {
            base_face,
            inputs: inputs.items,
            outputs: outputs.items,
            angles,
            warnings,
            shape: None,
        })
    }

    pub fn base_face(&self) -> &FaceVector {
        &self.base_face
    }

    pub fn inputs(&self) -> &[ParamSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ParamSpec] {
        &self.outputs
    }

    pub fn angles(&self) -> &AngleSet {
        &self.angles
    }

    /// Parameter entries skipped while parsing.
    pub fn warnings(&self) -> &[ParamParseWarning] {
        &self.warnings
    }

    /// `None` until the first successful [`generate_params`](Self::generate_params).
    pub fn shape(&self) -> Option<Shape> {
        self.shape
    }

    /// Derive the input and output vectors for one example.
    ///
    /// The first success fixes the shape; later examples must match it.
    pub fn generate_params(&mut self, example: &Example) -> Result<TrainingVector, EvalError> {
        let inputs =
            ParamEngine::new(&self.inputs, &self.angles, example, &self.base_face).evaluate()?;
        let outputs =
            ParamEngine::new(&self.outputs, &self.angles, example, &self.base_face).evaluate()?;
        let actual = Shape {
            inputs: inputs.len(),
            outputs: outputs.len(),
        };
        match self.shape {
            None => {
                tracing::info!(
                    inputs = actual.inputs,
                    outputs = actual.outputs,
                    "parameter shape fixed"
                );
                self.shape = Some(actual);
            }
            Some(expected) if expected != actual => {
                return Err(EvalError::ShapeMismatch { expected, actual });
            }
            Some(_) => {}
        }
        Ok(TrainingVector { inputs, outputs })
    }
}

fn path_field<'a>(doc: &'a Value, field: &'static str) -> Result<Option<&'a str>, ConfigError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ConfigError::Field {
            field,
            expected: "a path string",
        }),
    }
}

fn section<'a>(doc: &'a Value, field: &'static str) -> Result<&'a [Value], ConfigError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(entries)) => Ok(entries),
        Some(_) => Err(ConfigError::Field {
            field,
            expected: "a list of parameters",
        }),
    }
}
