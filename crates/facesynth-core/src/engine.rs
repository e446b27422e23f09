//! Parameter-derivation engine.
//!
//! Evaluates a list of [`ParamSpec`]s against one example's landmark
//! observations and face, producing a flat vector of values.

use crate::face::FaceVector;
use crate::landmarks::{average_sizes, LandmarkSet, Size};
use crate::program::{AngleSet, Op, ParamKind, ParamSpec};
use crate::vm::{VmError, Workarea};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Lengths of the input and output vectors of every training example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub inputs: usize,
    pub outputs: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("param {param}: {source}")]
    Param {
        param: String,
        #[source]
        source: VmError,
    },
    #[error("example has no observation for angle {0}")]
    MissingAngle(f64),
    #[error("param {param}: no angle selected")]
    NoAngle { param: String },
    #[error("param {param}: example has no face")]
    MissingFace { param: String },
    #[error("param {param}: example face is not on the base morph schema")]
    SchemaMismatch { param: String },
    #[error("param {param}: no encoding observed at angle {angle}")]
    MissingEncoding { param: String, angle: f64 },
    #[error("param {param}: encodings at angle {angle} differ in length ({expected} vs {actual})")]
    EncodingLength {
        param: String,
        angle: f64,
        expected: usize,
        actual: usize,
    },
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Shape, actual: Shape },
}

/// Landmarks (and optionally a face encoding) seen from one angle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    pub angle: f64,
    #[serde(default)]
    pub landmarks: LandmarkSet,
    #[serde(default)]
    pub encoding: Vec<f64>,
}

/// Everything known about one training example.
#[derive(Debug, Clone, Default)]
pub struct Example {
    pub observations: Vec<Observation>,
    /// Face aligned to the base schema, required by morph-valued parameters.
    pub face: Option<FaceVector>,
}

/// Observations at one angle, reduced to average region sizes.
struct AngleData<'a> {
    angle: f64,
    sizes: HashMap<String, Size>,
    encodings: Vec<&'a [f64]>,
}

pub struct ParamEngine<'a> {
    specs: &'a [ParamSpec],
    angles: &'a AngleSet,
    base: &'a FaceVector,
    face: Option<&'a FaceVector>,
    per_angle: Vec<AngleData<'a>>,
}

impl<'a> ParamEngine<'a> {
    pub fn new(
        specs: &'a [ParamSpec],
        angles: &'a AngleSet,
        example: &'a Example,
        base: &'a FaceVector,
    ) -> Self {
        let mut grouped: Vec<(f64, Vec<&'a Observation>)> = Vec::new();
        for obs in &example.observations {
            match grouped.iter_mut().find(|(a, _)| *a == obs.angle) {
                Some((_, group)) => group.push(obs),
                None => grouped.push((obs.angle, vec![obs])),
            }
        }
        let per_angle = grouped
            .into_iter()
            .map(|(angle, group)| AngleData {
                angle,
                sizes: average_sizes(group.iter().map(|o| &o.landmarks)),
                encodings: group
                    .iter()
                    .filter(|o| !o.encoding.is_empty())
                    .map(|o| o.encoding.as_slice())
                    .collect(),
            })
            .collect();

        Self {
            specs,
            angles,
            base,
            face: example.face.as_ref(),
            per_angle,
        }
    }

    fn angle_data(&self, angle: f64) -> Option<&AngleData<'a>> {
        self.per_angle.iter().find(|d| d.angle == angle)
    }

    /// Evaluate every spec in order. Any failure discards the whole vector.
    pub fn evaluate(&self) -> Result<Vec<f64>, EvalError> {
        if let Some(&missing) = self
            .angles
            .as_slice()
            .iter()
            .find(|&&a| self.angle_data(a).is_none())
        {
            return Err(EvalError::MissingAngle(missing));
        }

        let mut values = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            match spec.kind() {
                ParamKind::Scalar => {
                    let v = self.eval_scalar(spec).map_err(|source| EvalError::Param {
                        param: spec.name().to_string(),
                        source,
                    })?;
                    values.push(v);
                }
                ParamKind::Encoding => values.extend(self.eval_encoding(spec)?),
                ParamKind::Morphs => values.extend_from_slice(self.eval_morphs(spec)?),
            }
        }
        tracing::debug!(specs = self.specs.len(), values = values.len(), "evaluated parameters");
        Ok(values)
    }

    fn sizes_at(&self, angle: f64) -> Result<HashMap<String, Size>, VmError> {
        self.angle_data(angle)
            .map(|d| d.sizes.clone())
            .ok_or(VmError::MissingAngle(angle))
    }

    fn eval_scalar(&self, spec: &ParamSpec) -> Result<f64, VmError> {
        let mut work = match spec.angles().next() {
            Some(angle) => Workarea::new(self.sizes_at(angle)?),
            None => Workarea::default(),
        };
        let mut output = None;
        for step in spec.steps() {
            match step {
                Op::Angle(angle) => work.landmarks = self.sizes_at(*angle)?,
                _ => {
                    if let Some(v) = work.execute(step)? {
                        output = Some(v);
                    }
                }
            }
        }
        // ParamSpec::new guarantees a value-producing step for scalar kinds.
        output.ok_or_else(|| VmError::UndefinedVariable(crate::program::RESULT_VARIABLE.into()))
    }

    fn eval_encoding(&self, spec: &ParamSpec) -> Result<Vec<f64>, EvalError> {
        let param = || spec.name().to_string();
        let angle = spec
            .angles()
            .last()
            .ok_or_else(|| EvalError::NoAngle { param: param() })?;
        let data = self.angle_data(angle).ok_or(EvalError::MissingAngle(angle))?;
        let (first, rest) = data
            .encodings
            .split_first()
            .ok_or_else(|| EvalError::MissingEncoding {
                param: param(),
                angle,
            })?;

        let mut mean = first.to_vec();
        for enc in rest {
            if enc.len() != mean.len() {
                return Err(EvalError::EncodingLength {
                    param: param(),
                    angle,
                    expected: mean.len(),
                    actual: enc.len(),
                });
            }
            for (m, v) in mean.iter_mut().zip(enc.iter()) {
                *m += v;
            }
        }
        let n = data.encodings.len() as f64;
        mean.iter_mut().for_each(|m| *m /= n);
        Ok(mean)
    }

    fn eval_morphs(&self, spec: &ParamSpec) -> Result<&'a [f64], EvalError> {
        let face = self.face.ok_or_else(|| EvalError::MissingFace {
            param: spec.name().to_string(),
        })?;
        if !face.same_schema(self.base) {
            return Err(EvalError::SchemaMismatch {
                param: spec.name().to_string(),
            });
        }
        Ok(face.values())
    }
}
