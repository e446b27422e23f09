//! Schema-bound morph vectors.
//!
//! A [`FaceVector`] is an ordered list of morph values, one per slot of a
//! shared [`MorphSchema`]. Vectors that are mated or derived from each other
//! must share the same schema; loaded faces are brought onto the base schema
//! with [`FaceVector::match_morphs`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Range used for morphs whose source file carries no bounds.
pub const DEFAULT_MORPH_MIN: f64 = 0.0;
pub const DEFAULT_MORPH_MAX: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceError {
    #[error("morph {name}: invalid range [{min}, {max}]")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("morph {name}: value {value} is not finite")]
    NonFiniteValue { name: String, value: f64 },
    #[error("duplicate morph name: {0}")]
    DuplicateMorph(String),
    #[error("slot count mismatch: schema has {expected} slots, got {actual} values")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("face is missing morph {0} required by the base schema")]
    MissingMorph(String),
    #[error("slot index {index} out of range for {len} slots")]
    SlotOutOfRange { index: usize, len: usize },
}

/// One named morph slot and its valid range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphSlot {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub animatable: bool,
}

impl MorphSlot {
    pub fn new(name: impl Into<String>, min: f64, max: f64, animatable: bool) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            animatable,
        }
    }
}

/// Ordered slot definitions shared by every vector built on them.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphSchema {
    slots: Vec<MorphSlot>,
}

impl MorphSchema {
    /// Build a schema, rejecting duplicate names and inverted or non-finite ranges.
    pub fn new(slots: Vec<MorphSlot>) -> Result<Self, FaceError> {
        let mut seen = std::collections::HashSet::with_capacity(slots.len());
        for slot in &slots {
            if !slot.min.is_finite() || !slot.max.is_finite() || slot.min > slot.max {
                return Err(FaceError::InvalidRange {
                    name: slot.name.clone(),
                    min: slot.min,
                    max: slot.max,
                });
            }
            if !seen.insert(slot.name.as_str()) {
                return Err(FaceError::DuplicateMorph(slot.name.clone()));
            }
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[MorphSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }
}

/// Morph values bound to a schema. Cloning yields an independent vector that
/// shares only the (immutable) schema.
#[derive(Debug, Clone)]
pub struct FaceVector {
    schema: Arc<MorphSchema>,
    values: Vec<f64>,
}

impl FaceVector {
    pub fn new(schema: Arc<MorphSchema>, values: Vec<f64>) -> Result<Self, FaceError> {
        if values.len() != schema.len() {
            return Err(FaceError::LengthMismatch {
                expected: schema.len(),
                actual: values.len(),
            });
        }
        for (slot, &value) in schema.slots().iter().zip(&values) {
            if !value.is_finite() {
                return Err(FaceError::NonFiniteValue {
                    name: slot.name.clone(),
                    value,
                });
            }
        }
        Ok(Self { schema, values })
    }

    /// Build a schema and vector together from `(slot, value)` pairs.
    pub fn from_slots(entries: Vec<(MorphSlot, f64)>) -> Result<Self, FaceError> {
        let (slots, values): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        Self::new(Arc::new(MorphSchema::new(slots)?), values)
    }

    pub fn schema(&self) -> &Arc<MorphSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when both vectors are bound to the same schema.
    pub fn same_schema(&self, other: &FaceVector) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema) || *self.schema == *other.schema
    }

    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn set_value(&mut self, index: usize, value: f64) -> Result<(), FaceError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(FaceError::SlotOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    /// Restrict the vector (and its schema) to animatable slots.
    pub fn trim_to_animatable(&mut self) {
        let (slots, values): (Vec<_>, Vec<_>) = self
            .schema
            .slots()
            .iter()
            .zip(&self.values)
            .filter(|(slot, _)| slot.animatable)
            .map(|(slot, &v)| (slot.clone(), v))
            .unzip();
        // Subset of a valid schema stays valid.
        self.schema = Arc::new(MorphSchema { slots });
        self.values = values;
    }

    /// Align this vector onto `base`'s schema.
    ///
    /// Values are picked by morph name in base order. Morphs the base does not
    /// know are dropped; a base morph missing here is an error.
    pub fn match_morphs(&mut self, base: &FaceVector) -> Result<(), FaceError> {
        let mut values = Vec::with_capacity(base.len());
        for slot in base.schema.slots() {
            let idx = self
                .schema
                .position(&slot.name)
                .ok_or_else(|| FaceError::MissingMorph(slot.name.clone()))?;
            values.push(self.values[idx]);
        }
        self.schema = Arc::clone(&base.schema);
        self.values = values;
        Ok(())
    }

    /// Replace per-slot bounds with values taken, by morph name, from the
    /// given min/max faces. Slots absent from a bounds face keep their range.
    pub fn apply_bounds(
        &mut self,
        min_face: Option<&FaceVector>,
        max_face: Option<&FaceVector>,
    ) -> Result<(), FaceError> {
        let lookup = |face: Option<&FaceVector>, name: &str| {
            face.and_then(|f| f.schema.position(name).map(|i| f.values[i]))
        };
        let slots = self
            .schema
            .slots()
            .iter()
            .map(|slot| {
                let mut slot = slot.clone();
                if let Some(min) = lookup(min_face, &slot.name) {
                    slot.min = min;
                }
                if let Some(max) = lookup(max_face, &slot.name) {
                    slot.max = max;
                }
                slot
            })
            .collect();
        self.schema = Arc::new(MorphSchema::new(slots)?);
        Ok(())
    }

    /// Resample one slot uniformly within its range.
    pub fn randomize_slot<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        rng: &mut R,
    ) -> Result<(), FaceError> {
        let len = self.values.len();
        let slot = self
            .schema
            .slots()
            .get(index)
            .ok_or(FaceError::SlotOutOfRange { index, len })?;
        self.values[index] = if slot.min < slot.max {
            rng.gen_range(slot.min..=slot.max)
        } else {
            slot.min
        };
        Ok(())
    }
}
