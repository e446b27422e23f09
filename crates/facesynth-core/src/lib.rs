//! facesynth-core: Training data synthesis for face-parameter models.
//!
//! Two independent halves share the [`FaceVector`] data model:
//! the parameter engine turns landmark measurements into fixed-shape
//! feature vectors, and the variation generator grows a seed set of faces
//! into a large corpus by mutation and mating.

pub mod config;
pub mod engine;
pub mod face;
pub mod landmarks;
pub mod program;
pub mod store;
pub mod variation;
pub mod vm;

pub use config::{Config, ConfigError, TrainingVector, CONFIG_VERSION};
pub use engine::{EvalError, Example, Observation, ParamEngine, Shape};
pub use face::{FaceError, FaceVector, MorphSchema, MorphSlot};
pub use landmarks::{average_sizes, LandmarkSet, Size};
pub use program::{AngleSet, Loaded, ParamParseWarning, ParamSpec};
pub use store::{FaceStore, FaceStoreError};
pub use variation::{
    load_seeds, Population, SeedLoadError, VariationConfig, VariationError, VariationGenerator,
};
pub use vm::{VmError, Workarea};
