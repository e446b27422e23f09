//! Persistence seam for face files.
//!
//! The core never knows the on-disk face format; loaders and the variation
//! generator go through a [`FaceStore`].

use crate::face::{FaceError, FaceVector};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed face file: {0}")]
    Malformed(String),
    #[error(transparent)]
    Face(#[from] FaceError),
}

/// Reads and writes face files.
pub trait FaceStore {
    /// Load every morph in the file, animatable or not.
    fn load(&self, path: &Path) -> Result<FaceVector, FaceStoreError>;

    /// Serialize `face` to `path`. Readers must never observe a partial file.
    fn save(&self, face: &FaceVector, path: &Path) -> Result<(), FaceStoreError>;
}
