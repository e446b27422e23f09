//! facesynth-model: Face file storage.
//!
//! Reads and writes Virt-A-Mate appearance JSON, exposing the geometry
//! morphs as a [`facesynth_core::FaceVector`].

pub mod vam;

pub use vam::VamFaceStore;
