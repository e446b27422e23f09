//! Example files: landmark observations for one face, plus the face itself.
//!
//! ```json
//! { "face": "faces/0001.json",
//!   "observations": [ { "angle": 0, "landmarks": { "nose": [[1, 2], [3, 4]] },
//!                       "encoding": [0.1, 0.2] } ] }
//! ```

use anyhow::{Context, Result};
use facesynth_core::{Example, FaceStore, FaceVector, Observation};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct ExampleFile {
    face: Option<PathBuf>,
    #[serde(default)]
    observations: Vec<Observation>,
}

/// Read an example and align its face (if any) to `base`.
pub fn load<S: FaceStore>(path: &Path, base: &FaceVector, store: &S) -> Result<Example> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading example {}", path.display()))?;
    let file: ExampleFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing example {}", path.display()))?;

    let face = match file.face {
        Some(rel) => {
            let face_path = path.parent().unwrap_or_else(|| Path::new("")).join(rel);
            let mut face = store
                .load(&face_path)
                .with_context(|| format!("loading face {}", face_path.display()))?;
            face.match_morphs(base)
                .with_context(|| format!("aligning face {}", face_path.display()))?;
            Some(face)
        }
        None => None,
    };

    Ok(Example {
        observations: file.observations,
        face,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facesynth_model::VamFaceStore;

    const BASE: &str = r#"{"storables":[{"id":"geometry","morphs":[
        {"name":"jaw","value":"0.5","animatable":"true"},
        {"name":"brow","value":"0.5","animatable":"true"}]}]}"#;

    #[test]
    fn test_load_resolves_face_relative_to_example() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VamFaceStore::default();
        let base = store.parse(BASE).unwrap();

        std::fs::create_dir(tmp.path().join("faces")).unwrap();
        std::fs::write(
            tmp.path().join("faces/a.json"),
            r#"{"storables":[{"id":"geometry","morphs":[
                {"name":"brow","value":"0.2"},
                {"name":"jaw","value":"0.9"},
                {"name":"extra","value":"1"}]}]}"#,
        )
        .unwrap();
        let path = tmp.path().join("a.json");
        std::fs::write(
            &path,
            r#"{"face":"faces/a.json","observations":[
                {"angle":0,"landmarks":{"nose":[[0,0],[4,2]]},"encoding":[0.5]}]}"#,
        )
        .unwrap();

        let example = load(&path, &base, &store).unwrap();
        assert_eq!(example.observations.len(), 1);
        let face = example.face.unwrap();
        assert!(face.same_schema(&base));
        assert_eq!(face.values(), &[0.9, 0.2]);
    }

    #[test]
    fn test_load_without_face() {
        let tmp = tempfile::tempdir().unwrap();
        let base = VamFaceStore::default().parse(BASE).unwrap();
        let path = tmp.path().join("b.json");
        std::fs::write(&path, r#"{"observations":[]}"#).unwrap();

        let example = load(&path, &base, &VamFaceStore::default()).unwrap();
        assert!(example.face.is_none());
        assert!(example.observations.is_empty());
    }

    #[test]
    fn test_load_missing_face_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let base = VamFaceStore::default().parse(BASE).unwrap();
        let path = tmp.path().join("c.json");
        std::fs::write(&path, r#"{"face":"nope.json","observations":[]}"#).unwrap();

        assert!(load(&path, &base, &VamFaceStore::default()).is_err());
    }
}
