//! Face variation generator.
//!
//! Grows a seed set of faces into a large training corpus. Each accepted
//! child is a clone of a random population member, optionally crossed with a
//! second member and optionally mutated, then saved and fed back into the
//! (bounded) population.

use crate::face::{FaceError, FaceVector};
use crate::program::Loaded;
use crate::store::{FaceStore, FaceStoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_NUM_FACES: usize = 10_000;
pub const DEFAULT_P_MUTATE: f64 = 0.6;
pub const DEFAULT_P_MATE: f64 = 0.7;
pub const DEFAULT_POPULATION_CAP: usize = 10_000;
pub const DEFAULT_ROTATE_INTERVAL: usize = 1_000;

/// Upper bound (inclusive) on slot draws per mutation.
pub const MAX_MUTATIONS: usize = 50;

const PROGRESS_INTERVAL: usize = 500;
const MAX_OUTPUT_DIRS: u32 = 10_000;
const FILE_TAG_MAX: u32 = 99_999;

#[derive(Error, Debug)]
pub enum VariationError {
    #[error("invalid variation config: {0}")]
    InvalidConfig(String),
    #[error("no seed faces were loaded")]
    EmptyPopulation,
    #[error("base schema has no morph slots")]
    EmptySchema,
    #[error("morph schema mismatch: child has {child} slots, donor has {donor}")]
    SchemaMismatch { child: usize, donor: usize },
    #[error("failed to read seed directory {path}: {source}")]
    SeedDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't find unused output directory under {0}")]
    NoFreeDirectory(PathBuf),
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: FaceStoreError,
    },
    #[error(transparent)]
    Face(#[from] FaceError),
}

/// A seed file that could not be used. The run continues without it.
#[derive(Error, Debug)]
#[error("error loading {path}: {source}")]
pub struct SeedLoadError {
    pub path: PathBuf,
    #[source]
    pub source: FaceStoreError,
}

/// Driving parameters for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationConfig {
    /// Root under which numbered output directories are created.
    pub output_root: PathBuf,
    /// Number of children to generate before stopping.
    pub num_faces: usize,
    pub p_mutate: f64,
    pub p_mate: f64,
    /// Population size after which new children replace random members.
    pub population_cap: usize,
    /// Children written per output directory.
    pub rotate_interval: usize,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            num_faces: DEFAULT_NUM_FACES,
            p_mutate: DEFAULT_P_MUTATE,
            p_mate: DEFAULT_P_MATE,
            population_cap: DEFAULT_POPULATION_CAP,
            rotate_interval: DEFAULT_ROTATE_INTERVAL,
        }
    }
}

impl VariationConfig {
    pub fn validate(&self) -> Result<(), VariationError> {
        for (name, p) in [("p_mutate", self.p_mutate), ("p_mate", self.p_mate)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(VariationError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if self.population_cap == 0 {
            return Err(VariationError::InvalidConfig(
                "population_cap must be at least 1".into(),
            ));
        }
        if self.rotate_interval == 0 {
            return Err(VariationError::InvalidConfig(
                "rotate_interval must be at least 1".into(),
            ));
        }
        if self.num_faces > 0 && self.p_mutate == 0.0 && self.p_mate == 0.0 {
            return Err(VariationError::InvalidConfig(
                "p_mutate and p_mate are both 0; no child could ever be produced".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded pool of faces that parents are drawn from.
#[derive(Debug, Clone)]
pub struct Population {
    members: Vec<FaceVector>,
    cap: usize,
}

impl Population {
    pub fn new(members: Vec<FaceVector>, cap: usize) -> Self {
        Self { members, cap }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[FaceVector] {
        &self.members
    }

    /// Uniformly random member. The population must not be empty.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &FaceVector {
        &self.members[rng.gen_range(0..self.members.len())]
    }

    /// Append below the cap; at the cap, overwrite a random member.
    pub fn insert<R: Rng + ?Sized>(&mut self, face: FaceVector, rng: &mut R) {
        if self.members.len() >= self.cap && !self.members.is_empty() {
            let idx = rng.gen_range(0..self.members.len());
            self.members[idx] = face;
        } else {
            self.members.push(face);
        }
    }
}

/// Copy the donor's value into `child` at `count` randomly drawn slots.
///
/// Draws may repeat, so at most `count` slots change.
pub fn mate<R: Rng + ?Sized>(
    child: &mut FaceVector,
    donor: &FaceVector,
    count: usize,
    rng: &mut R,
) -> Result<(), VariationError> {
    if child.len() != donor.len() || !child.same_schema(donor) {
        return Err(VariationError::SchemaMismatch {
            child: child.len(),
            donor: donor.len(),
        });
    }
    if child.is_empty() {
        return Ok(());
    }
    for _ in 0..count {
        let idx = rng.gen_range(0..donor.len());
        child.set_value(idx, donor.values()[idx])?;
    }
    Ok(())
}

/// Resample `count` randomly drawn slots within their ranges.
pub fn mutate<R: Rng + ?Sized>(
    face: &mut FaceVector,
    count: usize,
    rng: &mut R,
) -> Result<(), VariationError> {
    if face.is_empty() {
        return Ok(());
    }
    for _ in 0..count {
        let idx = rng.gen_range(0..face.len());
        face.randomize_slot(idx, rng)?;
    }
    Ok(())
}

/// Hands out numbered subdirectories of an output root, never reusing one.
#[derive(Debug)]
pub struct DirRotator {
    root: PathBuf,
    next: u32,
}

impl DirRotator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create and return the first unused directory after the last one handed out.
    pub fn next_dir(&mut self) -> Result<PathBuf, VariationError> {
        std::fs::create_dir_all(&self.root).map_err(|source| VariationError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        for i in self.next..MAX_OUTPUT_DIRS {
            let dir = self.root.join(i.to_string());
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    self.next = i + 1;
                    tracing::debug!(dir = %dir.display(), "rotated output directory");
                    return Ok(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(VariationError::CreateDir { path: dir, source }),
            }
        }
        Err(VariationError::NoFreeDirectory(self.root.clone()))
    }
}

/// Load every `*.json` face in `dir` (in path order) and align it to `base`.
///
/// Unreadable or incompatible files are reported and left out.
pub fn load_seeds<S: FaceStore + ?Sized>(
    dir: &Path,
    base: &FaceVector,
    store: &S,
) -> Result<Loaded<FaceVector, SeedLoadError>, VariationError> {
    let read_err = |source| VariationError::SeedDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    tracing::info!(dir = %dir.display(), files = paths.len(), "loading seed faces");
    let mut loaded = Loaded::default();
    for path in paths {
        let result = store.load(&path).and_then(|mut face| {
            face.match_morphs(base)?;
            Ok(face)
        });
        match result {
            Ok(face) => loaded.items.push(face),
            Err(source) => {
                let err = SeedLoadError { path, source };
                tracing::warn!(error = %err, "skipping seed face");
                loaded.warnings.push(err);
            }
        }
    }
    tracing::info!(
        loaded = loaded.items.len(),
        skipped = loaded.warnings.len(),
        "loaded seed faces"
    );
    Ok(loaded)
}

/// Runs the mutate/mate loop and writes each child through a [`FaceStore`].
pub struct VariationGenerator<'s, S: FaceStore + ?Sized, R: Rng> {
    config: VariationConfig,
    population: Population,
    store: &'s S,
    rng: R,
    rotator: DirRotator,
}

impl<'s, S: FaceStore + ?Sized, R: Rng> VariationGenerator<'s, S, R> {
    /// All seeds must share one non-empty morph schema. Seeds beyond the
    /// population cap are dropped at random.
    pub fn new(
        config: VariationConfig,
        mut seeds: Vec<FaceVector>,
        store: &'s S,
        mut rng: R,
    ) -> Result<Self, VariationError> {
        config.validate()?;
        let first = seeds.first().ok_or(VariationError::EmptyPopulation)?;
        if first.is_empty() {
            return Err(VariationError::EmptySchema);
        }
        if let Some(bad) = seeds.iter().find(|s| !s.same_schema(first)) {
            return Err(VariationError::SchemaMismatch {
                child: first.len(),
                donor: bad.len(),
            });
        }
        if seeds.len() > config.population_cap {
            tracing::warn!(
                seeds = seeds.len(),
                cap = config.population_cap,
                "more seeds than population cap, sampling"
            );
            while seeds.len() > config.population_cap {
                let idx = rng.gen_range(0..seeds.len());
                seeds.swap_remove(idx);
            }
        }
        let rotator = DirRotator::new(config.output_root.clone());
        let population = Population::new(seeds, config.population_cap);
        Ok(Self {
            config,
            population,
            store,
            rng,
            rotator,
        })
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Generate `num_faces` children. Returns the number written.
    pub fn run(&mut self) -> Result<usize, VariationError> {
        let total = self.config.num_faces;
        if total == 0 {
            return Ok(0);
        }
        tracing::info!(
            total,
            seeds = self.population.len(),
            root = %self.rotator.root().display(),
            "generating variations"
        );

        let mut out_dir = self.rotator.next_dir()?;
        let mut next_rotation = self.config.rotate_interval;
        let mut generated = 0usize;

        while generated < total {
            let Some(child) = self.spawn_child()? else {
                continue;
            };

            let tag = self.rng.gen_range(0..=FILE_TAG_MAX);
            let path = out_dir.join(format!("face_variant_{generated}_{tag}.json"));
            self.store
                .save(&child, &path)
                .map_err(|source| VariationError::Persistence { path, source })?;

            self.population.insert(child, &mut self.rng);
            generated += 1;

            if generated % PROGRESS_INTERVAL == 0 {
                tracing::info!(generated, total, "generation progress");
            }
            if generated >= next_rotation && generated < total {
                next_rotation = generated + self.config.rotate_interval;
                out_dir = self.rotator.next_dir()?;
            }
        }

        tracing::info!(
            generated,
            population = self.population.len(),
            "generation complete"
        );
        Ok(generated)
    }

    /// One attempt at a child. `None` when neither mating nor mutation was drawn.
    fn spawn_child(&mut self) -> Result<Option<FaceVector>, VariationError> {
        let parent = self.population.choose(&mut self.rng);
        let do_mate = self.rng.gen_bool(self.config.p_mate);
        let do_mutate = self.rng.gen_bool(self.config.p_mutate);
        if !do_mate && !do_mutate {
            return Ok(None);
        }

        let mut child = parent.clone();
        if do_mate {
            let donor = self.population.choose(&mut self.rng);
            let count = self.rng.gen_range(1..=child.len());
            mate(&mut child, donor, count, &mut self.rng)?;
        }
        if do_mutate {
            let count = self.rng.gen_range(1..=MAX_MUTATIONS);
            mutate(&mut child, count, &mut self.rng)?;
        }
        Ok(Some(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::MorphSlot;
    use crate::store::memory::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seed_face(values: &[f64]) -> FaceVector {
        FaceVector::from_slots(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| (MorphSlot::new(format!("m{i}"), 0.0, 1.0, true), v))
                .collect(),
        )
        .unwrap()
    }

    fn config(root: &Path, num_faces: usize) -> VariationConfig {
        VariationConfig {
            output_root: root.to_path_buf(),
            num_faces,
            p_mutate: 1.0,
            p_mate: 0.0,
            ..VariationConfig::default()
        }
    }

    fn changed(a: &FaceVector, b: &FaceVector) -> usize {
        a.values().iter().zip(b.values()).filter(|(x, y)| x != y).count()
    }

    #[test]
    fn test_defaults() {
        let c = VariationConfig::default();
        assert_eq!((c.p_mutate, c.p_mate), (0.6, 0.7));
        assert_eq!((c.population_cap, c.rotate_interval), (10_000, 1_000));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let bad = [
            VariationConfig {
                p_mate: 1.5,
                ..Default::default()
            },
            VariationConfig {
                p_mutate: -0.1,
                ..Default::default()
            },
            VariationConfig {
                population_cap: 0,
                ..Default::default()
            },
            VariationConfig {
                rotate_interval: 0,
                ..Default::default()
            },
            VariationConfig {
                p_mate: 0.0,
                p_mutate: 0.0,
                ..Default::default()
            },
        ];
        for c in bad {
            assert!(
                matches!(c.validate(), Err(VariationError::InvalidConfig(_))),
                "{c:?}"
            );
        }
    }

    #[test]
    fn test_population_never_exceeds_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pop = Population::new(vec![seed_face(&[0.0])], 10);
        for i in 0..100 {
            pop.insert(seed_face(&[i as f64 / 100.0]), &mut rng);
            assert!(pop.len() <= 10);
        }
        assert_eq!(pop.len(), 10);
    }

    #[test]
    fn test_mate_changes_at_most_k_slots() {
        let mut rng = StdRng::seed_from_u64(2);
        let a = seed_face(&[0.0; 20]);
        let mut b = a.clone();
        for i in 0..20 {
            b.set_value(i, 1.0).unwrap();
        }
        for k in 1..=20 {
            let mut child = a.clone();
            mate(&mut child, &b, k, &mut rng).unwrap();
            let n = changed(&a, &child);
            assert!(n >= 1 && n <= k, "k = {k}, changed = {n}");
        }
    }

    #[test]
    fn test_mate_schema_mismatch() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut child = seed_face(&[0.1, 0.2, 0.3]);
        let donor = seed_face(&[0.1, 0.2]);
        let err = mate(&mut child, &donor, 2, &mut rng).unwrap_err();
        assert!(matches!(err, VariationError::SchemaMismatch { child: 3, donor: 2 }));
    }

    #[test]
    fn test_mutate_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(4);
        let parent = seed_face(&[0.5; 8]);
        for m in [1, 5, MAX_MUTATIONS] {
            let mut child = parent.clone();
            mutate(&mut child, m, &mut rng).unwrap();
            assert!(changed(&parent, &child) <= m);
            assert!(child.values().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_dir_rotation_skips_existing_and_increases() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("0")).unwrap();
        std::fs::create_dir(tmp.path().join("2")).unwrap();

        let mut rotator = DirRotator::new(tmp.path());
        let dirs: Vec<PathBuf> = (0..3).map(|_| rotator.next_dir().unwrap()).collect();
        assert_eq!(
            dirs,
            vec![tmp.path().join("1"), tmp.path().join("3"), tmp.path().join("4")]
        );
    }

    #[test]
    fn test_end_to_end_mutation_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let rng = StdRng::seed_from_u64(5);
        let mut generator = VariationGenerator::new(
            config(tmp.path(), 5),
            vec![seed_face(&[0.1, 0.2, 0.3])],
            &store,
            rng,
        )
        .unwrap();

        assert_eq!(generator.run().unwrap(), 5);
        assert_eq!(generator.population().len(), 6);

        let faces = store.faces.borrow();
        assert_eq!(faces.len(), 5);
        for (path, face) in faces.iter() {
            assert!(path.starts_with(tmp.path().join("0")), "{}", path.display());
            assert_eq!(face.len(), 3);
            assert!(face.values().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_rotation_every_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let cfg = VariationConfig {
            rotate_interval: 2,
            ..config(tmp.path(), 5)
        };
        let seeds = vec![seed_face(&[0.5, 0.5])];
        let mut generator =
            VariationGenerator::new(cfg, seeds, &store, StdRng::seed_from_u64(6)).unwrap();
        generator.run().unwrap();

        let per_dir = |d: &str| {
            store
                .faces
                .borrow()
                .keys()
                .filter(|p| p.parent() == Some(tmp.path().join(d).as_path()))
                .count()
        };
        assert_eq!((per_dir("0"), per_dir("1"), per_dir("2")), (2, 2, 1));
        assert!(!tmp.path().join("3").exists());
    }

    #[test]
    fn test_no_rotation_after_last_face() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let cfg = VariationConfig {
            rotate_interval: 2,
            ..config(tmp.path(), 4)
        };
        let seeds = vec![seed_face(&[0.5, 0.5])];
        let mut generator =
            VariationGenerator::new(cfg, seeds, &store, StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(generator.run().unwrap(), 4);

        let per_dir = |d: &str| {
            store
                .faces
                .borrow()
                .keys()
                .filter(|p| p.parent() == Some(tmp.path().join(d).as_path()))
                .count()
        };
        assert_eq!((per_dir("0"), per_dir("1")), (2, 2));
        assert!(tmp.path().join("0").is_dir());
        assert!(tmp.path().join("1").is_dir());
        assert!(!tmp.path().join("2").exists());
    }

    #[test]
    fn test_seeds_over_cap_are_sampled_down() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let cfg = VariationConfig {
            population_cap: 2,
            ..config(tmp.path(), 10)
        };
        let seeds: Vec<_> = (0..5).map(|i| seed_face(&[i as f64 / 5.0, 0.5])).collect();
        let mut generator =
            VariationGenerator::new(cfg, seeds, &store, StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(generator.population().len(), 2);

        assert_eq!(generator.run().unwrap(), 10);
        assert_eq!(generator.population().len(), 2);
    }

    #[test]
    fn test_run_is_reproducible_with_same_seed() {
        let run = |seed| {
            let tmp = tempfile::tempdir().unwrap();
            let store = MemoryStore::default();
            let cfg = VariationConfig {
                p_mate: 0.7,
                p_mutate: 0.6,
                ..config(tmp.path(), 20)
            };
            let seeds = vec![seed_face(&[0.1, 0.2, 0.3, 0.4]), seed_face(&[0.9, 0.8, 0.7, 0.6])];
            let mut generator =
                VariationGenerator::new(cfg, seeds, &store, StdRng::seed_from_u64(seed)).unwrap();
            generator.run().unwrap();
            let values: Vec<Vec<f64>> = store
                .faces
                .borrow()
                .values()
                .map(|f| f.values().to_vec())
                .collect();
            values
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_persistence_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore {
            fail_saves: true,
            ..Default::default()
        };
        let mut generator = VariationGenerator::new(
            config(tmp.path(), 3),
            vec![seed_face(&[0.5])],
            &store,
            StdRng::seed_from_u64(7),
        )
        .unwrap();
        assert!(matches!(generator.run(), Err(VariationError::Persistence { .. })));
        assert_eq!(generator.population().len(), 1);
    }

    #[test]
    fn test_generator_rejects_bad_seeds() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let rng = || StdRng::seed_from_u64(8);
        assert!(matches!(
            VariationGenerator::new(config(tmp.path(), 1), vec![], &store, rng()),
            Err(VariationError::EmptyPopulation)
        ));
        assert!(matches!(
            VariationGenerator::new(config(tmp.path(), 1), vec![seed_face(&[])], &store, rng()),
            Err(VariationError::EmptySchema)
        ));
        assert!(matches!(
            VariationGenerator::new(
                config(tmp.path(), 1),
                vec![seed_face(&[0.1]), seed_face(&[0.1, 0.2])],
                &store,
                rng()
            ),
            Err(VariationError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_load_seeds_skips_bad_files() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.json", "b.json", "c.json", "notes.txt"] {
            std::fs::write(tmp.path().join(name), "{}").unwrap();
        }
        let base = seed_face(&[0.0, 0.0]);
        let narrow = seed_face(&[0.4]);
        let store = MemoryStore::default();
        store.faces.borrow_mut().insert(tmp.path().join("a.json"), seed_face(&[0.3, 0.7]));
        store.faces.borrow_mut().insert(tmp.path().join("c.json"), narrow);

        let loaded = load_seeds(tmp.path(), &base, &store).unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].values(), &[0.3, 0.7]);
        assert!(loaded.items[0].same_schema(&base));
        let skipped: Vec<_> = loaded.warnings.iter().map(|w| w.path.clone()).collect();
        assert_eq!(skipped, vec![tmp.path().join("b.json"), tmp.path().join("c.json")]);
    }
}
