use facesynth_core::variation::{
    DEFAULT_NUM_FACES, DEFAULT_POPULATION_CAP, DEFAULT_P_MATE, DEFAULT_P_MUTATE,
    DEFAULT_ROTATE_INTERVAL,
};
use facesynth_core::VariationConfig;
use std::path::PathBuf;

/// Generator defaults, loaded from environment variables.
pub struct Settings {
    /// Root for numbered output directories (default: ./output).
    pub output_dir: PathBuf,
    /// Number of faces to generate before stopping.
    pub num_faces: usize,
    /// Faces written per output directory.
    pub rotate_interval: usize,
    pub p_mutate: f64,
    pub p_mate: f64,
    /// Population size after which children replace random members.
    pub population_cap: usize,
    /// RNG seed for reproducible runs; entropy when unset.
    pub seed: Option<u64>,
}

impl Settings {
    /// Load settings from `FACESYNTH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            output_dir: std::env::var("FACESYNTH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("output")),
            num_faces: env_parse("FACESYNTH_NUM_FACES").unwrap_or(DEFAULT_NUM_FACES),
            rotate_interval: env_parse("FACESYNTH_ROTATE_INTERVAL")
                .unwrap_or(DEFAULT_ROTATE_INTERVAL),
            p_mutate: env_parse("FACESYNTH_P_MUTATE").unwrap_or(DEFAULT_P_MUTATE),
            p_mate: env_parse("FACESYNTH_P_MATE").unwrap_or(DEFAULT_P_MATE),
            population_cap: env_parse("FACESYNTH_POPULATION_CAP")
                .unwrap_or(DEFAULT_POPULATION_CAP),
            seed: env_parse("FACESYNTH_SEED"),
        }
    }

    pub fn variation_config(&self) -> VariationConfig {
        VariationConfig {
            output_root: self.output_dir.clone(),
            num_faces: self.num_faces,
            p_mutate: self.p_mutate,
            p_mate: self.p_mate,
            population_cap: self.population_cap,
            rotate_interval: self.rotate_interval,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
