use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facesynth_core::{load_seeds, Config, FaceStore, TrainingVector, VariationGenerator};
use facesynth_model::VamFaceStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

mod example_file;
mod settings;

#[derive(Parser)]
#[command(name = "facesynth", about = "Face training data synthesis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate face variations from a directory of seed faces
    Variations {
        /// Directory containing seed face JSON files
        #[arg(long)]
        input: PathBuf,
        /// Face JSON with the relevant morphs marked animatable
        #[arg(long)]
        base: PathBuf,
        /// Directory to write output faces to [env: FACESYNTH_OUTPUT_DIR]
        #[arg(long)]
        output: Option<PathBuf>,
        /// Number of faces to generate before stopping [env: FACESYNTH_NUM_FACES]
        #[arg(long)]
        num_faces: Option<usize>,
        /// Faces per output directory [env: FACESYNTH_ROTATE_INTERVAL]
        #[arg(long)]
        rotate_interval: Option<usize>,
        /// Probability of mutating a child [env: FACESYNTH_P_MUTATE]
        #[arg(long)]
        p_mutate: Option<f64>,
        /// Probability of mating a child with a second face [env: FACESYNTH_P_MATE]
        #[arg(long)]
        p_mate: Option<f64>,
        /// Maximum faces kept in memory as parents [env: FACESYNTH_POPULATION_CAP]
        #[arg(long)]
        population_cap: Option<usize>,
        /// RNG seed for a reproducible run [env: FACESYNTH_SEED]
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Derive training parameters for every example file in a directory
    Params {
        /// Training configuration JSON
        #[arg(short, long)]
        config: PathBuf,
        /// Directory of example JSON files
        #[arg(long)]
        examples: PathBuf,
        /// JSON lines file to write
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show the angles and parameters a configuration needs
    Angles {
        /// Training configuration JSON
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct Record<'a> {
    example: &'a Path,
    #[serde(flatten)]
    vector: &'a TrainingVector,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = VamFaceStore::default();

    match cli.command {
        Commands::Variations {
            input,
            base,
            output,
            num_faces,
            rotate_interval,
            p_mutate,
            p_mate,
            population_cap,
            seed,
        } => {
            let settings = settings::Settings::from_env();
            let mut config = settings.variation_config();
            if let Some(v) = output {
                config.output_root = v;
            }
            if let Some(v) = num_faces {
                config.num_faces = v;
            }
            if let Some(v) = rotate_interval {
                config.rotate_interval = v;
            }
            if let Some(v) = p_mutate {
                config.p_mutate = v;
            }
            if let Some(v) = p_mate {
                config.p_mate = v;
            }
            if let Some(v) = population_cap {
                config.population_cap = v;
            }
            let rng = match seed.or(settings.seed) {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_entropy(),
            };

            let mut base_face = store
                .load(&base)
                .with_context(|| format!("loading base face {}", base.display()))?;
            base_face.trim_to_animatable();

            let seeds = load_seeds(&input, &base_face, &store)?;
            if seeds.items.is_empty() {
                bail!("no starting point faces were loaded from {}", input.display());
            }

            let mut generator = VariationGenerator::new(config, seeds.items, &store, rng)?;
            let count = generator.run()?;
            println!("Generated {count} faces");
        }
        Commands::Params {
            config,
            examples,
            output,
        } => run_params(&config, &examples, &output, &store)?,
        Commands::Angles { config } => {
            let config = Config::load(&config, &store)
                .with_context(|| format!("loading config {}", config.display()))?;
            println!("Angles: {:?}", config.angles().as_slice());
            for (section, specs) in [("inputs", config.inputs()), ("outputs", config.outputs())] {
                println!("{section}:");
                for spec in specs {
                    println!(
                        "  {} ({:?}, {} steps)",
                        spec.name(),
                        spec.kind(),
                        spec.steps().len()
                    );
                }
            }
            for warning in config.warnings() {
                println!("skipped: {warning}");
            }
        }
    }

    Ok(())
}

fn run_params(
    config_path: &Path,
    examples: &Path,
    output: &Path,
    store: &VamFaceStore,
) -> Result<()> {
    let mut config = Config::load(config_path, store)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(examples)
        .with_context(|| format!("reading examples from {}", examples.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let file = std::fs::File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);
    let (mut written, mut failed) = (0usize, 0usize);

    for path in &paths {
        let vector = example_file::load(path, config.base_face(), store)
            .and_then(|example| Ok(config.generate_params(&example)?));
        match vector {
            Ok(vector) => {
                let record = Record {
                    example: path,
                    vector: &vector,
                };
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            Err(e) => {
                tracing::error!(
                    example = %path.display(),
                    error = %format!("{e:#}"),
                    "skipping example"
                );
                failed += 1;
            }
        }
    }
    out.flush()?;

    tracing::info!(written, failed, shape = ?config.shape(), "parameter generation finished");
    println!("Wrote {written} examples to {} ({failed} failed)", output.display());
    if written == 0 && failed > 0 {
        bail!("no example produced parameters ({failed} failed)");
    }
    Ok(())
}
