use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coco_augment::config::{AugmentConfig, DimensionMode, OutputMode, OutputPaths};
use coco_augment::core_modules::utils::image_helper::image_helper;
use coco_augment::pipeline::DebugInspection;
use coco_augment::{AugmentationPipeline, Dataset, DatasetWriter, GeneratedSamples, ParallelPipeline, RunOutcome, logging};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Bounding-box-aware augmentation for COCO-style detection datasets
#[derive(Parser, Debug)]
#[command(name = "coco_augment")]
#[command(version)]
#[command(about = "Grow a COCO-style dataset with randomly transformed copies of every labeled object", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Augment every annotation and write the merged dataset
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        overrides: Overrides,

        /// Stop after the first annotation and save its last sample for inspection
        #[arg(long)]
        debug: bool,

        /// Where debug mode writes the inspection image
        #[arg(long, default_value = "debug_inspection.png")]
        debug_output: PathBuf,
    },

    /// Validate the configuration against a dataset without writing anything
    Check {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Source annotation file (COCO JSON)
    #[arg(short, long)]
    annotations: PathBuf,

    /// Directory holding the source images
    #[arg(short, long)]
    images: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Transform attempts per annotation
    #[arg(short, long)]
    repetitions: Option<u32>,

    /// Minimum visible fraction of the original box (0, 1]
    #[arg(long)]
    min_visibility: Option<f64>,

    /// First id for generated images
    #[arg(long)]
    image_id_base: Option<u64>,

    /// First id for generated annotations
    #[arg(long)]
    annotation_id_base: Option<u64>,

    /// Overwrite the source annotation file and write images beside the sources
    #[arg(long)]
    in_place: bool,

    /// Record the real size of generated images instead of the nominal one
    #[arg(long)]
    measured_dimensions: bool,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Augment annotations on a worker pool
    #[arg(long)]
    parallel: bool,

    /// Worker count for --parallel
    #[arg(long)]
    workers: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut AugmentConfig) {
        if let Some(repetitions) = self.repetitions {
            config.repetitions = repetitions;
        }
        if let Some(min_visibility) = self.min_visibility {
            config.min_visibility = min_visibility;
        }
        if let Some(base) = self.image_id_base {
            config.image_id_base = base;
        }
        if let Some(base) = self.annotation_id_base {
            config.annotation_id_base = base;
        }
        if self.in_place {
            config.output_mode = OutputMode::InPlace;
        }
        if self.measured_dimensions {
            config.dimension_mode = DimensionMode::Measured;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.parallel {
            config.parallel = true;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match cli.command {
        Commands::Run {
            input,
            overrides,
            debug,
            debug_output,
        } => {
            let (config, dataset) = prepare(&input, &overrides)?;
            run(&config, &dataset, &input, debug, &debug_output)
        }
        Commands::Check { input, overrides } => {
            let (config, dataset) = prepare(&input, &overrides)?;
            let paths = OutputPaths::resolve(config.output_mode, &input.annotations, &input.images);
            println!("configuration is valid for {}", input.annotations.display());
            println!("  annotations:      {}", dataset.annotations.len());
            println!("  images:           {}", dataset.images.len());
            println!("  next image id:    {}", config.image_id_base);
            println!("  next annotation:  {}", config.annotation_id_base);
            println!("  output dataset:   {}", paths.annotations.display());
            println!("  output images:    {}", paths.images.display());
            Ok(())
        }
    }
}

/// Loads and validates everything a run needs before any image is touched.
fn prepare(input: &InputArgs, overrides: &Overrides) -> Result<(AugmentConfig, Dataset)> {
    let mut config = match &input.config {
        Some(path) => AugmentConfig::from_toml_file(path)?,
        None => AugmentConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;

    let dataset = Dataset::load(&input.annotations)
        .with_context(|| format!("Failed to load dataset {}", input.annotations.display()))?;
    config.validate_against(&dataset)?;
    Ok((config, dataset))
}

fn run(config: &AugmentConfig, dataset: &Dataset, input: &InputArgs, debug: bool, debug_output: &Path) -> Result<()> {
    if debug {
        if config.parallel {
            warn!("debug mode runs sequentially; ignoring --parallel");
        }
        let mut pipeline = AugmentationPipeline::from_config(config, &input.images).with_debug(true);
        return match pipeline.run(dataset, config.repetitions)? {
            RunOutcome::Debug(inspection) => save_inspection(&inspection, debug_output),
            RunOutcome::Completed(_) => {
                warn!("no annotation had a readable image; nothing to inspect");
                Ok(())
            }
        };
    }

    let paths = OutputPaths::resolve(config.output_mode, &input.annotations, &input.images);
    paths.prepare().context("Failed to create output directories")?;

    let generated = if config.parallel {
        run_parallel(config, dataset, &input.images)?
    } else {
        let mut pipeline = AugmentationPipeline::from_config(config, &input.images);
        match pipeline.run(dataset, config.repetitions)? {
            RunOutcome::Completed(generated) => generated,
            RunOutcome::Debug(_) => anyhow::bail!("debug outcome from a non-debug run"),
        }
    };

    let persisted = DatasetWriter::from_config(config)
        .write(&generated, dataset, &paths)
        .context("Failed to write augmented dataset")?;
    info!(
        generated = generated.len(),
        skipped = generated.skipped.len(),
        output = %persisted.annotations_path.display(),
        "done"
    );
    Ok(())
}

fn run_parallel(config: &AugmentConfig, dataset: &Dataset, images: &Path) -> Result<GeneratedSamples> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    let generated = runtime.block_on(async {
        let mut pipeline = ParallelPipeline::from_config(config, images);
        pipeline.run(dataset, config.repetitions).await
    })?;
    Ok(generated)
}

fn save_inspection(inspection: &DebugInspection, output: &Path) -> Result<()> {
    info!(
        annotation_id = inspection.source.id,
        attempts = inspection.attempts,
        accepted = inspection.accepted,
        "debug inspection"
    );
    let Some(sample) = &inspection.last else {
        warn!(annotation_id = inspection.source.id, "every attempt was rejected; nothing to render");
        return Ok(());
    };
    let rendered = image_helper::draw_bbox(&sample.image, &sample.bbox);
    image_helper::save(output, &rendered)?;
    println!(
        "category {} bbox [{:.1}, {:.1}, {:.1}, {:.1}] via {:?} -> {}",
        sample.category_id,
        sample.bbox.x,
        sample.bbox.y,
        sample.bbox.width,
        sample.bbox.height,
        sample.applied,
        output.display()
    );
    Ok(())
}
