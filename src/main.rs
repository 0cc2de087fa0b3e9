//! organ-refine CLI
//!
//! Refines a directory of cases in parallel, a single case, or merges mask
//! files into the fixed class map used by visualisation tools.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use organ_refine::batch::run_batch;
use organ_refine::case::process_case;
use organ_refine::class_map::merge_segmentations;
use organ_refine::{load_config, RefineConfig};

#[derive(Parser)]
#[command(
    name = "organ-refine",
    version,
    about = "Anatomical refinement of multi-organ CT segmentations",
    after_help = "EXAMPLES:\n  \
                  organ-refine refine --input cases/ --output refined/ --workers 8\n  \
                  organ-refine case cases/BDMAP_0001 --output refined/\n  \
                  organ-refine merge --input cases/BDMAP_0001/segmentations \\\n    \
                  --reference cases/BDMAP_0001/ct.nii.gz --output label/merged_labels.nii.gz"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Refine every case directory under the input root
    Refine {
        /// Directory containing one sub-directory per case
        #[arg(short, long)]
        input: PathBuf,
        /// Output root; each case is written to <output>/<case>
        #[arg(short, long)]
        output: PathBuf,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of cases processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Refine a single case directory
    Case {
        /// Case directory
        case_dir: PathBuf,
        /// Output root; the case is written to <output>/<case>
        #[arg(short, long)]
        output: PathBuf,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Merge mask files into the fixed visualisation class map
    Merge {
        /// Directory holding the mask files
        #[arg(short, long)]
        input: PathBuf,
        /// Image whose grid the merged volume uses (e.g. ct.nii.gz)
        #[arg(short, long)]
        reference: PathBuf,
        /// Merged label file
        #[arg(short, long)]
        output: PathBuf,
        /// Also copy the reference image here
        #[arg(long)]
        image_output: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Refine { input, output, config, workers } => {
            if let Some(n) = workers {
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build_global()
                    .context("failed to configure worker pool")?;
            }
            let config = resolve_config(config.as_deref())?;
            let summary = run_batch(&input, &output, &config)
                .with_context(|| format!("batch over {} failed", input.display()))?;
            println!("{}", summary.render());
            Ok(if summary.failed.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Case { case_dir, output, config } => {
            let config = resolve_config(config.as_deref())?;
            let report = process_case(&case_dir, &output, &config)
                .with_context(|| format!("case {} failed", case_dir.display()))?;
            info!(case = %report.case, organs = report.organs, "wrote {}", report.output_dir.display());
            print!("{}", report.log.render());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Merge { input, reference, output, image_output } => {
            let report = merge_segmentations(&input, &reference, &output, image_output.as_deref())
                .context("class map merge failed")?;
            println!(
                "merged {}/{} segmentation files into {}",
                report.found.len(),
                report.found.len() + report.missing.len(),
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_config(path: Option<&Path>) -> Result<RefineConfig> {
    match path {
        Some(p) => load_config(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(RefineConfig::default()),
    }
}
