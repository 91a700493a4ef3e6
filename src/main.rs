use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use panelcut::backend::{NativeBackend, SegmentationBackend, SubprocessBackend};
use panelcut::config::{BackendPreference, GutterTone, PanelFormat, SegmentationConfig, ThresholdMethod};
use panelcut::{ErrorKind, ErrorReport, RunOptions, SegmentError, SegmentationResult, Segmenter, logger};

#[derive(Parser)]
#[command(name = "panelcut")]
#[command(about = "Split manga pages into panels, numbered in reading order")]
struct Cli {
    /// Enable debug logging (stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Segment one page and print the result as JSON
    Segment(SegmentArgs),
    /// Report which backends are usable here
    Probe {
        /// JSON config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SegmentArgs {
    /// Path to the page image
    #[arg(value_name = "IMAGE", required_unless_present = "stdin", conflicts_with = "stdin")]
    image_path: Option<PathBuf>,

    /// Read the page (raw, base64 or data URI) from stdin
    #[arg(long)]
    stdin: bool,

    /// Reject `data:` URI input
    #[arg(long)]
    no_data_uri: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Also save each panel to DIR as panel_NN.<ext>
    #[arg(long, value_name = "DIR")]
    write_panels: Option<PathBuf>,

    /// Save debug outputs to directory (must be empty). Runs in-process.
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// auto, native or subprocess
    #[arg(long)]
    backend: Option<BackendPreference>,

    /// otsu, adaptive[:radius:offset] or a fixed level
    #[arg(long)]
    threshold: Option<ThresholdMethod>,

    /// auto, light or dark
    #[arg(long)]
    gutter: Option<GutterTone>,

    /// Minimum panel area as a fraction of the page
    #[arg(long, value_name = "FRACTION")]
    min_area: Option<f32>,

    /// png or jpeg
    #[arg(long)]
    format: Option<PanelFormat>,

    /// Per-request time budget
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Return no panels instead of the whole page when nothing is detected
    #[arg(long)]
    no_fallback: bool,

    /// Worker executable for the subprocess backend
    #[arg(long, value_name = "PATH")]
    worker: Option<PathBuf>,
}

impl SegmentArgs {
    fn load_config(&self) -> Result<SegmentationConfig, SegmentError> {
        let mut config = SegmentationConfig::load(self.config.as_deref())?;
        if let Some(backend) = self.backend {
            config.runtime.backend = backend;
        }
        if let Some(threshold) = self.threshold {
            config.detector.threshold = threshold;
        }
        if let Some(gutter) = self.gutter {
            config.detector.gutter = gutter;
        }
        if let Some(min_area) = self.min_area {
            config.detector.min_area_fraction = min_area;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.runtime.timeout_ms = timeout_ms;
        }
        if self.no_fallback {
            config.filter.fallback_full_page = false;
        }
        if let Some(worker) = &self.worker {
            config.runtime.subprocess.program = Some(worker.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn read_input(&self) -> Result<Vec<u8>, SegmentError> {
        match &self.image_path {
            Some(path) if !self.stdin => std::fs::read(path)
                .map_err(|e| SegmentError::Decode(format!("cannot read {}: {}", path.display(), e))),
            _ => {
                let mut bytes = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut bytes)
                    .map_err(|e| SegmentError::Decode(format!("cannot read stdin: {}", e)))?;
                Ok(bytes)
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let outcome = match cli.command {
        Command::Segment(args) => run_segment(&args).await.map(|()| ExitCode::SUCCESS),
        Command::Probe { config } => run_probe(config),
    };
    outcome.unwrap_or_else(|e| fail(&e))
}

/// Log the failure, print its error report and pick the exit status.
/// The report goes to stdout: it is the reply a parent process parses.
fn fail(err: &anyhow::Error) -> ExitCode {
    let (report, code) = match err.downcast_ref::<SegmentError>() {
        Some(e) => (ErrorReport::from(e), e.exit_code()),
        None => (
            ErrorReport {
                kind: ErrorKind::Processing,
                error: format!("{:#}", err),
            },
            1,
        ),
    };
    error!(kind = ?report.kind, "{:#}", err);
    println!("{}", serde_json::json!(report));
    ExitCode::from(code as u8)
}

async fn run_segment(args: &SegmentArgs) -> anyhow::Result<()> {
    let config = args.load_config()?;
    let bytes = args.read_input()?;
    let allow_data_uri = !args.no_data_uri;

    let result = match &args.debug_out {
        Some(debug_dir) => {
            let options = RunOptions {
                budget: Some(config.runtime.timeout()),
                debug_dir: Some(debug_dir.clone()),
            };
            info!("writing debug output to {}", debug_dir.display());
            panelcut::segment_page_with(&bytes, allow_data_uri, &config, &options)?
        }
        None => {
            let segmenter = Segmenter::discover(config.clone())?;
            segmenter.segment_panels(&bytes, allow_data_uri).await?
        }
    };

    if let Some(dir) = &args.write_panels {
        write_panels(dir, &result, config.output.format)?;
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&result)
    } else {
        serde_json::to_string(&result)
    }
    .context("cannot serialize result")?;
    println!("{}", json);
    Ok(())
}

fn write_panels(dir: &std::path::Path, result: &SegmentationResult, format: PanelFormat) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    for panel in &result.panels {
        let path = dir.join(format!("panel_{:02}.{}", panel.panel_number, format.extension()));
        std::fs::write(&path, &panel.image_data).with_context(|| format!("cannot write {}", path.display()))?;
        info!("saved {}", path.display());
    }
    Ok(())
}

fn run_probe(config_path: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let config = SegmentationConfig::load(config_path.as_deref())?;
    let shared = Arc::new(config.clone());
    let native = NativeBackend::new(Arc::clone(&shared)).probe().is_ok();
    let subprocess = SubprocessBackend::new(shared).probe().is_ok();
    let segmenter = Segmenter::discover(config)?;

    let report = serde_json::json!({
        "native": native,
        "subprocess": subprocess,
        "selected": segmenter.backend_name(),
    });
    println!("{}", report);

    Ok(if segmenter.probe_availability() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(SegmentError::Unavailable(String::new()).exit_code() as u8)
    })
}
