//! strokestrip-bench: CLI tool for pipeline parameter experimentation and diagnostics.
//!
//! Runs the consolidation pipeline on a capture file with configurable
//! parameters, printing detailed per-stage diagnostics. Useful for:
//!
//! - Comparing correspondence strategies (`NearestSegment` vs `NearestVertex`)
//! - Tuning resample spacing, correspondence distance, alignment weight
//! - Spotting clusters with uncertain orientation or fallback parameterization
//! - Rendering orientation, parameter, isoline, and alignment SVGs for inspection
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin strokestrip-bench -- [OPTIONS] <CAPTURE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use strokestrip_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use strokestrip_pipeline::{Capture, PipelineConfig, ProcessResult};

/// Pipeline parameter experimentation and diagnostics for strokestrip.
///
/// Runs the consolidation pipeline on a JSON capture with configurable
/// parameters and prints detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "strokestrip-bench", version)]
struct Cli {
    /// Path to the input capture (JSON serialization of `Capture`).
    capture_path: PathBuf,

    /// Resampling interval, in stroke widths.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_RESAMPLE_SPACING)]
    resample_spacing: f64,

    /// Point correspondence strategy.
    #[arg(long, value_enum, default_value_t = Correspondence::NearestSegment)]
    correspondence: Correspondence,

    /// Maximum correspondence distance, in stroke widths.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_CORRESPONDENCE_DISTANCE)]
    max_distance: f64,

    /// Orientation confidence below which a stroke is reported as uncertain.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_ORIENTATION_CONFIDENCE)]
    min_confidence: f64,

    /// Largest cluster solved by exhaustive orientation search.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_EXHAUSTIVE_ORIENTATION_LIMIT)]
    exhaustive_limit: usize,

    /// Weight of cross-stroke alignment terms relative to arc-length terms.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ALIGNMENT_WEIGHT)]
    alignment_weight: f64,

    /// Write SVG renderings into this directory.
    #[arg(long)]
    svg_dir: Option<PathBuf>,

    /// Spacing between isolines, in units of `u`.
    #[arg(long, default_value_t = 4.0)]
    isoline_spacing: f64,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Correspondence strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Correspondence {
    /// Project onto the nearest segment and interpolate.
    NearestSegment,
    /// Snap to the nearest vertex.
    NearestVertex,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        resample_spacing: cli.resample_spacing,
        correspondence: match cli.correspondence {
            Correspondence::NearestSegment => strokestrip_pipeline::CorrespondenceKind::NearestSegment,
            Correspondence::NearestVertex => strokestrip_pipeline::CorrespondenceKind::NearestVertex,
        },
        max_correspondence_distance: cli.max_distance,
        min_orientation_confidence: cli.min_confidence,
        exhaustive_orientation_limit: cli.exhaustive_limit,
        alignment_weight: cli.alignment_weight,
    })
}

fn read_capture(path: &Path) -> Result<Capture, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    serde_json::from_str(&json).map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let capture = match read_capture(&cli.capture_path) {
        Ok(capture) => capture,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Capture: {} ({} polylines, thickness {})",
        cli.capture_path.display(),
        capture.polylines.len(),
        capture.thickness,
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match strokestrip_pipeline::diagnostics::process_with_diagnostics(
            &capture, &config, &StdClock,
        ) {
            Ok((result, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                let degraded = result.degraded_clusters(config.min_orientation_confidence);
                if run == 0 && !degraded.is_empty() {
                    eprintln!("Degraded clusters: {degraded:?}");
                }

                // Write SVGs on the first run only.
                if run == 0
                    && let Some(ref svg_dir) = cli.svg_dir
                {
                    write_svgs(&cli, &config, &result, svg_dir);
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Write every SVG rendering of `result` into `svg_dir`, named after the
/// capture file. Failures are reported but not fatal.
fn write_svgs(cli: &Cli, config: &PipelineConfig, result: &ProcessResult, svg_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(svg_dir) {
        eprintln!("Error creating {}: {e}", svg_dir.display());
        return;
    }

    let stem = cli
        .capture_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("capture");
    let desc = format!("{config:#?}");
    let config_json = serde_json::to_string(config).ok();
    let metadata = strokestrip_export::SvgMetadata {
        title: Some(stem),
        description: Some(&desc),
        config_json: config_json.as_deref(),
    };

    let renderings = [
        (
            "orientation",
            strokestrip_export::to_orientation_svg(
                &result.input,
                config.min_orientation_confidence,
                &metadata,
            ),
        ),
        (
            "rainbow",
            strokestrip_export::to_parameter_svg(&result.input, &metadata),
        ),
        (
            "isolines",
            strokestrip_export::to_isolines_svg(&result.input, cli.isoline_spacing, &metadata),
        ),
        (
            "orientation_debug",
            strokestrip_export::to_orientation_debug_svg(result, &metadata),
        ),
        (
            "param_debug",
            strokestrip_export::to_parameterization_debug_svg(result, &metadata),
        ),
    ];

    for (suffix, svg) in renderings {
        let path = svg_dir.join(format!("{stem}_{suffix}.svg"));
        match std::fs::write(&path, &svg) {
            Ok(()) => {
                eprintln!("SVG written to {} ({} bytes)", path.display(), svg.len());
            }
            Err(e) => {
                eprintln!("Error writing SVG to {}: {e}", path.display());
            }
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Normalize", |d| d.normalize.duration),
        ("Orient", |d| d.orient.duration),
        ("Parameterize", |d| d.parameterize.duration),
    ];

    for (name, extractor) in stage_extractors {
        let stage_mean = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
