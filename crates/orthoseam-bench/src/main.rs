//! orthoseam-bench: CLI tool for merging raster pairs and tuning cutline
//! parameters.
//!
//! Reads two RGB(A) rasters and their affine transforms, computes the
//! cutline and keep masks, and prints detailed per-stage diagnostics.
//! Useful for:
//!
//! - Tuning the centre preference, waypoint density and pruning threshold
//! - Measuring per-stage durations to identify bottlenecks
//! - Inspecting skeleton sizes, snapped waypoints and keep-mask coverage
//! - Producing cutline/keep masks and telemetry for a downstream mosaicker
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin orthoseam-bench -- \
//!     --first-transform 0.1,0,500000,0,-0.1,4100000 \
//!     --second-transform 0.1,0,500040,0,-0.1,4100000 \
//!     --out merged/ a.png b.png
//! ```
//!
//! Pixels whose channels are all zero, or whose alpha is zero, are
//! outside a raster's footprint.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use orthoseam_pipeline::diagnostics::{MergeDiagnostics, StageMetrics};
use orthoseam_pipeline::{
    Affine, Clock, GrayImage, MergeConfig, MergeResult, Progress, RasterGrid, RgbImage, SeamError,
};

/// Cutline computation and diagnostics for a pair of overlapping rasters.
///
/// Runs the merge with configurable parameters and prints per-stage
/// timing and count diagnostics.
#[derive(Parser)]
#[command(name = "orthoseam-bench", version)]
struct Cli {
    /// First raster (PNG, JPEG, BMP, WebP).
    first: PathBuf,

    /// Second raster (PNG, JPEG, BMP, WebP).
    second: PathBuf,

    /// Affine transform of the first raster as `a,b,c,d,e,f`
    /// (`x = a*col + b*row + c`, `y = d*col + e*row + f`).
    #[arg(long, value_parser = parse_affine, allow_hyphen_values = true)]
    first_transform: Affine,

    /// Affine transform of the second raster as `a,b,c,d,e,f`.
    #[arg(long, value_parser = parse_affine, allow_hyphen_values = true)]
    second_transform: Affine,

    /// Minimum overlap patch area as a fraction of the union frame.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_MIN_AREA_FRACTION)]
    min_area_fraction: f64,

    /// Footprint downsample factor for boundary intersection.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_ANCHOR_DOWNSAMPLE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    anchor_downsample: u32,

    /// Longest patch side the skeleton is computed at.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_WORKING_RESOLUTION, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    working_resolution: u32,

    /// Branch length (pixels) below which skeleton spurs are pruned.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_PRUNE_THRESHOLD)]
    prune_threshold: f64,

    /// Weight of centerline closeness against colour similarity.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_PREFER_CENTRE_FACTOR)]
    prefer_centre_factor: f64,

    /// Number of solver segments along the centerline.
    #[arg(long, default_value_t = 16, conflicts_with = "every_other_waypoint")]
    segment_count: usize,

    /// Route through every other centerline pixel instead of a fixed
    /// segment count.
    #[arg(long)]
    every_other_waypoint: bool,

    /// Bounding-box to grid area ratio above which the solver searches
    /// the whole grid.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_CROP_THRESHOLD)]
    crop_threshold: f64,

    /// Margin around each solver segment, as a fraction of its extent.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_WINDOW_MARGIN)]
    window_margin: f64,

    /// Waypoint snap radius as a fraction of the shortest waypoint gap.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_SNAP_RADIUS_FACTOR)]
    snap_radius_factor: f64,

    /// Longest side above which side classification is downsampled.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_CLASSIFIER_MAX_SIDE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    classifier_max_side: u32,

    /// Iteration cap of the skeleton cleanup loops.
    #[arg(long, default_value_t = MergeConfig::DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,

    /// Directory for cutline/keep masks, telemetry and the seam overlay.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full merge config as a JSON string.
    ///
    /// When provided, all other merge parameter flags are ignored.
    /// The JSON must be a valid `MergeConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Parse `a,b,c,d,e,f` into an [`Affine`].
fn parse_affine(s: &str) -> Result<Affine, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("`{v}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let coefficients: [f64; 6] = values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected 6 coefficients, got {}", v.len()))?;
    Ok(Affine::new(coefficients))
}

/// Build a [`MergeConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<MergeConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(MergeConfig {
        min_area_fraction: cli.min_area_fraction,
        anchor_downsample: cli.anchor_downsample,
        working_resolution: cli.working_resolution,
        prune_threshold: cli.prune_threshold,
        prefer_centre_factor: cli.prefer_centre_factor,
        segment_count: (!cli.every_other_waypoint).then_some(cli.segment_count),
        crop_threshold: cli.crop_threshold,
        window_margin: cli.window_margin,
        snap_radius_factor: cli.snap_radius_factor,
        classifier_max_side: cli.classifier_max_side,
        max_iterations: cli.max_iterations,
    })
}

/// Load a raster, blanking pixels with zero alpha so they fall outside
/// the footprint.
fn load_raster(path: &Path, transform: Affine) -> Result<RasterGrid, String> {
    let rgba = image::open(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?
        .to_rgba8();
    let image = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        if a == 0 {
            image::Rgb([0, 0, 0])
        } else {
            image::Rgb([r, g, b])
        }
    });
    Ok(RasterGrid::new(image, transform))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli).and_then(|c| {
        c.validate().map_err(|e| e.to_string())?;
        Ok(c)
    }) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let rasters = load_raster(&cli.first, cli.first_transform)
        .and_then(|a| Ok((a, load_raster(&cli.second, cli.second_transform)?)));
    let (first, second) = match rasters {
        Ok(pair) => pair,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Rasters: {} ({}x{}), {} ({}x{})",
        cli.first.display(),
        first.image.width(),
        first.image.height(),
        cli.second.display(),
        second.image.width(),
        second.image.height(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match orthoseam_pipeline::merge_pair_with_diagnostics(
            first.clone(),
            second.clone(),
            &config,
            &StdClock,
            &mut StderrProgress,
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

                // Write outputs on the first run only.
                if run == 0
                    && let Some(ref out) = cli.out
                    && let Err(e) = write_outputs(out, &result, &cli, &config)
                {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Merge error: {e}");
                if let SeamError::ClassificationDegenerate {
                    raster,
                    ref diagnostic,
                    ..
                } = e
                    && let Some(ref out) = cli.out
                {
                    let path = out.join(format!("diagnostic_{raster}.png"));
                    match write_mask(&path, diagnostic) {
                        Ok(()) => eprintln!("Diagnostic mask written to {}", path.display()),
                        Err(msg) => eprintln!("{msg}"),
                    }
                }
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

/// Write masks, per-patch telemetry and the seam overlay into `out`.
fn write_outputs(out: &Path, result: &MergeResult, cli: &Cli, config: &MergeConfig) -> Result<(), String> {
    std::fs::create_dir_all(out).map_err(|e| format!("Error creating {}: {e}", out.display()))?;

    write_mask(&out.join("cutline.png"), &result.cutline.image)?;
    write_mask(&out.join("keep_first.png"), &result.keep_masks[0].image)?;
    write_mask(&out.join("keep_second.png"), &result.keep_masks[1].image)?;

    for seam in &result.patches {
        let path = out.join(format!("telemetry_{}.txt", seam.index));
        let text = orthoseam_export::to_telemetry(&seam.telemetry, Some(seam.index));
        std::fs::write(&path, text).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    }

    let title = format!("{} + {}", cli.first.display(), cli.second.display());
    let desc = format!("{config:#?}");
    let metadata = orthoseam_export::SvgMetadata {
        title: Some(&title),
        description: Some(&desc),
    };
    let svg = orthoseam_export::to_seam_svg(result, &metadata);
    let svg_path = out.join("seams.svg");
    std::fs::write(&svg_path, &svg)
        .map_err(|e| format!("Error writing {}: {e}", svg_path.display()))?;

    eprintln!(
        "Outputs written to {} ({} patch(es))",
        out.display(),
        result.patches.len()
    );
    Ok(())
}

fn write_mask(path: &Path, mask: &GrayImage) -> Result<(), String> {
    let png = orthoseam_export::encode_mask_png(mask).map_err(|e| e.to_string())?;
    std::fs::write(path, png).map_err(|e| format!("Error writing {}: {e}", path.display()))
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

/// [`Progress`] implementation that prints each stage to stderr.
struct StderrProgress;

impl Progress for StderrProgress {
    fn stage(&mut self, step: usize, total: usize, name: &str) {
        eprintln!("[{step}/{total}] {name}");
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[MergeDiagnostics]) {
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

    // Per-stage means, keyed by the stage order of the first run.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let names: Vec<&'static str> = all_diagnostics[0]
        .stages
        .iter()
        .map(|s| s.metrics.name())
        .collect();
    for name in names {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .flat_map(|d| &d.stages)
            .filter(|s| s.metrics.name() == name)
            .map(|s| s.duration.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }

    let patches: usize = all_diagnostics
        .iter()
        .flat_map(|d| &d.stages)
        .filter_map(|s| match &s.metrics {
            StageMetrics::Seam { patches, .. } => Some(patches.len()),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    println!();
    println!("Patches seamed: {patches}");
}
