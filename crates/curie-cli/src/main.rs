//! `curie`: Curie-point depth analysis of gridded magnetic anomalies.
//!
//! Grids are read and written as JSON (`data`, `nx`, `ny`, `xmin`, `xmax`,
//! `ymin`, `ymax`). Analysis policies come from an optional JSON config;
//! command-line flags override the model and sampler settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use curie_core::sampler::{PosteriorSummary, Summary};
use curie_core::synthetic::bouligand_grid;
use curie_core::{
    sweep, two_pass_sweep, CurieDepth, Direction, FitModel, FitOutcome, MagneticGrid, MetropolisConfig,
    ModelParameters, Pipeline, Posterior, Quadrature, ResultField, SamplingMethod, SweepConfig, WavenumberRange,
};

// ── CLI structure ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "curie", version, about = "Curie-point depth from magnetic anomaly grids")]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Analysis configuration JSON (taper, spectral, model, fit, metropolis).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write JSON here instead of stdout.
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a synthetic grid following the Bouligand model.
    Synth {
        /// Nodes per side.
        #[arg(long, default_value_t = 305)]
        n: usize,
        /// Node spacing in metres.
        #[arg(long, default_value_t = 1000.0)]
        spacing: f64,
        #[arg(long, default_value_t = 3.0)]
        beta: f64,
        /// Depth to top, km.
        #[arg(long, default_value_t = 0.305)]
        zt: f64,
        /// Layer thickness, km.
        #[arg(long, default_value_t = 10.0)]
        dz: f64,
        #[arg(long, default_value_t = 0.0)]
        c: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Radial or azimuthal spectrum at one centroid.
    Spectrum {
        #[command(flatten)]
        at: Centroid,
        /// Split the spectrum by direction.
        #[arg(long)]
        azimuthal: bool,
        /// Sector width in degrees for --azimuthal.
        #[arg(long, default_value_t = 20.0)]
        sector: f64,
    },
    /// Fit a spectral model at one centroid.
    Fit {
        #[command(flatten)]
        at: Centroid,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Sample the depth posterior at one centroid.
    Sample {
        #[command(flatten)]
        at: Centroid,
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        sampling: SamplingArgs,
        /// Include every draw in the output, not just the summary.
        #[arg(long)]
        draws: bool,
    },
    /// Fit (or sample) at every centroid of a regular lattice.
    Sweep {
        #[command(flatten)]
        grid: GridInput,
        /// Window size in metres.
        #[arg(long)]
        window: f64,
        /// Centroid spacing in metres; every interior node when omitted.
        #[arg(long)]
        spacing: Option<f64>,
        /// Sweep once without priors, derive priors, sweep again.
        #[arg(long)]
        two_pass: bool,
        #[command(flatten)]
        model: ModelArgs,
        /// Sample the posterior at every centroid with this method.
        #[arg(long, value_enum)]
        uncertainty: Option<MethodKind>,
        #[arg(long, default_value_t = 100)]
        nsim: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[derive(Args, Debug)]
struct GridInput {
    /// Grid JSON file.
    input: PathBuf,
    /// Upward-continue the grid by this many metres first.
    #[arg(long)]
    upward: Option<f64>,
    /// Reduce to the pole with field and magnetization along INC,DEC degrees.
    #[arg(long, value_parser = parse_direction)]
    rtp: Option<Direction>,
}

#[derive(Args, Debug)]
struct Centroid {
    #[command(flatten)]
    grid: GridInput,
    /// Centroid x in metres.
    #[arg(short = 'x', long)]
    x: f64,
    /// Centroid y in metres.
    #[arg(short = 'y', long)]
    y: f64,
    /// Window size in metres.
    #[arg(short, long)]
    window: f64,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model to fit; the config file's model when omitted.
    #[arg(long, value_enum)]
    model: Option<ModelKind>,
    /// Bouligand fit range KMIN,KMAX.
    #[arg(long, value_parser = parse_range)]
    range: Option<WavenumberRange>,
    /// Tanaka top-depth range KMIN,KMAX.
    #[arg(long, value_parser = parse_range)]
    top: Option<WavenumberRange>,
    /// Tanaka centroid-depth range KMIN,KMAX.
    #[arg(long, value_parser = parse_range)]
    centroid: Option<WavenumberRange>,
}

#[derive(Args, Debug)]
struct SamplingArgs {
    #[arg(long, value_enum, default_value_t = MethodKind::Sensitivity)]
    method: MethodKind,
    /// Repetitions (sensitivity) or kept samples (metropolis).
    #[arg(long, default_value_t = 100)]
    nsim: usize,
    /// Burn-in samples for metropolis; the config value when omitted.
    #[arg(long)]
    burnin: Option<usize>,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModelKind {
    Bouligand,
    Tanaka,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MethodKind {
    Sensitivity,
    Metropolis,
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalysisConfig {
    #[serde(flatten)]
    pipeline: Pipeline,
    metropolis: MetropolisConfig,
}

impl AnalysisConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Pipeline with the model replaced by command-line choices.
    fn pipeline_for(&self, args: &ModelArgs) -> Result<Pipeline> {
        let mut pipeline = self.pipeline.clone();
        match args.model {
            None => {
                if let FitModel::Bouligand { range, .. } = &mut pipeline.model {
                    if args.range.is_some() {
                        *range = args.range;
                    }
                }
            }
            Some(ModelKind::Bouligand) => {
                let initial = match pipeline.model {
                    FitModel::Bouligand { initial, .. } => initial,
                    FitModel::Tanaka { .. } => ModelParameters::default(),
                };
                pipeline.model = FitModel::Bouligand { range: args.range, initial };
            }
            Some(ModelKind::Tanaka) => {
                let (Some(top), Some(centroid)) = (args.top, args.centroid) else {
                    bail!("--model tanaka needs both --top and --centroid ranges");
                };
                pipeline.model = FitModel::Tanaka { top, centroid };
            }
        }
        Ok(pipeline)
    }

    fn method(&self, kind: MethodKind, nsim: usize, burnin: Option<usize>) -> SamplingMethod {
        match kind {
            MethodKind::Sensitivity => SamplingMethod::Sensitivity { nsim },
            MethodKind::Metropolis => SamplingMethod::Metropolis(MetropolisConfig {
                nsim,
                burnin: burnin.unwrap_or(self.metropolis.burnin),
                ..self.metropolis
            }),
        }
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FitReport {
    x: f64,
    y: f64,
    window: f64,
    curie_depth: CurieDepth,
    fit: FitOutcome,
}

#[derive(Serialize)]
struct SampleReport {
    x: f64,
    y: f64,
    window: f64,
    summary: Option<PosteriorSummary>,
    failures: usize,
    acceptance_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    posterior: Option<Posterior>,
}

#[derive(Serialize)]
struct SweepReport {
    depth: Option<Summary>,
    field: ResultField,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_pass: Option<ResultField>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_pair(s: &str) -> std::result::Result<(f64, f64), String> {
    let (a, b) = s.split_once(',').ok_or_else(|| format!("expected two comma-separated numbers, got {s:?}"))?;
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}"));
    Ok((parse(a)?, parse(b)?))
}

fn parse_range(s: &str) -> std::result::Result<WavenumberRange, String> {
    let (min, max) = parse_pair(s)?;
    WavenumberRange::new(min, max).map_err(|e| e.to_string())
}

fn parse_direction(s: &str) -> std::result::Result<Direction, String> {
    let (inclination, declination) = parse_pair(s)?;
    Ok(Direction { inclination, declination })
}

fn read_grid(input: &GridInput) -> Result<MagneticGrid> {
    let text = fs::read_to_string(&input.input).with_context(|| format!("reading grid {}", input.input.display()))?;
    let mut grid: MagneticGrid =
        serde_json::from_str(&text).with_context(|| format!("parsing grid {}", input.input.display()))?;
    let (nx, ny) = (grid.nx(), grid.ny());
    info!(nx, ny, dx = grid.dx(), dy = grid.dy(), "grid loaded");

    if let Some(direction) = input.rtp {
        grid = grid.reduced_to_pole(direction, direction).context("reducing to the pole")?;
    }
    if let Some(height) = input.upward {
        grid = grid.upward_continued(height).context("upward continuation")?;
    }
    Ok(grid)
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("writing {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let config = AnalysisConfig::load(cli.config.as_deref())?;
    let output = cli.output.as_deref();
    let start = Instant::now();

    match cli.command {
        Commands::Synth { n, spacing, beta, zt, dz, c, seed } => {
            let params = ModelParameters::new(beta, zt, dz, c);
            let quadrature: Quadrature = config.pipeline.fit.quadrature;
            let grid = bouligand_grid(n, spacing, &params, &quadrature, seed).context("building synthetic grid")?;
            write_json(&grid, output)?;
        }

        Commands::Spectrum { at, azimuthal, sector } => {
            let grid = read_grid(&at.grid)?;
            let pipeline = &config.pipeline;
            if azimuthal {
                let spectrum = pipeline
                    .azimuthal_at(&grid, at.window, at.x, at.y, sector)
                    .context("computing azimuthal spectrum")?;
                write_json(&spectrum, output)?;
            } else {
                let spectrum = pipeline
                    .spectrum_at(&grid, at.window, at.x, at.y)
                    .context("computing radial spectrum")?;
                write_json(&spectrum, output)?;
            }
        }

        Commands::Fit { at, model } => {
            let grid = read_grid(&at.grid)?;
            let pipeline = config.pipeline_for(&model)?;
            let fit = pipeline.fit_at(&grid, at.window, at.x, at.y).context("fitting spectrum")?;
            let curie_depth = fit.curie_depth();
            info!(depth = curie_depth.depth, error = curie_depth.error, "fit done");
            write_json(&FitReport { x: at.x, y: at.y, window: at.window, curie_depth, fit }, output)?;
        }

        Commands::Sample { at, model, sampling, draws } => {
            let grid = read_grid(&at.grid)?;
            let pipeline = config.pipeline_for(&model)?;
            let method = config.method(sampling.method, sampling.nsim, sampling.burnin);
            let posterior = pipeline
                .sample_at(&grid, at.window, at.x, at.y, &method, sampling.seed)
                .context("sampling posterior")?;
            let report = SampleReport {
                x: at.x,
                y: at.y,
                window: at.window,
                summary: posterior.summary(),
                failures: posterior.failures,
                acceptance_rate: posterior.acceptance_rate,
                posterior: draws.then_some(posterior),
            };
            write_json(&report, output)?;
        }

        Commands::Sweep { grid, window, spacing, two_pass, model, uncertainty, nsim, seed } => {
            let input = read_grid(&grid)?;
            let pipeline = config.pipeline_for(&model)?;
            let sweep_config = SweepConfig {
                window,
                spacing_x: spacing,
                spacing_y: spacing,
                uncertainty: uncertainty.map(|kind| config.method(kind, nsim, None)),
                seed,
            };
            let report = if two_pass {
                let (first, second) = two_pass_sweep(&input, &pipeline, &sweep_config).context("two-pass sweep")?;
                SweepReport { depth: second.depth_stats(), field: second, first_pass: Some(first) }
            } else {
                let field = sweep(&input, &pipeline, &sweep_config).context("sweep")?;
                SweepReport { depth: field.depth_stats(), field, first_pass: None }
            };
            write_json(&report, output)?;
        }
    }

    info!(elapsed = ?start.elapsed(), "done");
    Ok(())
}
