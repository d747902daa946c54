use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use blendbench::{
    BenchConfig, DeviceKind, Extent, FrameDriver, LayerPattern, SchedulingMode, StrategyKind,
    TileGrid, reference_fold,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blendbench", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite one frame and write the presented viewport as a PNG.
    Frame(FrameArgs),
    /// Check every strategy against the reference fold.
    Verify(VerifyArgs),
    /// Draw frames in a loop and report per-frame CPU time.
    Run(RunArgs),
}

/// Overrides applied on top of the config file (or the defaults).
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Config JSON; unset fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    #[arg(long, value_enum)]
    scheduling: Option<SchedulingMode>,

    /// Tile columns for the tiled strategy.
    #[arg(long)]
    tile_columns: Option<u32>,

    /// Tile rows for the tiled strategy.
    #[arg(long)]
    tile_rows: Option<u32>,

    /// Target surfaces in flight (>= 2).
    #[arg(long)]
    pending: Option<usize>,

    /// Pipelines per pool.
    #[arg(long)]
    pool_size: Option<usize>,

    /// Working surface width.
    #[arg(long)]
    width: Option<u32>,

    /// Working surface height.
    #[arg(long)]
    height: Option<u32>,

    /// Number of generated layers.
    #[arg(long)]
    layers: Option<usize>,

    #[arg(long, value_enum)]
    pattern: Option<LayerPattern>,

    #[arg(long, value_enum)]
    device: Option<DeviceKind>,

    /// Execution lanes of the CPU device.
    #[arg(long)]
    lanes: Option<usize>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<BenchConfig> {
        let mut cfg = match &self.config {
            Some(path) => BenchConfig::from_path(path)?,
            None => BenchConfig::default(),
        };
        if let Some(v) = self.strategy {
            cfg.strategy = v;
        }
        if let Some(v) = self.scheduling {
            cfg.scheduling = v;
        }
        cfg.tiles = TileGrid {
            columns: self.tile_columns.unwrap_or(cfg.tiles.columns),
            rows: self.tile_rows.unwrap_or(cfg.tiles.rows),
        };
        if let Some(v) = self.pending {
            cfg.pending_surfaces = v;
        }
        if let Some(v) = self.pool_size {
            cfg.pipeline_pool_size = v;
        }
        cfg.working_size = Extent::new(
            self.width.unwrap_or(cfg.working_size.width),
            self.height.unwrap_or(cfg.working_size.height),
        );
        if let Some(v) = self.layers {
            cfg.layer_count = v;
        }
        if let Some(v) = self.pattern {
            cfg.layer_pattern = v;
        }
        if let Some(v) = self.device {
            cfg.device = v;
        }
        if let Some(v) = self.lanes {
            cfg.device_lanes = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Parser, Debug)]
struct FrameArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct VerifyArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Frames to draw.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Frames drawn before measuring.
    #[arg(long, default_value_t = 2)]
    warmup: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Verify(args) => cmd_verify(args),
        Command::Run(args) => cmd_run(args),
    }
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let cfg = args.config.load()?;
    let mut driver = FrameDriver::new(&cfg)?;
    if driver.draw()?.is_skipped() {
        anyhow::bail!("no target surface was available for the frame");
    }
    let presented = driver
        .read_presented()?
        .context("device reported no presented surface")?;
    let shown = presented.crop(driver.viewport())?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    let extent = shown.extent();
    image::save_buffer_with_format(
        &args.out,
        shown.data(),
        extent.width,
        extent.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {} ({})", args.out.display(), cfg.strategy.label());
    Ok(())
}

fn cmd_verify(args: VerifyArgs) -> anyhow::Result<()> {
    let cfg = args.config.load()?;
    let mut driver = FrameDriver::new(&cfg)?;
    let expected = reference_fold(&driver.layers().as_refs())?;

    let mut failed = Vec::new();
    for kind in StrategyKind::ALL {
        driver.set_strategy(kind)?;
        let outcome = driver.draw()?;
        let Some(report) = outcome.report() else {
            anyhow::bail!("{kind}: frame skipped");
        };
        let passes = report.encode.passes();
        let presented = driver
            .read_presented()?
            .with_context(|| format!("{kind}: nothing presented"))?;
        let ok = presented == expected;
        eprintln!(
            "{:<28} passes={:<5} {}",
            kind.label(),
            passes,
            if ok { "ok" } else { "MISMATCH" }
        );
        if !ok {
            failed.push(kind);
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} strategies differ from the reference: {failed:?}", failed.len());
    }
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let cfg = args.config.load()?;
    let mut driver = FrameDriver::new(&cfg)?;

    for _ in 0..args.warmup {
        driver.draw_next()?;
    }
    driver.wait_idle()?;

    let mut times = Vec::with_capacity(args.frames as usize);
    let mut skipped = 0u64;
    let started = std::time::Instant::now();
    for _ in 0..args.frames {
        match driver.draw_next()?.report() {
            Some(report) => times.push(report.cpu_time),
            None => skipped += 1,
        }
    }
    driver.wait_idle()?;
    let wall = started.elapsed();

    times.sort();
    let stats = driver.device_stats();
    eprintln!(
        "{} / {:?} on {} ({} layers, {})",
        cfg.strategy.label(),
        cfg.scheduling,
        driver.device_name(),
        driver.layers().len(),
        cfg.working_size
    );
    eprintln!(
        "  encode+submit p50={} p90={} p99={} max={}",
        fmt_ms(percentile(&times, 0.50)),
        fmt_ms(percentile(&times, 0.90)),
        fmt_ms(percentile(&times, 0.99)),
        fmt_ms(times.last().copied().unwrap_or_default())
    );
    eprintln!(
        "  frames={} skipped={} wall={} intermediates={}B",
        times.len(),
        skipped,
        fmt_ms(wall),
        driver.footprint_bytes()
    );
    eprintln!(
        "  device: submitted={} completed={} passes={} render_scopes={} compute_scopes={} pipelines_bound={}",
        stats.submitted,
        stats.completed,
        stats.passes,
        stats.render_scopes,
        stats.compute_scopes,
        stats.pipeline_binds.len()
    );
    Ok(())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let rank = (p * (n as f64)).ceil().clamp(1.0, n as f64) as usize;
    sorted[rank - 1]
}

fn fmt_ms(d: Duration) -> String {
    format!("{:.3}ms", d.as_secs_f64() * 1000.0)
}
