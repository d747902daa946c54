use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use blendbench::{
    BenchConfig, DeviceKind, Extent, FrameDriver, LayerPattern, SchedulingMode, StrategyKind,
    TileGrid,
};
use serde_json::json;
use sha2::Digest as _;

#[derive(Clone, Debug)]
struct BenchArgs {
    width: u32,
    height: u32,
    layers: usize,
    pattern: LayerPattern,
    tiles: TileGrid,
    frames: u32,
    warmup: u32,
    device: DeviceKind,
    lanes: usize,
    strategies: Vec<StrategyKind>,
    modes: Vec<SchedulingMode>,
    out: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
struct FrameMetrics {
    encode_submit: Duration,
}

#[derive(Clone, Debug)]
struct CaseResult {
    strategy: StrategyKind,
    mode: SchedulingMode,
    frames: Vec<FrameMetrics>,
    skipped: u64,
    wall: Duration,
    passes: u64,
    footprint_bytes: usize,
    digest: String,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = parse_args()?;

    if args.width == 0 || args.height == 0 {
        anyhow::bail!("--width/--height must be > 0");
    }
    if args.frames == 0 {
        anyhow::bail!("--frames must be >= 1");
    }
    if args.layers == 0 {
        anyhow::bail!("--layers must be >= 1");
    }

    eprintln!(
        "bench: {layers} layers ({pattern:?}) at {w}x{h}, {frames} frame(s)/case, warmup={warmup}, device={device:?}, lanes={lanes} ({profile} build)",
        layers = args.layers,
        pattern = args.pattern,
        w = args.width,
        h = args.height,
        frames = args.frames,
        warmup = args.warmup,
        device = args.device,
        lanes = args.lanes,
        profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    );

    let mut results = Vec::new();
    for &mode in &args.modes {
        for &strategy in &args.strategies {
            let res = run_case(&args, strategy, mode)
                .with_context(|| format!("run {strategy} under {mode:?}"))?;
            report_case(&res);
            results.push(res);
        }
    }

    let reference = results.first().map(|r| r.digest.clone());
    for r in &results {
        if Some(&r.digest) != reference.as_ref() {
            anyhow::bail!(
                "{} under {:?} presented a different image (sha256 {})",
                r.strategy,
                r.mode,
                r.digest
            );
        }
    }
    if let Some(digest) = reference {
        eprintln!("\nall cases presented sha256 {digest}");
    }

    if let Some(out) = &args.out {
        write_summary(out, &args, &results)?;
        eprintln!("wrote {}", out.display());
    }
    Ok(())
}

fn run_case(
    args: &BenchArgs,
    strategy: StrategyKind,
    mode: SchedulingMode,
) -> anyhow::Result<CaseResult> {
    let cfg = BenchConfig {
        strategy,
        scheduling: mode,
        tiles: args.tiles,
        working_size: Extent::new(args.width, args.height),
        layer_count: args.layers,
        layer_pattern: args.pattern,
        device: args.device,
        device_lanes: args.lanes,
        ..BenchConfig::default()
    };
    let mut driver = FrameDriver::new(&cfg)?;

    for _ in 0..args.warmup {
        driver.draw_next()?;
    }
    driver.wait_idle()?;
    let passes_before = driver.device_stats().passes;

    let mut frames = Vec::with_capacity(args.frames as usize);
    let mut skipped = 0;
    let t0 = Instant::now();
    for _ in 0..args.frames {
        match driver.draw_next()?.report() {
            Some(report) => frames.push(FrameMetrics {
                encode_submit: report.cpu_time,
            }),
            None => skipped += 1,
        }
    }
    driver.wait_idle()?;
    let wall = t0.elapsed();
    let passes = driver.device_stats().passes - passes_before;

    // Unconstrained frames may overlap on shared intermediates, so the digest comes from one
    // frame drawn alone.
    if driver.draw_next()?.is_skipped() {
        anyhow::bail!("no target surface for the digest frame");
    }
    let presented = driver
        .read_presented()?
        .context("no surface was presented")?;

    Ok(CaseResult {
        strategy,
        mode,
        frames,
        skipped,
        wall,
        passes,
        footprint_bytes: driver.footprint_bytes(),
        digest: sha256_hex(presented.data()),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = sha2::Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn write_summary(out: &PathBuf, args: &BenchArgs, results: &[CaseResult]) -> anyhow::Result<()> {
    let cases = results
        .iter()
        .map(|r| {
            let sorted = sorted_times(&r.frames);
            json!({
                "strategy": r.strategy,
                "label": r.strategy.label(),
                "scheduling": r.mode,
                "frames": r.frames.len(),
                "skipped": r.skipped,
                "wall_ms": r.wall.as_secs_f64() * 1000.0,
                "p50_ms": p(&sorted, 0.50).as_secs_f64() * 1000.0,
                "p90_ms": p(&sorted, 0.90).as_secs_f64() * 1000.0,
                "p99_ms": p(&sorted, 0.99).as_secs_f64() * 1000.0,
                "passes": r.passes,
                "intermediate_bytes": r.footprint_bytes,
                "sha256": r.digest,
            })
        })
        .collect::<Vec<_>>();
    let doc = json!({
        "width": args.width,
        "height": args.height,
        "layers": args.layers,
        "tiles": { "columns": args.tiles.columns, "rows": args.tiles.rows },
        "cases": cases,
    });

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create out dir '{}'", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(&doc).context("serialize summary")?;
    std::fs::write(out, text).with_context(|| format!("write summary '{}'", out.display()))?;
    Ok(())
}

fn parse_args() -> anyhow::Result<BenchArgs> {
    let mut args = std::env::args().skip(1);

    let mut out = BenchArgs {
        width: 1000,
        height: 500,
        layers: 50,
        pattern: LayerPattern::Blocks,
        tiles: TileGrid::default(),
        frames: 30,
        warmup: 2,
        device: DeviceKind::Cpu,
        lanes: 2,
        strategies: StrategyKind::ALL.to_vec(),
        modes: vec![SchedulingMode::Serial, SchedulingMode::Unconstrained],
        out: None,
    };

    while let Some(a) = args.next() {
        match a.as_str() {
            "--width" => out.width = parse_u32(args.next(), "--width")?,
            "--height" => out.height = parse_u32(args.next(), "--height")?,
            "--full" => {
                out.width = Extent::WORKING.width;
                out.height = Extent::WORKING.height;
            }
            "--layers" => out.layers = parse_usize(args.next(), "--layers")?,
            "--frames" => out.frames = parse_u32(args.next(), "--frames")?,
            "--warmup" => out.warmup = parse_u32(args.next(), "--warmup")?,
            "--lanes" => out.lanes = parse_usize(args.next(), "--lanes")?,
            "--tiles" => {
                let n = parse_u32(args.next(), "--tiles")?;
                out.tiles = TileGrid { columns: n, rows: n };
            }
            "--pattern" => {
                let v = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --pattern"))?;
                out.pattern = match v.as_str() {
                    "blocks" => LayerPattern::Blocks,
                    "overlapping" => LayerPattern::Overlapping,
                    _ => anyhow::bail!("unknown --pattern '{v}' (expected blocks|overlapping)"),
                };
            }
            "--device" => {
                let v = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --device (cpu|gpu)"))?;
                out.device = match v.as_str() {
                    "cpu" => DeviceKind::Cpu,
                    "gpu" => DeviceKind::Gpu,
                    _ => anyhow::bail!("unknown --device '{v}' (expected cpu|gpu)"),
                };
            }
            "--strategy" => {
                let v = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --strategy"))?;
                let kind = serde_json::from_value::<StrategyKind>(json!(v))
                    .with_context(|| format!("unknown --strategy '{v}'"))?;
                out.strategies = vec![kind];
            }
            "--serial" => out.modes = vec![SchedulingMode::Serial],
            "--unconstrained" => out.modes = vec![SchedulingMode::Unconstrained],
            "--out" => {
                out.out = Some(PathBuf::from(args.next().ok_or_else(|| {
                    anyhow::anyhow!("missing value for --out (expected a path)")
                })?))
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => anyhow::bail!("unknown arg '{a}' (try --help)"),
        }
    }

    Ok(out)
}

fn print_help() {
    eprintln!(
        r#"blendbench-bench

Runs every compositing strategy under both scheduling modes and reports p50/p90/p99
encode+submit time per frame. Fails if any case presents a different image.

Usage:
  cargo run -q --release
  cargo run -q --release -- --full --frames 60
  cargo run -q --release -- --strategy tiled --serial

Args:
  --width N        (default 1000)
  --height N       (default 500)
  --full           use the 4000x2000 working surface
  --layers N       (default 50)
  --pattern P      blocks|overlapping (default blocks)
  --tiles N        NxN grid for the tiled strategy (default 2)
  --frames N       measured frames per case (default 30)
  --warmup N       (default 2)
  --device D       cpu|gpu (default cpu; gpu needs the `gpu` feature)
  --lanes N        CPU device lanes (default 2)
  --strategy S     only run one strategy (sequential|fused|tiled|tile-memory|compute|monolithic)
  --serial         only run serial scheduling
  --unconstrained  only run unconstrained scheduling
  --out PATH       write a JSON summary
"#
    );
}

fn parse_u32(v: Option<String>, flag: &str) -> anyhow::Result<u32> {
    let v = v.ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))?;
    v.parse::<u32>()
        .with_context(|| format!("parse {flag} value '{v}'"))
}

fn parse_usize(v: Option<String>, flag: &str) -> anyhow::Result<usize> {
    let v = v.ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))?;
    v.parse::<usize>()
        .with_context(|| format!("parse {flag} value '{v}'"))
}

fn sorted_times(frames: &[FrameMetrics]) -> Vec<Duration> {
    let mut v = frames.iter().map(|m| m.encode_submit).collect::<Vec<_>>();
    v.sort_by_key(|d| d.as_nanos());
    v
}

fn p(v: &[Duration], p: f64) -> Duration {
    if v.is_empty() {
        return Duration::ZERO;
    }
    let n = v.len();
    let rank = (p * (n as f64)).ceil().clamp(1.0, n as f64) as usize;
    v[rank - 1]
}

fn fmt_ms(d: Duration) -> String {
    format!("{:.3}ms", d.as_secs_f64() * 1000.0)
}

fn report_case(r: &CaseResult) {
    let v = sorted_times(&r.frames);
    eprintln!(
        "  {label:28} {mode:13} p50={p50:>10}  p90={p90:>10}  p99={p99:>10}  passes/frame={ppf:<5} skipped={skipped} scratch={mb:.1}MiB",
        label = r.strategy.label(),
        mode = format!("{:?}", r.mode),
        p50 = fmt_ms(p(&v, 0.50)),
        p90 = fmt_ms(p(&v, 0.90)),
        p99 = fmt_ms(p(&v, 0.99)),
        ppf = r.passes / (r.frames.len().max(1) as u64),
        skipped = r.skipped,
        mb = r.footprint_bytes as f64 / (1024.0 * 1024.0),
    );
}
