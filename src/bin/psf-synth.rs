use anyhow::{Context, Result};
use ndarray::ArrayView2;
use psfstack::synthetic::{bead_stack, Bead};
use psfstack::{Blob, BlobDetector, ModelKind, PsfPipeline};
use std::env;
use std::process;

fn print_usage(program: &str) {
    eprintln!("Synthetic bead stack PSF demo");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --beads <N>          Number of beads on a grid (default: 4)");
    eprintln!("  --depth <N>          Number of slices (default: 31)");
    eprintln!("  --sigma-xy <S>       Lateral width at focus (default: 1.8)");
    eprintln!("  --sigma-z <S>        Axial width of the peak profile (default: 4.0)");
    eprintln!("  --defocus <D>        Lateral broadening per slice of defocus (default: 0.02)");
    eprintln!("  --background <B>     Constant background level (default: 100)");
    eprintln!("  --width <N>          Fitting window width (default: 15)");
    eprintln!("  --model <KIND>       sym | norot | full (default: full)");
    eprintln!("  --slices <A:B>       Aggregate only slices A..=B");
    eprintln!("  --tracks             Print the per-slice fit table of every peak");
    eprintln!("  --log                Show pipeline diagnostics (RUST_LOG overrides the level)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --beads 9 --depth 41", program);
    eprintln!("  {} --model sym --slices 5:25 --tracks --log", program);
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn setup_logging() -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("psfstack=debug"))
        .context("Invalid log filter")?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Logger initialization failed: {}", e))
}

/// Local maxima of the projection above a fraction of its global maximum.
struct LocalMaxima {
    threshold: f64,
    window_width: f64,
}

impl BlobDetector for LocalMaxima {
    fn detect(&self, projection: ArrayView2<f64>) -> Vec<Blob> {
        let (rows, cols) = projection.dim();
        let lo = projection.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = projection.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let level = lo + self.threshold * (hi - lo);

        let mut blobs = Vec::new();
        for r in 1..rows.saturating_sub(1) {
            for c in 1..cols.saturating_sub(1) {
                let v = projection[[r, c]];
                if v <= level {
                    continue;
                }
                let is_peak = (r - 1..=r + 1)
                    .flat_map(|rr| (c - 1..=c + 1).map(move |cc| (rr, cc)))
                    .filter(|&p| p != (r, c))
                    .all(|p| projection[p] < v);
                if is_peak {
                    blobs.push(Blob {
                        row: r as f64,
                        column: c as f64,
                        window_width: self.window_width,
                        amplitude: v - lo,
                    });
                }
            }
        }
        blobs
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = args
        .get(i + 1)
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", args[i]))?;
    raw.parse::<T>()
        .with_context(|| format!("Invalid {}: {}", what, raw))
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut n_beads: usize = 4;
    let mut depth: usize = 31;
    let mut sigma_xy: f64 = 1.8;
    let mut sigma_z: f64 = 4.0;
    let mut defocus: f64 = 0.02;
    let mut background: f64 = 100.0;
    let mut width: usize = 15;
    let mut model = ModelKind::Full;
    let mut slices = None;
    let mut show_tracks = false;
    let mut log_enabled = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--beads" => {
                n_beads = parse_value(&args, i, "bead count")?;
                i += 2;
            }
            "--depth" => {
                depth = parse_value(&args, i, "depth")?;
                if depth == 0 {
                    return Err(anyhow::anyhow!("--depth must be >= 1"));
                }
                i += 2;
            }
            "--sigma-xy" => {
                sigma_xy = parse_value(&args, i, "lateral width")?;
                i += 2;
            }
            "--sigma-z" => {
                sigma_z = parse_value(&args, i, "axial width")?;
                i += 2;
            }
            "--defocus" => {
                defocus = parse_value(&args, i, "defocus")?;
                i += 2;
            }
            "--background" => {
                background = parse_value(&args, i, "background")?;
                i += 2;
            }
            "--width" => {
                width = parse_value(&args, i, "window width")?;
                i += 2;
            }
            "--model" => {
                model = parse_value(&args, i, "model kind")?;
                i += 2;
            }
            "--slices" => {
                let raw: String = parse_value(&args, i, "slice range")?;
                let (a, b) = raw
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("--slices expects A:B, got {}", raw))?;
                let a: usize = a.parse().context("Invalid slice range start")?;
                let b: usize = b.parse().context("Invalid slice range end")?;
                slices = Some(a..=b);
                i += 2;
            }
            "--tracks" => {
                show_tracks = true;
                i += 1;
            }
            "--log" => {
                log_enabled = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                return Ok(());
            }
            _ => {
                print_usage(&args[0]);
                return Err(anyhow::anyhow!("Unknown option: {}", args[i]));
            }
        }
    }

    if log_enabled {
        setup_logging()?;
    }

    // Beads on a square grid, foci spread over the middle half of the stack
    let per_side = (n_beads as f64).sqrt().ceil().max(1.0) as usize;
    let spacing = 2 * width.max(8);
    let size = spacing * (per_side + 1);
    let beads: Vec<Bead> = (0..n_beads)
        .map(|k| {
            let (gr, gc) = (k / per_side, k % per_side);
            let frac = if n_beads > 1 { k as f64 / (n_beads - 1) as f64 } else { 0.5 };
            Bead {
                z: depth as f64 * (0.25 + 0.5 * frac),
                row: (spacing * (gr + 1)) as f64 + 0.3,
                col: (spacing * (gc + 1)) as f64 - 0.2,
                amplitude: 1000.0,
                floor: 50.0,
                sigma_xy,
                sigma_z,
                defocus,
                ..Bead::default()
            }
        })
        .collect();
    let stack = bead_stack((depth, size, size), &beads, background);

    println!(
        "Stack: {} slices of {}x{}, {} beads, window {}, model {:?}",
        depth, size, size, n_beads, width, model
    );

    let mut pipeline = PsfPipeline::new().with_window_width(width).with_model(model);
    if let Some(range) = slices {
        pipeline = pipeline.with_slice_range(range);
    }
    let detector = LocalMaxima {
        threshold: 0.2,
        window_width: width as f64,
    };
    let report = pipeline
        .run_with_detector(&stack.view(), &detector)
        .context("PSF pipeline failed")?;

    if !report.unfittable.is_empty() {
        println!("Unfittable blobs: {}", report.unfittable.len());
        for blob in &report.unfittable {
            println!("  row {:.1}, column {:.1}", blob.row, blob.column);
        }
    }

    if show_tracks {
        for (n, t) in report.tracks.iter().enumerate() {
            println!();
            println!(
                "Peak {} at ({:.1}, {:.1}), seed slice {}, failed slices {:?}",
                n,
                t.blob.row,
                t.blob.column,
                t.seed_slice,
                t.failed_slices()
            );
            println!(
                "{:>5} {:>10} {:>8} {:>8} {:>8} {:>8} {:>7} {:>9} {:>5}",
                "slice", "amp", "x0", "y0", "sigma_x", "sigma_y", "rho", "offset", "retry"
            );
            for f in t.rows() {
                let p = &f.params;
                println!(
                    "{:>5} {:>10.2} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>7.3} {:>9.2} {:>5}",
                    f.slice, p.amplitude, p.x0, p.y0, p.sigma_x, p.sigma_y, p.rho, p.offset, f.retried
                );
            }
        }
    }

    println!();
    println!(
        "{:>4} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "peak", "z0", "x0", "y0", "sigma_z", "sigma_x", "sigma_y", "SNR"
    );
    for (n, s) in report.summaries.iter().enumerate() {
        println!(
            "{:>4} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.2}",
            n, s.z0, s.x0, s.y0, s.sigma_z, s.sigma_x, s.sigma_y, s.snr
        );
    }

    let failed = report.summaries.iter().filter(|s| !s.is_finite()).count();
    if failed > 0 {
        println!("{} peak(s) without a z-profile fit", failed);
    }

    Ok(())
}
