//! End-to-end: synthesize bead stacks with known PSFs, run the pipeline and
//! check the recovered focus positions and widths.

use ndarray::{Array3, ArrayView2};
use psfstack::synthetic::{bead_stack, Bead};
use psfstack::{Blob, ModelKind, ProfileFitOptions, PsfPipeline, SolverConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Local maxima above 20% of the projection's dynamic range, one per 5×5 area.
fn local_peaks(projection: ArrayView2<f64>) -> Vec<Blob> {
    let (rows, cols) = projection.dim();
    let lo = projection.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = projection.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let level = lo + 0.2 * (hi - lo);

    let mut blobs: Vec<Blob> = Vec::new();
    for r in 1..rows - 1 {
        for c in 1..cols - 1 {
            let v = projection[[r, c]];
            if v <= level {
                continue;
            }
            let is_peak = (r - 1..=r + 1).all(|rr| (c - 1..=c + 1).all(|cc| projection[[rr, cc]] <= v));
            let taken = blobs
                .iter()
                .any(|b| (b.row - r as f64).abs() <= 2.0 && (b.column - c as f64).abs() <= 2.0);
            if is_peak && !taken {
                blobs.push(Blob {
                    row: r as f64,
                    column: c as f64,
                    window_width: 15.0,
                    amplitude: v - lo,
                });
            }
        }
    }
    blobs
}

#[test]
fn test_single_bead_noiseless() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let bead = Bead {
        z: 10.3,
        row: 30.0,
        col: 34.0,
        amplitude: 100.0,
        floor: 5.0,
        sigma_xy: 2.0,
        sigma_z: 3.0,
        ..Bead::default()
    };
    let stack = bead_stack((21, 64, 64), &[bead], 10.0);
    let blob = Blob {
        row: 30.0,
        column: 34.0,
        window_width: 15.0,
        amplitude: 105.0,
    };

    let report = PsfPipeline::new().run(&stack.view(), &[blob]).unwrap();
    assert_eq!(report.tracks.len(), 1);
    assert!(report.unfittable.is_empty());

    let track = &report.tracks[0];
    assert_eq!(track.seed_slice, 10);
    assert_eq!(track.fits.len(), 21);
    assert_eq!(track.rows().count(), 21);

    let psf = report.summaries[0];
    assert!((psf.z0 - 10.3).abs() < 1e-3, "z0: {}", psf.z0);
    assert!((psf.sigma_z - 3.0).abs() < 1e-3, "sigma_z: {}", psf.sigma_z);
    assert!((psf.x0 - 34.0).abs() < 1e-3, "x0: {}", psf.x0);
    assert!((psf.y0 - 30.0).abs() < 1e-3, "y0: {}", psf.y0);
    assert!((psf.sigma_x - 2.0).abs() < 1e-3, "sigma_x: {}", psf.sigma_x);
    assert!((psf.sigma_y - 2.0).abs() < 1e-3, "sigma_y: {}", psf.sigma_y);
    assert!((psf.snr - 20.0).abs() < 1e-2, "snr: {}", psf.snr);
}

#[test]
fn test_noisy_camera_stack() {
    let truth = [
        (30.3, 29.8, 9.2),
        (30.1, 60.4, 12.0),
        (59.7, 30.2, 14.5),
        (60.2, 59.6, 17.8),
    ];
    let beads: Vec<Bead> = truth
        .iter()
        .map(|&(row, col, z)| Bead {
            z,
            row,
            col,
            amplitude: 1000.0,
            floor: 50.0,
            sigma_xy: 2.0,
            sigma_z: 4.0,
            defocus: 0.01,
            ..Bead::default()
        })
        .collect();
    let clean = bead_stack((27, 90, 90), &beads, 200.0);

    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, 3.0).unwrap();
    let stack: Array3<u16> = clean.mapv(|v| (v + noise.sample(&mut rng)).round().clamp(0.0, 65535.0) as u16);

    let pipeline = PsfPipeline::new()
        .with_model(ModelKind::AxisAligned)
        .with_solver(SolverConfig::default().with_max_iterations(200))
        .with_profile_fit(ProfileFitOptions::default());
    let report = pipeline.run_with_detector(&stack.view(), &local_peaks).unwrap();

    assert!(report.unfittable.is_empty(), "{:?}", report.unfittable);
    assert_eq!(report.tracks.len(), 4);

    for &(row, col, z) in &truth {
        let (n, track) = report
            .tracks
            .iter()
            .enumerate()
            .find(|(_, t)| (t.blob.row - row).abs() < 2.0 && (t.blob.column - col).abs() < 2.0)
            .unwrap_or_else(|| panic!("no track near ({}, {})", row, col));
        assert_eq!(track.fits.len(), 27);
        for f in &track.fits {
            assert!(f.params.sigma_x >= 0.0 && f.params.sigma_y >= 0.0);
        }

        let psf = report.summaries[n];
        assert!(psf.is_finite(), "{:?}", psf);
        assert!((psf.z0 - z).abs() < 0.1, "z0: {} vs {}", psf.z0, z);
        assert!((psf.sigma_z - 4.0).abs() < 0.2, "sigma_z: {}", psf.sigma_z);
        assert!((psf.x0 - col).abs() < 0.1, "x0: {} vs {}", psf.x0, col);
        assert!((psf.y0 - row).abs() < 0.1, "y0: {} vs {}", psf.y0, row);
        assert!((psf.sigma_x - 2.0).abs() < 0.1, "sigma_x: {}", psf.sigma_x);
        assert!((psf.sigma_y - 2.0).abs() < 0.1, "sigma_y: {}", psf.sigma_y);
        assert!((psf.snr - 20.0).abs() < 2.0, "snr: {}", psf.snr);
    }
}
