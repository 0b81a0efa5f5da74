//! Integration tests for GILDAS cubes on disk and the operations built on
//! them.

use gildas_pure::codec::Encoding;
use gildas_pure::cube::{CubeData, CubeRecord};
use gildas_pure::cube_header::{AxisFormula, Beam};
use gildas_pure::kernel::{ConvolutionOptions, Kernel};
use gildas_pure::reproject::{reproject, ReprojectOptions};
use gildas_pure::Error;
use ndarray::Array3;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ramp_cube(nx: usize, ny: usize, nz: usize, encoding: Encoding) -> CubeRecord {
    let vol = Array3::from_shape_fn((nz, ny, nx), |(k, j, i)| (k * 100 + j * 10 + i) as f32);
    let mut c = CubeRecord::from_volume(encoding, vol).unwrap();
    let h = c.header_mut();
    h.axes[0] = AxisFormula::new((nx as f64 + 1.0) / 2.0, 0.0, -2.0e-5);
    h.axes[1] = AxisFormula::new((ny as f64 + 1.0) / 2.0, 0.0, 2.0e-5);
    h.axes[2] = AxisFormula::new(1.0, -10.0, 0.5);
    h.source = "SGRB2".into();
    h.line = "HCN(1-0)".into();
    h.rest_freq = 88631.6022;
    h.blank = -1000.0;
    h.blank_tolerance = 0.5;
    c
}

fn write_temp(cube: &CubeRecord) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    cube.write(file.path()).unwrap();
    file
}

// ===========================================================================
// File round trips
// ===========================================================================

#[test]
fn write_then_open_streams_planes() {
    for enc in [Encoding::Ieee, Encoding::Eeei] {
        let cube = ramp_cube(7, 5, 4, enc);
        let file = write_temp(&cube);
        let opened = CubeRecord::open(file.path()).unwrap();
        assert!(!opened.is_materialized());
        assert_eq!(opened.backing_path(), Some(file.path()));
        assert_eq!(opened.header().encoding, enc);
        assert_eq!(opened.header().source, "SGRB2");
        assert_eq!(opened.plane(2).unwrap(), cube.plane(2).unwrap());
        assert_eq!(opened.spectrum_at(3, 1).unwrap(), vec![13.0, 113.0, 213.0, 313.0]);
        assert_eq!(opened.to_volume().unwrap(), *cube.volume().unwrap());
    }
}

#[test]
fn plane_out_of_range() {
    let file = write_temp(&ramp_cube(3, 3, 2, Encoding::Ieee));
    let opened = CubeRecord::open(file.path()).unwrap();
    assert!(matches!(opened.plane(2), Err(Error::ChannelRange { index: 2, len: 2 })));
}

#[test]
fn truncated_cube_rejected() {
    let bytes = ramp_cube(8, 8, 8, Encoding::Ieee).to_bytes().unwrap();
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), &bytes[..bytes.len() - 100]).unwrap();
    assert!(matches!(CubeRecord::open(file.path()), Err(Error::CorruptOffset { .. })));
}

#[test]
fn mutation_materializes() {
    let file = write_temp(&ramp_cube(4, 4, 3, Encoding::Ieee));
    let mut c = CubeRecord::open(file.path()).unwrap();
    c.multiply(2.0).unwrap();
    assert!(c.is_materialized());
    assert!(matches!(c.data(), CubeData::Materialized(_)));
    assert_eq!(c.header().max, 2.0 * 233.0);
    assert_eq!(c.header().max_loc, [4, 4, 3, 1]);

    // Back to the file contents.
    c.reset_backing_path(file.path()).unwrap();
    assert!(!c.is_materialized());
    assert_eq!(c.plane(0).unwrap()[[0, 1]], 1.0);
}

#[test]
fn file_backed_cube_not_written_over_itself() {
    let file = write_temp(&ramp_cube(2, 2, 2, Encoding::Ieee));
    let c = CubeRecord::open(file.path()).unwrap();
    assert!(matches!(c.write(file.path()), Err(Error::InvalidValue(_))));
}

// ===========================================================================
// Rebinning
// ===========================================================================

#[test]
fn rebin_to_own_size_is_identity() {
    let cube = ramp_cube(6, 4, 5, Encoding::Ieee);
    let same = cube.rebinned([6, 4, 5]).unwrap();
    assert_eq!(same.volume(), cube.volume());
    assert_eq!(same.header().axes, cube.header().axes);
}

#[test]
fn streamed_rebin_matches_in_memory() {
    let cube = ramp_cube(9, 6, 7, Encoding::Eeei);
    let file = write_temp(&cube);
    let opened = CubeRecord::open(file.path()).unwrap();
    let a = cube.rebinned([3, 3, 4]).unwrap();
    let b = opened.rebinned([3, 3, 4]).unwrap();
    assert_eq!(a.volume(), b.volume());
    assert_eq!(a.header().nx(), 3);
    assert_eq!(a.header().ny(), 3);
    assert_eq!(a.header().nz(), 4);
    // Cell (0, 0, 0) averages planes 0..2, rows 0..2 and columns 0..3.
    assert_eq!(a.volume().unwrap()[[0, 0, 0]], 50.0 + 5.0 + 1.0);
    // World coordinates of the cube center are preserved.
    let before = cube.header().axes[0].world((9.0 + 1.0) / 2.0);
    let after = a.header().axes[0].world((3.0 + 1.0) / 2.0);
    assert!((before - after).abs() < 1e-12);
}

// ===========================================================================
// Convolution and reprojection
// ===========================================================================

#[test]
fn uniform_plane_survives_convolution() {
    let vol = Array3::<f32>::from_elem((2, 9, 9), 3.5);
    let mut c = CubeRecord::from_volume(Encoding::Ieee, vol).unwrap();
    let beam = Beam {
        major: 3.0,
        minor: 2.0,
        position_angle: 0.4,
    };
    let kernel = Kernel::from_beam(&beam, 1.0, 1.0, 3.0).unwrap();
    c.convolve(&kernel, &ConvolutionOptions::default()).unwrap();
    assert!(c.volume().unwrap().iter().all(|v| (v - 3.5).abs() < 1e-5));
}

#[test]
fn reproject_file_cube_onto_coarser_grid() {
    let cube = ramp_cube(8, 8, 4, Encoding::Ieee);
    let file = write_temp(&cube);
    let opened = CubeRecord::open(file.path()).unwrap();

    let mut target = cube.header().clone();
    target.set_dims(4, 4, 4);
    target.axes[0] = AxisFormula::new(2.5, 0.0, -4.0e-5);
    target.axes[1] = AxisFormula::new(2.5, 0.0, 4.0e-5);
    let opts = ReprojectOptions {
        convolve: false,
        velocity_axis: false,
        ..ReprojectOptions::default()
    };
    let out = reproject(&opened, &target, &opts).unwrap();
    assert_eq!(out.header().nx(), 4);
    let v = out.volume().unwrap();
    // Target pixel (1, 1) sits halfway between source pixels 2 and 3.
    assert!((v[[0, 1, 1]] - 27.5).abs() < 1e-3);
    assert_eq!(out.header().source, "SGRB2");
}

// ===========================================================================
// Derived products
// ===========================================================================

#[test]
fn moment_zero_over_channel_range() {
    let cube = ramp_cube(3, 2, 4, Encoding::Ieee);
    let m0 = cube.moment0(1, 2, None).unwrap();
    assert_eq!(m0.header().nz(), 1);
    let v = m0.volume().unwrap();
    // (100 + 200) * 0.5 km/s at pixel (0, 0).
    assert_eq!(v[[0, 0, 0]], 150.0);
    assert_eq!(m0.header().unit, "K.km/s");

    let clipped = cube.moment0(0, 3, Some(250.0)).unwrap();
    assert_eq!(clipped.volume().unwrap()[[0, 0, 0]], 150.0);
    assert!(matches!(cube.moment0(0, 4, None), Err(Error::ChannelRange { .. })));
}

#[test]
fn strip_along_row() {
    let cube = ramp_cube(5, 5, 2, Encoding::Ieee);
    let h = cube.header();
    let y = h.axes[1].world(3.0);
    let path = [(h.axes[0].world(1.0), y), (h.axes[0].world(5.0), y)];
    let strip = cube.strip(&path).unwrap();
    assert_eq!(strip.positions.len(), 5);
    assert_eq!(strip.data.dim(), (5, 2));
    for (n, row) in strip.data.outer_iter().enumerate() {
        assert!((row[0] - (20 + n) as f32).abs() < 1e-3);
        assert!((row[1] - (120 + n) as f32).abs() < 1e-3);
    }
}
