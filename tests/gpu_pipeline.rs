//! End-to-end checks of the compute kernels. Each test returns early when the
//! machine has no usable adapter.

mod common;

use image::{Rgba, RgbaImage};
use seam_carver::carve::{Axis, CarveSession, Dimensions, GpuSeamEngine, MinIndexRecord};
use seam_carver::error::CarveError;

macro_rules! engine_or_skip {
    ($max:expr) => {
        match common::engine($max) {
            Some(engine) => engine,
            None => return,
        }
    };
}

const SCENARIO_ENERGY: [f32; 12] = [1.0, 5.0, 1.0, 9.0, 2.0, 2.0, 2.0, 2.0, 9.0, 1.0, 5.0, 1.0];
const SCENARIO_COST: [f32; 12] = [1.0, 5.0, 1.0, 9.0, 3.0, 3.0, 3.0, 3.0, 12.0, 4.0, 8.0, 4.0];

fn session(engine: GpuSeamEngine) -> CarveSession<GpuSeamEngine> {
    CarveSession::new(engine, 64)
}

#[test]
fn four_by_three_vertical_scenario() {
    let mut engine = engine_or_skip!(16);
    let size = Dimensions::new(4, 3);
    let trace = engine
        .trace_energy(Axis::Vertical, size, &SCENARIO_ENERGY)
        .unwrap();

    assert_eq!(trace.cost_map, SCENARIO_COST);
    assert_eq!(trace.endpoint, MinIndexRecord { cost: 4.0, index: 1 });
    // Row 0: the child (1) costs 5, its left neighbour 1 is strictly cheaper
    // and the right neighbour ties with it, so the left one wins.
    assert_eq!(trace.seam, vec![0, 1, 1]);
}

#[test]
fn horizontal_scenario_is_the_transpose() {
    let mut engine = engine_or_skip!(16);
    let vertical = Dimensions::new(4, 3);
    let size = Dimensions::new(3, 4);
    let energy = common::transpose(&SCENARIO_ENERGY, vertical);
    let trace = engine
        .trace_energy(Axis::Horizontal, size, &energy)
        .unwrap();

    assert_eq!(trace.cost_map, common::transpose(&SCENARIO_COST, vertical));
    assert_eq!(trace.endpoint, MinIndexRecord { cost: 4.0, index: 1 });
    assert_eq!(trace.seam, vec![0, 1, 1]);
}

#[test]
fn uniform_last_line_picks_index_zero_across_workgroups() {
    let mut engine = engine_or_skip!(600);
    let size = Dimensions::new(600, 2);
    let trace = engine
        .trace_energy(Axis::Vertical, size, &vec![2.0; size.pixel_count()])
        .unwrap();
    assert_eq!(trace.endpoint, MinIndexRecord { cost: 4.0, index: 0 });
    assert_eq!(trace.seam, vec![0, 0]);
}

#[test]
fn minimum_in_a_later_workgroup_is_found() {
    let mut engine = engine_or_skip!(600);
    let size = Dimensions::new(600, 1);
    let mut energy = vec![3.0; 600];
    energy[517] = 1.0;
    energy[599] = 1.0;
    let trace = engine.trace_energy(Axis::Vertical, size, &energy).unwrap();
    assert_eq!(trace.endpoint, MinIndexRecord { cost: 1.0, index: 517 });
    assert_eq!(trace.seam, vec![517]);
}

#[test]
fn trace_matches_reference_on_both_axes() {
    let mut engine = engine_or_skip!(300);
    for (axis, size, seed) in [
        (Axis::Vertical, Dimensions::new(261, 17), 7),
        (Axis::Horizontal, Dimensions::new(13, 290), 11),
        (Axis::Vertical, Dimensions::new(1, 9), 3),
        (Axis::Horizontal, Dimensions::new(5, 1), 5),
    ] {
        let energy = common::integer_energy(size, seed);
        let trace = engine.trace_energy(axis, size, &energy).unwrap();

        let cost = common::cpu_cost_map(&energy, size, axis);
        assert_eq!(trace.cost_map, cost, "{axis:?} {size}");
        let endpoint = common::cpu_endpoint(&cost, size, axis);
        assert_eq!(trace.endpoint, endpoint, "{axis:?} {size}");
        assert_eq!(
            trace.seam,
            common::cpu_backtrace(&cost, size, axis, endpoint.index),
            "{axis:?} {size}"
        );

        // The first line is the energy itself and costs never undercut it.
        for coord in 0..axis.line_extent(size) {
            let (x, y) = match axis {
                Axis::Vertical => (coord, 0),
                Axis::Horizontal => (0, coord),
            };
            assert_eq!(trace.cost(x, y), energy[(y * size.width + x) as usize]);
        }
        assert!(trace.cost_map.iter().zip(&energy).all(|(c, e)| c >= e));
        assert!(trace.is_connected());
        assert_eq!(trace.seam.len() as u32, axis.line_count(size));
        let extent = axis.line_extent(size) as i32;
        assert!(trace.seam.iter().all(|&c| (0..extent).contains(&c)));
    }
}

fn column_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let shade = 100 + 10 * x as u8;
        Rgba([shade, (y * 7) as u8 + 40, 200 - 10 * x as u8, 255])
    })
}

fn row_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let shade = 100 + 10 * y as u8;
        Rgba([shade, (x * 7) as u8 + 40, 120, 255])
    })
}

fn band_index(value: u8) -> i32 {
    ((f32::from(value) - 100.0) / 10.0).round() as i32
}

#[test]
fn vertical_carving_keeps_column_order_and_reaches_one() {
    let engine = engine_or_skip!(32);
    let mut session = session(engine);
    session.load(&column_image(12, 5)).unwrap();

    session.set_target(7, 5).unwrap();
    session.carve_to_target().unwrap();
    let carved = session.snapshot().unwrap();
    assert_eq!(carved.dimensions(), (7, 5));
    for y in 0..5 {
        let bands: Vec<i32> = (0..7).map(|x| band_index(carved.get_pixel(x, y)[0])).collect();
        assert!(bands.windows(2).all(|p| p[0] < p[1]), "row {y}: {bands:?}");
    }

    session.set_target(1, 5).unwrap();
    session.carve_to_target().unwrap();
    assert_eq!(session.current_size(), Some(Dimensions::new(1, 5)));
    assert_eq!(session.stats().vertical_seams, 6);
    assert_eq!(session.snapshot().unwrap().dimensions(), (1, 5));
}

#[test]
fn horizontal_carving_keeps_row_order() {
    let engine = engine_or_skip!(32);
    let mut session = session(engine);
    session.load(&row_image(6, 11)).unwrap();
    session.set_target(6, 4).unwrap();
    session.carve_to_target().unwrap();

    let carved = session.snapshot().unwrap();
    assert_eq!(carved.dimensions(), (6, 4));
    for x in 0..6 {
        let bands: Vec<i32> = (0..4).map(|y| band_index(carved.get_pixel(x, y)[0])).collect();
        assert!(bands.windows(2).all(|p| p[0] < p[1]), "column {x}: {bands:?}");
    }
}

#[test]
fn both_axes_shrink_together() {
    let engine = engine_or_skip!(32);
    let mut session = session(engine);
    session.load(&column_image(9, 8)).unwrap();
    session.set_target(4, 6).unwrap();
    session.carve_to_target().unwrap();
    assert_eq!(session.stats().vertical_seams, 5);
    assert_eq!(session.stats().horizontal_seams, 2);
    assert_eq!(session.stats().ticks, 5);
    assert_eq!(session.snapshot().unwrap().dimensions(), (4, 6));
}

#[test]
fn energy_after_removal_depends_only_on_remaining_pixels() {
    let engine = engine_or_skip!(32);
    let mut session = session(engine);
    let image = RgbaImage::from_fn(10, 6, |x, y| {
        Rgba([(x * 23 + y * 5) as u8, (x * x * 2) as u8 + 40, (y * 31) as u8, 255])
    });
    session.load(&image).unwrap();

    let before = Dimensions::new(10, 6);
    let engine = session.engine_mut();
    let energy = engine.energy_map(before).unwrap();
    let linear = engine.linear_pixels(before).unwrap();
    assert_close(&energy, &common::cpu_energy(&linear, before));

    session.set_target(9, 6).unwrap();
    session.carve_to_target().unwrap();
    let after = Dimensions::new(9, 6);
    let engine = session.engine_mut();
    engine.refresh_energy(after);
    let energy = engine.energy_map(after).unwrap();
    assert_eq!(energy.len(), after.pixel_count());
    let linear = engine.linear_pixels(after).unwrap();
    assert_close(&energy, &common::cpu_energy(&linear, after));
}

#[test]
fn energy_map_follows_the_carved_image_without_refresh() {
    let engine = engine_or_skip!(32);
    let mut session = session(engine);
    let image = RgbaImage::from_fn(10, 6, |x, y| {
        Rgba([(x * 23 + y * 5) as u8, (x * x * 2) as u8 + 40, (y * 31) as u8, 255])
    });
    session.load(&image).unwrap();

    for target in [Dimensions::new(9, 6), Dimensions::new(7, 4)] {
        session.set_target(target.width, target.height).unwrap();
        session.carve_to_target().unwrap();
        let engine = session.engine_mut();
        let energy = engine.energy_map(target).unwrap();
        let linear = engine.linear_pixels(target).unwrap();
        assert_close(&energy, &common::cpu_energy(&linear, target));
    }
}

fn assert_close(gpu: &[f32], cpu: &[f32]) {
    assert_eq!(gpu.len(), cpu.len());
    for (i, (g, c)) in gpu.iter().zip(cpu).enumerate() {
        assert!((g - c).abs() <= 1e-4, "energy {i}: gpu {g} cpu {c}");
    }
}

#[test]
fn oversized_load_keeps_previous_image() {
    let engine = engine_or_skip!(8);
    let mut session = session(engine);
    assert!(matches!(
        session.load(&RgbaImage::new(9, 4)),
        Err(CarveError::ImageTooLarge { width: 9, height: 4, max: 8 })
    ));
    assert_eq!(session.current_size(), None);

    session.load(&row_image(4, 4)).unwrap();
    let before = session.snapshot().unwrap();
    assert!(session.load(&RgbaImage::new(4, 12)).is_err());
    assert_eq!(session.current_size(), Some(Dimensions::new(4, 4)));
    assert_eq!(session.snapshot().unwrap(), before);
}

#[test]
fn snapshot_round_trips_bright_pixels() {
    let engine = engine_or_skip!(16);
    let mut session = session(engine);
    let image = RgbaImage::from_fn(5, 3, |x, y| {
        Rgba([100 + 30 * x as u8, 150 + 20 * y as u8, 255 - 25 * x as u8, 255])
    });
    session.load(&image).unwrap();
    let copy = session.snapshot().unwrap();
    for (a, b) in image.pixels().zip(copy.pixels()) {
        for k in 0..4 {
            assert!(a[k].abs_diff(b[k]) <= 2, "{a:?} vs {b:?}");
        }
    }
}

#[test]
fn reset_restores_original_pixels() {
    let engine = engine_or_skip!(16);
    let mut session = session(engine);
    session.load(&column_image(8, 4)).unwrap();
    let original = session.snapshot().unwrap();
    session.set_target(3, 2).unwrap();
    session.carve_to_target().unwrap();
    session.reset().unwrap();
    assert_eq!(session.snapshot().unwrap(), original);
}
