#![allow(dead_code)]

use std::sync::Arc;

use seam_carver::carve::{Axis, Dimensions, GpuSeamEngine, MinIndexRecord};
use seam_carver::gpu::GpuContext;

/// Headless engine, or `None` (with a note) when the machine has no adapter.
pub fn engine(max: u32) -> Option<GpuSeamEngine> {
    let gpu = match GpuContext::headless() {
        Ok(gpu) => gpu,
        Err(err) => {
            eprintln!("skipping: no gpu adapter ({err:#})");
            return None;
        }
    };
    Some(GpuSeamEngine::new(Arc::new(gpu), max, true).expect("create seam engine"))
}

/// Deterministic small-integer energies, so every cost sum is exact in f32.
pub fn integer_energy(size: Dimensions, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..size.pixel_count())
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 16) as f32
        })
        .collect()
}

/// Luminance Sobel `|gx| + |gy|` over linear RGBA8, clamped at the edges.
pub fn cpu_energy(linear_rgba: &[u8], size: Dimensions) -> Vec<f32> {
    let (w, h) = (size.width as i64, size.height as i64);
    let luma = |x: i64, y: i64| {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        let i = ((y * w + x) * 4) as usize;
        let c = |k: usize| f32::from(linear_rgba[i + k]) / 255.0;
        0.2126 * c(0) + 0.7152 * c(1) + 0.0722 * c(2)
    };
    let mut out = Vec::with_capacity(size.pixel_count());
    for y in 0..h {
        for x in 0..w {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let l = luma(x + dx, y + dy);
                    gx += (dx * (2 - dy.abs())) as f32 * l;
                    gy += (dy * (2 - dx.abs())) as f32 * l;
                }
            }
            out.push(gx.abs() + gy.abs());
        }
    }
    out
}

/// Row-major cost map for either axis.
pub fn cpu_cost_map(energy: &[f32], size: Dimensions, axis: Axis) -> Vec<f32> {
    let (w, h) = (size.width as usize, size.height as usize);
    let mut cost = energy.to_vec();
    match axis {
        Axis::Vertical => {
            for y in 1..h {
                for x in 0..w {
                    let prev = |xx: usize| cost[(y - 1) * w + xx];
                    let best = prev(x.saturating_sub(1)).min(prev(x).min(prev((x + 1).min(w - 1))));
                    cost[y * w + x] = energy[y * w + x] + best;
                }
            }
        }
        Axis::Horizontal => {
            for x in 1..w {
                for y in 0..h {
                    let prev = |yy: usize| cost[yy * w + x - 1];
                    let best = prev(y.saturating_sub(1)).min(prev(y).min(prev((y + 1).min(h - 1))));
                    cost[y * w + x] = energy[y * w + x] + best;
                }
            }
        }
    }
    cost
}

fn cost_at(cost: &[f32], size: Dimensions, axis: Axis, line: u32, coord: u32) -> f32 {
    let w = size.width;
    match axis {
        Axis::Vertical => cost[(line * w + coord) as usize],
        Axis::Horizontal => cost[(coord * w + line) as usize],
    }
}

/// Leftmost cheapest entry of the last line.
pub fn cpu_endpoint(cost: &[f32], size: Dimensions, axis: Axis) -> MinIndexRecord {
    let last = axis.line_count(size) - 1;
    (0..axis.line_extent(size))
        .map(|coord| MinIndexRecord {
            cost: cost_at(cost, size, axis, last, coord),
            index: coord,
        })
        .min()
        .expect("non-empty line")
}

/// Walk back from `endpoint`, preferring the child, then the lower neighbour.
pub fn cpu_backtrace(cost: &[f32], size: Dimensions, axis: Axis, endpoint: u32) -> Vec<i32> {
    let lines = axis.line_count(size);
    let extent = axis.line_extent(size);
    let mut seam = vec![0i32; lines as usize];
    seam[lines as usize - 1] = endpoint as i32;
    for line in (0..lines - 1).rev() {
        let child = seam[line as usize + 1] as u32;
        let mut best = child;
        let mut best_cost = cost_at(cost, size, axis, line, child);
        if child > 0 {
            let c = cost_at(cost, size, axis, line, child - 1);
            if c < best_cost {
                best = child - 1;
                best_cost = c;
            }
        }
        if child + 1 < extent && cost_at(cost, size, axis, line, child + 1) < best_cost {
            best = child + 1;
        }
        seam[line as usize] = best as i32;
    }
    seam
}

/// Swap rows and columns of a row-major grid.
pub fn transpose(values: &[f32], size: Dimensions) -> Vec<f32> {
    let (w, h) = (size.width as usize, size.height as usize);
    let mut out = vec![0.0; values.len()];
    for y in 0..h {
        for x in 0..w {
            out[x * h + y] = values[y * w + x];
        }
    }
    out
}
