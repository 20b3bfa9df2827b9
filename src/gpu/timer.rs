//! Asynchronous per-tick GPU timing with timestamp queries.
//!
//! Each tick brackets its compute pass with a pair of timestamps written into
//! one of [`TIMER_SLOTS`] slots. The resolved values are mapped back without
//! blocking and attributed to the tick whenever they arrive.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

pub const TIMER_SLOTS: usize = 8;

const QUERIES_PER_SLOT: u32 = 2;
const TIMESTAMP_BYTES: u64 = std::mem::size_of::<u64>() as u64;
const SLOT_BYTES: u64 = TIMESTAMP_BYTES * QUERIES_PER_SLOT as u64;
// Query resolves must land on 256-byte offsets.
const RESOLVE_STRIDE: u64 = wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT;

/// GPU time measured for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTiming {
    /// Seams removed in the measured tick.
    pub seams: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Recording { seams: u32 },
    Mapping { seams: u32 },
}

struct TimerSlot {
    readback: wgpu::Buffer,
    state: SlotState,
}

pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    slots: Vec<TimerSlot>,
    period_ns: f64,
    mapped_tx: Sender<(usize, Result<(), wgpu::BufferAsyncError>)>,
    mapped_rx: Receiver<(usize, Result<(), wgpu::BufferAsyncError>)>,
}

impl GpuTimer {
    /// Returns `None` when the device was created without timestamp queries.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Option<Self> {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return None;
        }
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("tick-timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: TIMER_SLOTS as u32 * QUERIES_PER_SLOT,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tick-timestamps-resolve"),
            size: RESOLVE_STRIDE * TIMER_SLOTS as u64,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let slots = (0..TIMER_SLOTS)
            .map(|_| TimerSlot {
                readback: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("tick-timestamps-readback"),
                    size: SLOT_BYTES,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
                state: SlotState::Free,
            })
            .collect();
        let (mapped_tx, mapped_rx) = unbounded();
        Some(Self {
            query_set,
            resolve,
            slots,
            period_ns: f64::from(queue.get_timestamp_period()),
            mapped_tx,
            mapped_rx,
        })
    }

    /// Reserve a slot for the next tick. `None` when every slot is still
    /// waiting on an earlier tick; that tick simply goes unmeasured.
    pub fn begin(&mut self, seams: u32) -> Option<usize> {
        let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Free)
        else {
            debug!("all timestamp slots busy; skipping tick timing");
            return None;
        };
        self.slots[index].state = SlotState::Recording { seams };
        Some(index)
    }

    pub fn pass_writes(&self, slot: usize) -> wgpu::ComputePassTimestampWrites<'_> {
        let first = slot as u32 * QUERIES_PER_SLOT;
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(first),
            end_of_pass_write_index: Some(first + 1),
        }
    }

    /// Record the resolve and readback copy after the timed pass.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder, slot: usize) {
        let first = slot as u32 * QUERIES_PER_SLOT;
        let offset = slot as u64 * RESOLVE_STRIDE;
        encoder.resolve_query_set(
            &self.query_set,
            first..first + QUERIES_PER_SLOT,
            &self.resolve,
            offset,
        );
        encoder.copy_buffer_to_buffer(
            &self.resolve,
            offset,
            &self.slots[slot].readback,
            0,
            SLOT_BYTES,
        );
    }

    /// Start mapping the slot once its commands have been submitted.
    pub fn submitted(&mut self, slot: usize) {
        let entry = &mut self.slots[slot];
        let SlotState::Recording { seams } = entry.state else {
            return;
        };
        entry.state = SlotState::Mapping { seams };
        let tx = self.mapped_tx.clone();
        entry
            .readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |res| {
                let _ = tx.send((slot, res));
            });
    }

    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Free)
            .count()
    }

    /// Gather every timing whose readback has completed. With `wait` the
    /// call blocks until all submitted ticks have been measured.
    pub fn collect(&mut self, device: &wgpu::Device, wait: bool) -> Vec<GpuTiming> {
        if self.in_flight() == 0 {
            return Vec::new();
        }
        let poll = if wait {
            wgpu::PollType::Wait
        } else {
            wgpu::PollType::Poll
        };
        if let Err(err) = device.poll(poll) {
            warn!(error = %err, "device poll failed while collecting timings");
        }

        let mut timings = Vec::new();
        while let Ok((index, result)) = self.mapped_rx.try_recv() {
            let slot = &mut self.slots[index];
            let SlotState::Mapping { seams } = slot.state else {
                continue;
            };
            slot.state = SlotState::Free;
            if let Err(err) = result {
                warn!(error = %err, "timestamp readback failed");
                continue;
            }
            let ticks = {
                let data = slot.readback.slice(..).get_mapped_range();
                let [start, end]: [u64; 2] =
                    bytemuck::pod_read_unaligned(&data[..SLOT_BYTES as usize]);
                end.saturating_sub(start)
            };
            slot.readback.unmap();
            timings.push(GpuTiming {
                seams,
                elapsed: ticks_to_duration(ticks, self.period_ns),
            });
        }
        timings
    }
}

fn ticks_to_duration(ticks: u64, period_ns: f64) -> Duration {
    Duration::from_nanos((ticks as f64 * period_ns).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_scale_by_period() {
        assert_eq!(ticks_to_duration(1_000, 1.0), Duration::from_micros(1));
        assert_eq!(ticks_to_duration(3, 83.333), Duration::from_nanos(250));
        assert_eq!(ticks_to_duration(0, 40.0), Duration::ZERO);
    }

    #[test]
    fn slot_offsets_respect_resolve_alignment() {
        assert_eq!(RESOLVE_STRIDE % 256, 0);
        assert!(SLOT_BYTES <= RESOLVE_STRIDE);
    }
}
