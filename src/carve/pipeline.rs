//! Encoding of the five seam stages into a compute pass.
//!
//! Line-sequential stages (cost, backtrace) are one dispatch per line, each
//! selecting its own params slot by dynamic offset. Dispatches in a pass run
//! in order and wgpu places the storage barriers between them, so line `i`
//! always sees line `i - 1` fully written.

use super::resources::CarveResources;
use super::{Axis, Dimensions, LINE_WORKGROUP_SIZE, SeamJob, TILE_WORKGROUP_SIZE, workgroups};
use crate::gpu::kernels::{CarveParams, Kernels};

/// Stage the params of every line `job` touches into `scratch` and queue the
/// upload. `scratch` is cleared first and keeps its allocation across ticks.
pub(crate) fn write_job_params(
    queue: &wgpu::Queue,
    resources: &CarveResources,
    axis: Axis,
    size: Dimensions,
    scratch: &mut Vec<u8>,
) {
    let lines = axis.line_count(size);
    let stride = resources.params_stride as usize;
    scratch.clear();
    scratch.resize(lines as usize * stride, 0);
    for line in 0..lines {
        let params = carve_params(resources.max, axis, size, line);
        let start = line as usize * stride;
        scratch[start..start + std::mem::size_of::<CarveParams>()]
            .copy_from_slice(bytemuck::bytes_of(&params));
    }
    if !scratch.is_empty() {
        queue.write_buffer(
            &resources.params,
            u64::from(resources.line_offset(axis, 0)),
            scratch,
        );
    }
}

pub(crate) fn write_prepare_params(queue: &wgpu::Queue, resources: &CarveResources, size: Dimensions) {
    let params = carve_params(resources.max, Axis::Vertical, size, 0);
    queue.write_buffer(
        &resources.params,
        u64::from(resources.prepare_offset()),
        bytemuck::bytes_of(&params),
    );
}

fn carve_params(max: u32, axis: Axis, size: Dimensions, line: u32) -> CarveParams {
    CarveParams {
        current_size: [size.width, size.height],
        texture_size: [max, max],
        line,
        axis: axis.as_u32(),
        _pad: [0; 2],
    }
}

/// Remove one seam of `job` from the current source image into the other
/// image. The caller swaps the source afterwards.
pub(crate) fn encode_seam(
    pass: &mut wgpu::ComputePass<'_>,
    kernels: &Kernels,
    resources: &CarveResources,
    job: SeamJob,
) {
    let source = resources.source;
    let first = resources.line_offset(job.axis, 0);
    encode_energy(pass, kernels, resources, first, job.size, source);
    encode_trace(pass, kernels, resources, job.axis, job.size);

    pass.set_pipeline(&kernels.remove);
    pass.set_bind_group(0, &resources.params_group, &[first]);
    pass.set_bind_group(1, &resources.remove_groups[source], &[]);
    let shrunk = job.axis.shrink(job.size);
    dispatch_tiles(pass, shrunk);
}

/// Energy of `images[source]`; `params_offset` selects a slot whose current
/// size equals `size`.
pub(crate) fn encode_energy(
    pass: &mut wgpu::ComputePass<'_>,
    kernels: &Kernels,
    resources: &CarveResources,
    params_offset: u32,
    size: Dimensions,
    source: usize,
) {
    pass.set_pipeline(&kernels.energy);
    pass.set_bind_group(0, &resources.params_group, &[params_offset]);
    pass.set_bind_group(1, &resources.energy_groups[source], &[]);
    dispatch_tiles(pass, size);
}

/// Cost map, two-phase minimum and backtrace over the current energy map.
pub(crate) fn encode_trace(
    pass: &mut wgpu::ComputePass<'_>,
    kernels: &Kernels,
    resources: &CarveResources,
    axis: Axis,
    size: Dimensions,
) {
    let lines = axis.line_count(size);
    let line_groups = workgroups(axis.line_extent(size), LINE_WORKGROUP_SIZE);

    pass.set_pipeline(&kernels.cost);
    pass.set_bind_group(1, &resources.cost_group, &[]);
    for line in 0..lines {
        pass.set_bind_group(0, &resources.params_group, &[resources.line_offset(axis, line)]);
        pass.dispatch_workgroups(line_groups, 1, 1);
    }

    let first = resources.line_offset(axis, 0);
    pass.set_bind_group(0, &resources.params_group, &[first]);
    pass.set_bind_group(1, &resources.reduce_group, &[]);
    pass.set_pipeline(&kernels.find_min_local);
    pass.dispatch_workgroups(line_groups, 1, 1);
    pass.set_pipeline(&kernels.find_min_global);
    pass.dispatch_workgroups(1, 1, 1);

    pass.set_pipeline(&kernels.backtrace);
    pass.set_bind_group(1, &resources.backtrace_group, &[]);
    for line in (0..lines).rev() {
        pass.set_bind_group(0, &resources.params_group, &[resources.line_offset(axis, line)]);
        pass.dispatch_workgroups(1, 1, 1);
    }
}

/// Convert the sRGB upload into the linear working image 0.
pub(crate) fn encode_prepare(
    pass: &mut wgpu::ComputePass<'_>,
    kernels: &Kernels,
    resources: &CarveResources,
    size: Dimensions,
) {
    pass.set_pipeline(&kernels.prepare);
    pass.set_bind_group(0, &resources.params_group, &[resources.prepare_offset()]);
    pass.set_bind_group(1, &resources.prepare_group, &[]);
    dispatch_tiles(pass, size);
}

fn dispatch_tiles(pass: &mut wgpu::ComputePass<'_>, size: Dimensions) {
    let x = workgroups(size.width, TILE_WORKGROUP_SIZE);
    let y = workgroups(size.height, TILE_WORKGROUP_SIZE);
    if x > 0 && y > 0 {
        pass.dispatch_workgroups(x, y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_carry_line_and_axis() {
        let params = carve_params(64, Axis::Horizontal, Dimensions::new(10, 7), 3);
        assert_eq!(params.current_size, [10, 7]);
        assert_eq!(params.texture_size, [64, 64]);
        assert_eq!(params.line, 3);
        assert_eq!(params.axis, 1);
    }
}
