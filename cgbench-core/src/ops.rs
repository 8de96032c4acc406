// Kernel dispatch for the two power-step programs. Called through the
// methods on GpuDevice.

use crate::{
    context::GpuContext,
    error::CgCoreError,
    program::{CgProgram, KernelParams},
    traits::Vector,
    vector::MirroredVector,
    workgroup::LaunchGeometry,
};
use num_traits::Float;
use std::mem;

/// Device state for one inverse-power run: the `x`/`z` pair, the two
/// per-group partial buffers, the uniform block and the bind group tying
/// them to the program layout.
#[derive(Debug)]
pub struct PowerStepBuffers {
    x: MirroredVector,
    z: MirroredVector,
    partial_xz: wgpu::Buffer,
    partial_zz: wgpu::Buffer,
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    geometry: LaunchGeometry,
}

impl PowerStepBuffers {
    pub(crate) fn new(
        context: &GpuContext,
        program: &CgProgram,
        x: MirroredVector,
        z: MirroredVector,
        geometry: LaunchGeometry,
    ) -> Self {
        let groups = geometry.groups() as u64;
        let partial_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let partial_size = groups * mem::size_of::<f64>() as u64;
        let partial_xz = context.create_empty_buffer("partial x.z", partial_size, partial_usage);
        let partial_zz = context.create_empty_buffer("partial z.z", partial_size, partial_usage);
        let params = context.create_empty_buffer(
            "power step params",
            mem::size_of::<KernelParams>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        let bind_group = context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Power Step Bind Group"),
                layout: &program.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: x.inner().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: z.inner().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: partial_xz.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: partial_zz.as_entire_binding(),
                    },
                ],
            });

        Self {
            x,
            z,
            partial_xz,
            partial_zz,
            params,
            bind_group,
            geometry,
        }
    }

    pub fn x(&self) -> &MirroredVector {
        &self.x
    }

    pub fn x_mut(&mut self) -> &mut MirroredVector {
        &mut self.x
    }

    pub fn z(&self) -> &MirroredVector {
        &self.z
    }

    pub fn z_mut(&mut self) -> &mut MirroredVector {
        &mut self.z
    }

    pub fn geometry(&self) -> LaunchGeometry {
        self.geometry
    }

    fn kernel_params(&self, norm_factor: f64) -> KernelParams {
        KernelParams {
            norm_factor,
            n: self.z.len() as u32,
            chunk: self.geometry.chunk,
        }
    }
}

fn dispatch(
    context: &GpuContext,
    pipeline: &wgpu::ComputePipeline,
    buffers: &PowerStepBuffers,
    label: &str,
) {
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(pipeline);
        compute_pass.set_bind_group(0, &buffers.bind_group, &[]);
        compute_pass.dispatch_workgroups(buffers.geometry.groups(), 1, 1);
    }
    context.queue.submit(std::iter::once(encoder.finish()));
}

/// Runs `main_0` and reads back the per-group partials of `x.z` and `z.z`.
pub(crate) async fn internal_reduce_partials(
    context: &GpuContext,
    program: &CgProgram,
    buffers: &mut PowerStepBuffers,
) -> Result<(Vec<f64>, Vec<f64>), CgCoreError> {
    buffers.x.sync_to_device()?;
    buffers.z.sync_to_device()?;
    context.write_buffer(&buffers.params, &[buffers.kernel_params(0.0)])?;

    dispatch(context, &program.reduce_pipeline, buffers, "Power Step Reduce");

    let groups = buffers.geometry.groups() as usize;
    let partial_xz = context.read_buffer_to_cpu(&buffers.partial_xz, groups).await?;
    let partial_zz = context.read_buffer_to_cpu(&buffers.partial_zz, groups).await?;
    Ok((partial_xz, partial_zz))
}

/// Runs `main_1`, leaving `x = norm_factor * z` on the device.
pub(crate) fn internal_normalize(
    context: &GpuContext,
    program: &CgProgram,
    buffers: &mut PowerStepBuffers,
    norm_factor: f64,
) -> Result<(), CgCoreError> {
    buffers.z.sync_to_device()?;
    buffers.x.sync_to_device()?;
    context.write_buffer(&buffers.params, &[buffers.kernel_params(norm_factor)])?;

    dispatch(context, &program.normalize_pipeline, buffers, "Power Step Normalize");
    buffers.x.mark_device_written()
}

/// Sums `values` front to back.
///
/// The order is fixed so repeated runs over the same partials give
/// identical results.
pub fn ordered_sum<T: Float>(values: &[T]) -> T {
    values.iter().fold(T::zero(), |acc, &v| acc + v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_sum_matches_reordered_sum_within_epsilon() {
        let partials: Vec<f64> = (1..=64).map(|i| 1.0 / i as f64).collect();
        let forward = ordered_sum(&partials);
        let mut reversed = partials.clone();
        reversed.reverse();
        let backward = ordered_sum(&reversed);
        assert!((forward - backward).abs() <= 1e-12 * forward.abs());
    }

    #[test]
    fn test_ordered_sum_empty_is_zero() {
        assert_eq!(ordered_sum::<f32>(&[]), 0.0);
    }
}
