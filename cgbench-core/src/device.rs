use crate::context::GpuContext;
use crate::error::CgCoreError;
use crate::ops::{self, PowerStepBuffers};
use crate::program::{BuildOptions, CgProgram, KernelSource};
use crate::vector::MirroredVector;
use crate::workgroup::{sizing_for, DeviceClass, LaunchGeometry, WorkGroupSizing};
use serde::Serialize;
use std::{mem, sync::Arc};

/// Compute device running the power-step kernels.
///
/// Owns the wgpu context, the work-group sizing chosen for the adapter and
/// the program built for it.
#[derive(Debug)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
    sizing: Box<dyn WorkGroupSizing>,
    program: CgProgram,
    options: BuildOptions,
}

impl GpuDevice {
    /// Selects an adapter of the preferred class, chooses the work-group
    /// layout for it and builds the program with `CLASS = class_letter`.
    pub async fn new(
        preferred: DeviceClass,
        class_letter: char,
        source: &KernelSource,
    ) -> Result<Self, CgCoreError> {
        let context = GpuContext::new(preferred).await?;
        let sizing = sizing_for(context.adapter_info.device_type, &context.limits);
        let options = BuildOptions {
            class: class_letter,
            local_size: sizing.local_size(),
        };
        let program = CgProgram::build(&context, source, sizing.device_class(), &options).await?;
        log::info!(
            "GpuDevice ready on '{}' ({} layout, local size {})",
            context.adapter_info.name,
            sizing.device_class(),
            options.local_size
        );
        Ok(Self {
            context: Arc::new(context),
            sizing,
            program,
            options,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.context.adapter_info
    }

    /// Layout family in use, `Cpu` or `Gpu`.
    pub fn device_class(&self) -> DeviceClass {
        self.sizing.device_class()
    }

    pub fn build_options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn geometry(&self, n: usize) -> LaunchGeometry {
        self.sizing.geometry(n)
    }

    // --- Resource Creation ---

    /// Creates a host/device pair initialized from `data`.
    pub fn create_vector(&self, label: &str, data: &[f64]) -> Result<MirroredVector, CgCoreError> {
        if data.is_empty() {
            return Err(CgCoreError::InvalidDimensions(
                "Cannot create mirrored vector from empty slice".to_string(),
            ));
        }
        if data.len() > u32::MAX as usize {
            return Err(CgCoreError::InvalidDimensions(format!(
                "Vector '{}' has {} elements, more than a kernel can index",
                label,
                data.len()
            )));
        }
        let buffer = self.context.create_gpu_buffer_with_data(
            label,
            bytemuck::cast_slice(data),
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        );
        Ok(MirroredVector::new_internal(
            label.to_string(),
            data.to_vec(),
            buffer,
            Arc::clone(&self.context),
        ))
    }

    /// Allocates the `x`/`z` pair and the partial-sum buffers for vectors of
    /// the given initial contents.
    pub fn create_power_step(
        &self,
        x: &[f64],
        z: &[f64],
    ) -> Result<PowerStepBuffers, CgCoreError> {
        if x.len() != z.len() {
            return Err(CgCoreError::InvalidDimensions(format!(
                "x ({}) and z ({}) must have the same length",
                x.len(),
                z.len()
            )));
        }
        let geometry = self.sizing.geometry(x.len());
        log::debug!(
            "Power step layout for n={}: local {}, global {}, chunk {}, {} partials ({} bytes each buffer)",
            x.len(),
            geometry.local_size,
            geometry.global_size,
            geometry.chunk,
            geometry.groups(),
            geometry.groups() as usize * mem::size_of::<f64>()
        );
        let x = self.create_vector("x", x)?;
        let z = self.create_vector("z", z)?;
        Ok(PowerStepBuffers::new(
            &self.context,
            &self.program,
            x,
            z,
            geometry,
        ))
    }

    // --- Operations ---

    /// Runs the reduction kernel and returns the per-group partials of
    /// `x.z` and `z.z`, in group order.
    pub async fn reduce_partials(
        &self,
        buffers: &mut PowerStepBuffers,
    ) -> Result<(Vec<f64>, Vec<f64>), CgCoreError> {
        ops::internal_reduce_partials(&self.context, &self.program, buffers).await
    }

    /// Returns `(x.z, z.z)`: device partials summed on the host in group
    /// order.
    pub async fn dot_products(
        &self,
        buffers: &mut PowerStepBuffers,
    ) -> Result<(f64, f64), CgCoreError> {
        let (partial_xz, partial_zz) = self.reduce_partials(buffers).await?;
        Ok((ops::ordered_sum(&partial_xz), ops::ordered_sum(&partial_zz)))
    }

    /// Computes `x = norm_factor * z` on the device and downloads `x`.
    pub async fn normalize(
        &self,
        buffers: &mut PowerStepBuffers,
        norm_factor: f64,
    ) -> Result<(), CgCoreError> {
        ops::internal_normalize(&self.context, &self.program, buffers, norm_factor)?;
        buffers.x_mut().sync_to_host().await?;
        Ok(())
    }

    // --- Utility ---

    /// Returns the current transfer statistics.
    pub fn get_transfer_stats(&self) -> TransferStats {
        let (bytes_to_gpu, bytes_from_gpu) = self.context.get_transfer_stats();
        TransferStats {
            bytes_to_gpu,
            bytes_from_gpu,
        }
    }

    /// Resets the transfer statistics counters to zero.
    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }
}

/// Bytes moved between host and device through the instrumented paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}
