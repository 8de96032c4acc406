//! Device program construction for the power-step kernels.

use crate::context::GpuContext;
use crate::error::CgCoreError;
use crate::workgroup::DeviceClass;
use std::borrow::Cow;
use std::mem;
use std::path::PathBuf;

const CG_CPU_SOURCE: &str = include_str!("shaders/cg_cpu.wgsl");
const CG_GPU_SOURCE: &str = include_str!("shaders/cg_gpu.wgsl");

/// Entry point of the partial dot-product kernel.
pub const REDUCE_ENTRY: &str = "main_0";
/// Entry point of the normalization kernel.
pub const NORMALIZE_ENTRY: &str = "main_1";

/// Where kernel source is loaded from.
#[derive(Debug, Clone, Default)]
pub enum KernelSource {
    /// Sources compiled into the crate.
    #[default]
    Embedded,
    /// A directory holding `cg_cpu.wgsl` and `cg_gpu.wgsl`.
    Directory(PathBuf),
}

impl KernelSource {
    pub(crate) fn load(&self, class: DeviceClass) -> Result<(String, Cow<'static, str>), CgCoreError> {
        let file = class.kernel_file();
        match self {
            KernelSource::Embedded => {
                let source = match class {
                    DeviceClass::Cpu => CG_CPU_SOURCE,
                    DeviceClass::Gpu | DeviceClass::Any => CG_GPU_SOURCE,
                };
                Ok((format!("<embedded>/{}", file), Cow::Borrowed(source)))
            }
            KernelSource::Directory(dir) => {
                let path = dir.join(file);
                log::info!("Loading kernel source from {}", path.display());
                let source = std::fs::read_to_string(&path)?;
                Ok((path.display().to_string(), Cow::Owned(source)))
            }
        }
    }
}

/// Constants injected ahead of the kernel source, playing the role of
/// compiler defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Problem class letter, `'U'` when unknown.
    pub class: char,
    /// Work items per group; sizes the workgroup scratch arrays.
    pub local_size: u32,
}

impl BuildOptions {
    pub fn prelude(&self) -> String {
        format!(
            "// build options: CLASS={} LSIZE={}\nconst CLASS: u32 = {}u;\nconst LSIZE: u32 = {}u;\n",
            self.class, self.local_size, self.class as u32, self.local_size
        )
    }
}

/// Uniform parameters shared by both kernels. Layout matches `Params` in
/// the WGSL sources: f64 first so the struct is 16 bytes with no holes.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct KernelParams {
    pub(crate) norm_factor: f64,
    pub(crate) n: u32,
    pub(crate) chunk: u32,
}

/// Compiled program: one bind group layout shared by both pipelines.
#[derive(Debug)]
pub(crate) struct CgProgram {
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) reduce_pipeline: wgpu::ComputePipeline,
    pub(crate) normalize_pipeline: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl CgProgram {
    /// Builds the program for `class` with the given options.
    ///
    /// Shader validation errors are captured through an error scope and
    /// returned as `ProgramBuild` instead of aborting the process.
    pub(crate) async fn build(
        context: &GpuContext,
        source: &KernelSource,
        class: DeviceClass,
        options: &BuildOptions,
    ) -> Result<Self, CgCoreError> {
        let device = &context.device;
        let (source_name, body) = source.load(class)?;
        let full_source = format!("{}{}", options.prelude(), body);
        log::info!("Building program '{}' with {:?}", source_name, options);

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("cg power-step program"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(full_source)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Power Step Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    // params
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            mem::size_of::<KernelParams>() as u64,
                        ),
                    },
                    count: None,
                },
                storage_entry(1, false), // x
                storage_entry(2, true),  // z
                storage_entry(3, false), // partial x.z
                storage_entry(4, false), // partial z.z
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Power Step Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader_module,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let reduce_pipeline = make_pipeline(REDUCE_ENTRY);
        let normalize_pipeline = make_pipeline(NORMALIZE_ENTRY);

        if let Some(error) = device.pop_error_scope().await {
            return Err(CgCoreError::ProgramBuild {
                source_name,
                message: error.to_string(),
            });
        }

        Ok(Self {
            bind_group_layout,
            reduce_pipeline,
            normalize_pipeline,
        })
    }
}
