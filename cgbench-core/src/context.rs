use crate::error::CgCoreError;
use crate::workgroup::DeviceClass;
use bytemuck::{Pod, Zeroable};
use cfg_if::cfg_if;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use wgpu::{util::DeviceExt, PollType};

/// Device, queue and the transfer counters shared by every buffer of a
/// [`GpuDevice`](crate::GpuDevice).
#[derive(Debug, Clone)]
pub(crate) struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    /// Information about the adapter the device was created from.
    pub(crate) adapter_info: wgpu::AdapterInfo,
    /// Limits granted to the device.
    pub(crate) limits: wgpu::Limits,
    pub(crate) bytes_to_gpu: Arc<AtomicU64>,
    pub(crate) bytes_from_gpu: Arc<AtomicU64>,
}

/// Picks the adapter to run on.
///
/// Only adapters with `SHADER_F64` qualify. An adapter whose class matches
/// `preferred` wins; with `DeviceClass::Any` a discrete GPU is preferred over
/// anything else.
fn select_adapter(
    adapters: Vec<wgpu::Adapter>,
    preferred: DeviceClass,
) -> Result<wgpu::Adapter, CgCoreError> {
    let mut chosen: Option<wgpu::Adapter> = None;
    let mut fallback: Option<wgpu::Adapter> = None;
    let mut rejected_f64: Option<String> = None;

    for adapter in adapters {
        let info = adapter.get_info();
        if !adapter.features().contains(wgpu::Features::SHADER_F64) {
            log::debug!("Skipping adapter without SHADER_F64: {}", info.name);
            rejected_f64.get_or_insert(info.name);
            continue;
        }
        let class = DeviceClass::from_device_type(info.device_type);
        let matches = match preferred {
            DeviceClass::Any => info.device_type == wgpu::DeviceType::DiscreteGpu,
            other => class == other,
        };
        if matches && chosen.is_none() {
            chosen = Some(adapter);
        } else if fallback.is_none() {
            fallback = Some(adapter);
        }
    }

    match (chosen, preferred) {
        (Some(adapter), _) => Ok(adapter),
        (None, DeviceClass::Any) => fallback.ok_or_else(|| match rejected_f64 {
            Some(name) => CgCoreError::MissingF64Support(name),
            None => CgCoreError::NoAdapter(preferred.to_string()),
        }),
        (None, _) => Err(CgCoreError::NoAdapter(preferred.to_string())),
    }
}

impl GpuContext {
    /// Opens a device on an adapter of the preferred class.
    pub(crate) async fn new(preferred: DeviceClass) -> Result<Self, CgCoreError> {
        log::info!("Opening wgpu device (preferred class: {})", preferred);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let adapter = select_adapter(adapters, preferred)?;
        let adapter_info = adapter.get_info();

        log::info!("Selected adapter: {:?}", adapter_info);
        log::debug!("Adapter features: {:?}", adapter.features());

        // The full adapter limits; work-group sizing reads them back.
        let limits = adapter.limits();
        log::debug!("Requested limits: {:?}", limits);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("cgbench device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: wgpu::Features::SHADER_F64,
                required_limits: limits.clone(),
            })
            .await
            .map_err(|e| CgCoreError::WgpuInitError(format!("Failed to request device: {}", e)))?;

        if !device.features().contains(wgpu::Features::SHADER_F64) {
            return Err(CgCoreError::MissingF64Support(adapter_info.name));
        }

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
            bytes_to_gpu: Arc::new(AtomicU64::new(0)),
            bytes_from_gpu: Arc::new(AtomicU64::new(0)),
        })
    }

    fn count_upload(&self, bytes: u64) {
        let total = self.bytes_to_gpu.fetch_add(bytes, Ordering::Relaxed) + bytes;
        log::trace!("uploaded {} bytes ({} total)", bytes, total);
    }

    fn count_download(&self, bytes: u64) {
        let total = self.bytes_from_gpu.fetch_add(bytes, Ordering::Relaxed) + bytes;
        log::trace!("downloaded {} bytes ({} total)", bytes, total);
    }

    /// Creates a buffer initialized from `contents`; counts as an upload.
    pub(crate) fn create_gpu_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::debug!("Creating buffer '{}' from {} bytes", label, contents.len());
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.count_upload(contents.len() as u64);
        buffer
    }

    /// Queues a write of `data` at the start of `buffer`.
    ///
    /// Queued writes land before any command buffer submitted afterwards, so
    /// the next kernel sees the new contents.
    pub(crate) fn write_buffer<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        data: &[T],
    ) -> Result<(), CgCoreError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return Ok(());
        }
        let fits = buffer.size() >= bytes.len() as u64;
        if !fits || !buffer.usage().contains(wgpu::BufferUsages::COPY_DST) {
            return Err(CgCoreError::Internal(format!(
                "cannot write {} bytes into buffer of {} bytes with usage {:?}",
                bytes.len(),
                buffer.size(),
                buffer.usage()
            )));
        }
        self.queue.write_buffer(buffer, 0, bytes);
        self.count_upload(bytes.len() as u64);
        Ok(())
    }

    /// Creates an uninitialized buffer, e.g. for kernel outputs.
    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::debug!("Creating empty buffer '{}' of {} bytes", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Copies the first `count` elements of `buffer` back to the host.
    ///
    /// Waits for every command submitted before the call, so the data
    /// reflects all kernels already issued.
    pub(crate) async fn read_buffer_to_cpu<T: Pod + Zeroable>(
        &self,
        buffer: &wgpu::Buffer,
        count: usize,
    ) -> Result<Vec<T>, CgCoreError> {
        let size = (count * std::mem::size_of::<T>()) as u64;
        if size == 0 {
            return Ok(Vec::new());
        }
        if buffer.size() < size {
            return Err(CgCoreError::Internal(format!(
                "readback of {} bytes from a buffer of {} bytes",
                size,
                buffer.size()
            )));
        }

        let staging = self.create_empty_buffer(
            "readback staging",
            size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only disappears if the read was abandoned.
            let _ = sender.send(result);
        });

        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                self.device
                    .poll(PollType::Wait)
                    .map_err(|e| CgCoreError::WgpuError(format!("Device poll failed: {}", e)))?;
            }
        }

        receiver
            .await
            .map_err(|_| CgCoreError::Internal("map callback dropped".to_string()))?
            .map_err(|e| CgCoreError::WgpuError(format!("Buffer mapping failed: {}", e)))?;

        let data = {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&mapped).to_vec()
        };
        staging.unmap();
        self.count_download(size);
        log::debug!("Read back {} bytes", size);
        Ok(data)
    }

    /// `(bytes_to_gpu, bytes_from_gpu)`.
    pub(crate) fn get_transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
        log::debug!("Transfer counters reset");
    }
}
