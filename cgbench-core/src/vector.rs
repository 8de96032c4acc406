use crate::context::GpuContext;
use crate::error::CgCoreError;
use crate::traits::Vector;
use std::sync::Arc;

/// Which side of a [`MirroredVector`] holds the latest data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coherence {
    /// Host and device copies agree.
    Synced,
    /// The host copy was mutated; upload before the next kernel reads it.
    DeviceStale,
    /// A kernel wrote the device copy; download before the host reads it.
    HostStale,
}

/// A host `Vec<f64>` paired with a device storage buffer of the same length.
///
/// Every mutation goes through methods that record which copy is newer, so
/// reading a stale host view is an error instead of silently returning old
/// data.
#[derive(Debug)]
pub struct MirroredVector {
    label: String,
    host: Vec<f64>,
    buffer: wgpu::Buffer,
    coherence: Coherence,
    pub(crate) context: Arc<GpuContext>,
}

impl MirroredVector {
    /// Internal constructor used by GpuDevice. The buffer must already hold
    /// the contents of `host`.
    pub(crate) fn new_internal(
        label: String,
        host: Vec<f64>,
        buffer: wgpu::Buffer,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            label,
            host,
            buffer,
            coherence: Coherence::Synced,
            context,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn coherence(&self) -> Coherence {
        self.coherence
    }

    /// Host view of the data.
    ///
    /// # Errors
    /// `StaleHostView` if a kernel wrote the device copy since the last
    /// download.
    pub fn host(&self) -> Result<&[f64], CgCoreError> {
        match self.coherence {
            Coherence::HostStale => Err(CgCoreError::StaleHostView(self.label.clone())),
            _ => Ok(&self.host),
        }
    }

    /// Mutable host view. Marks the device copy stale.
    ///
    /// # Errors
    /// `StaleHostView` if the device copy holds newer data.
    pub fn host_mut(&mut self) -> Result<&mut [f64], CgCoreError> {
        if self.coherence == Coherence::HostStale {
            return Err(CgCoreError::StaleHostView(self.label.clone()));
        }
        self.coherence = Coherence::DeviceStale;
        Ok(&mut self.host)
    }

    /// Overwrites the whole host copy, discarding any pending device data.
    pub fn replace_host(&mut self, data: &[f64]) -> Result<(), CgCoreError> {
        if data.len() != self.host.len() {
            return Err(CgCoreError::InvalidDimensions(format!(
                "Data length ({}) does not match vector '{}' length ({})",
                data.len(),
                self.label,
                self.host.len()
            )));
        }
        self.host.copy_from_slice(data);
        self.coherence = Coherence::DeviceStale;
        Ok(())
    }

    /// Uploads the host copy if the device copy is stale.
    pub fn sync_to_device(&mut self) -> Result<(), CgCoreError> {
        if self.coherence == Coherence::DeviceStale {
            log::debug!("Uploading '{}' ({} values)", self.label, self.host.len());
            self.context.write_buffer(&self.buffer, &self.host)?;
            self.coherence = Coherence::Synced;
        }
        Ok(())
    }

    /// Downloads the device copy if the host copy is stale and returns the
    /// now current host view.
    pub async fn sync_to_host(&mut self) -> Result<&[f64], CgCoreError> {
        if self.coherence == Coherence::HostStale {
            log::debug!("Downloading '{}' ({} values)", self.label, self.host.len());
            let data: Vec<f64> = self
                .context
                .read_buffer_to_cpu(&self.buffer, self.host.len())
                .await?;
            self.host.copy_from_slice(&data);
            self.coherence = Coherence::Synced;
        }
        Ok(&self.host)
    }

    /// Records that a kernel wrote the device copy.
    pub(crate) fn mark_device_written(&mut self) -> Result<(), CgCoreError> {
        if self.coherence == Coherence::DeviceStale {
            return Err(CgCoreError::Internal(format!(
                "kernel wrote '{}' while its host changes were not uploaded",
                self.label
            )));
        }
        self.coherence = Coherence::HostStale;
        Ok(())
    }

    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl Vector for MirroredVector {
    type Value = f64;

    fn len(&self) -> usize {
        self.host.len()
    }
}
