//! Device layer: headless context, typed buffers, bound compute work and
//! record-once command buffers.

pub mod buffer;
pub mod command;
pub mod kernels;
pub mod readback;
pub mod work;

pub use buffer::{Access, Buffer, GenericBuffer, MemoryUsage};
pub use command::{CommandBuffer, CommandEncoder};
pub use kernels::{Binding, Kernel};
pub use work::{Bound, ComputeSize, KernelConstants, Work};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::error::{Result, SolverError};

/// Wait for a buffer map operation to complete, returning an error instead of panicking.
pub fn await_buffer_map(gpu: &GpuContext, rx: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>) -> Result<()> {
    if gpu.is_device_lost() {
        return Err(SolverError::DeviceLost);
    }
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::error!("Buffer map failed: {:?}", e);
            Err(SolverError::BufferMapFailed(e))
        }
        Err(_) => {
            log::error!("Buffer map channel disconnected - possible device lost");
            gpu.mark_device_lost();
            Err(SolverError::ChannelDisconnected)
        }
    }
}

/// Device and queue shared by every solver component.
///
/// Cloning is cheap; all clones refer to the same device and share its
/// device-lost flag.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    device_lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Create a compute-only device without a surface.
    pub async fn new_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(SolverError::NoAdapter)?;

        log::info!("Using GPU: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Poisson Solver Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        Ok(Self::from_device(device, queue))
    }

    /// Wrap a device created by the host application.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let device_lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&device_lost);
        device.on_uncaptured_error(Box::new(move |error| {
            log::error!("GPU uncaptured error: {:?}", error);
            if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                flag.store(true, Ordering::SeqCst);
            }
        }));

        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            device_lost,
        }
    }

    /// Check if this context's device has been lost
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::SeqCst)
    }

    /// Flag this context's device as lost. Every later submit, wait and map
    /// on it fails with `DeviceLost`.
    pub fn mark_device_lost(&self) {
        self.device_lost.store(true, Ordering::SeqCst);
    }

    /// Block until every submitted command buffer has finished.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.poll(wgpu::Maintain::Wait);
        if self.is_device_lost() {
            return Err(SolverError::DeviceLost);
        }
        Ok(())
    }
}
