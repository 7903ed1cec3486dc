//! Host readback of mappable buffers.

use std::sync::mpsc;

use bytemuck::Pod;

use super::{await_buffer_map, Buffer, GenericBuffer, GpuContext, MemoryUsage};
use crate::error::{Result, SolverError};

/// Map state of a host-visible buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Ready,
    Pending,
    Failed,
}

/// A map request in flight on one `GpuToCpu` buffer.
pub struct PendingMap {
    rx: Option<mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>>,
}

impl PendingMap {
    /// Request a read mapping. The request resolves on a later device poll,
    /// once the last submission writing the buffer has completed.
    pub fn start<T: Pod>(buffer: &Buffer<T>) -> Result<Self> {
        if buffer.usage() != MemoryUsage::GpuToCpu {
            return Err(SolverError::NotMappable {
                label: buffer.label().to_owned(),
            });
        }
        let (tx, rx) = mpsc::channel();
        buffer
            .raw()
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        Ok(Self { rx: Some(rx) })
    }

    pub fn check_ready(&mut self) -> ReadyState {
        if let Some(receiver) = &self.rx {
            match receiver.try_recv() {
                Ok(Ok(())) => {
                    self.rx = None;
                    ReadyState::Ready
                }
                Ok(Err(_)) => {
                    self.rx = None;
                    ReadyState::Failed
                }
                Err(mpsc::TryRecvError::Empty) => ReadyState::Pending,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.rx = None;
                    ReadyState::Failed
                }
            }
        } else {
            ReadyState::Ready
        }
    }

    /// Poll the device with `maintain` and block until the map resolves.
    pub fn wait(mut self, gpu: &GpuContext, maintain: wgpu::Maintain) -> Result<()> {
        gpu.device.poll(maintain);
        match self.rx.take() {
            Some(rx) => await_buffer_map(gpu, rx),
            None => Ok(()),
        }
    }
}

/// Map `buffer`, copy its contents out and unmap it again.
pub fn map_read<T: Pod>(
    gpu: &GpuContext,
    buffer: &Buffer<T>,
    maintain: wgpu::Maintain,
) -> Result<Vec<T>> {
    PendingMap::start(buffer)?.wait(gpu, maintain)?;

    let values = {
        let data = buffer.raw().slice(..).get_mapped_range();
        let slice: &[T] = bytemuck::cast_slice(&data);
        slice[..buffer.len().min(slice.len())].to_vec()
    };
    buffer.raw().unmap();
    Ok(values)
}
