//! Typed device buffers.

use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use super::command::{Command, CommandEncoder};
use super::{readback, GpuContext};
use crate::error::{Result, SolverError};

/// Where a buffer lives and how the host reaches it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local storage; host access goes through staging copies.
    Gpu,
    /// Host-mappable destination for device to host copies.
    GpuToCpu,
}

/// Kind of access on either side of a barrier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Untyped view used when binding heterogeneous buffers to one kernel.
pub trait GenericBuffer {
    fn raw(&self) -> &Arc<wgpu::Buffer>;
    fn label(&self) -> &str;
    fn byte_size(&self) -> u64;

    /// Identity of the underlying allocation; clones share it.
    fn id(&self) -> usize {
        Arc::as_ptr(self.raw()) as usize
    }
}

/// Device buffer of `len` elements of `T`.
pub struct Buffer<T> {
    raw: Arc<wgpu::Buffer>,
    label: Arc<str>,
    len: usize,
    usage: MemoryUsage,
    _marker: PhantomData<T>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            label: self.label.clone(),
            len: self.len,
            usage: self.usage,
            _marker: PhantomData,
        }
    }
}

impl<T> GenericBuffer for Buffer<T> {
    fn raw(&self) -> &Arc<wgpu::Buffer> {
        &self.raw
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn byte_size(&self) -> u64 {
        self.raw.size()
    }
}

fn usages(usage: MemoryUsage) -> wgpu::BufferUsages {
    match usage {
        MemoryUsage::Gpu => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST
        }
        MemoryUsage::GpuToCpu => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    }
}

impl<T: Pod> Buffer<T> {
    /// Allocate a zero-initialised buffer. Zero-length buffers still get one
    /// element so they remain bindable.
    pub fn new(gpu: &GpuContext, label: &str, len: usize, usage: MemoryUsage) -> Result<Self> {
        let bytes = (len.max(1) * std::mem::size_of::<T>()) as u64;
        if bytes > gpu.device.limits().max_buffer_size {
            return Err(SolverError::ResourceCreation {
                label: label.to_owned(),
                bytes,
                message: "exceeds the device's maximum buffer size".to_owned(),
            });
        }

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let raw = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: usages(usage),
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(SolverError::ResourceCreation {
                label: label.to_owned(),
                bytes,
                message: error.to_string(),
            });
        }

        Ok(Self {
            raw: Arc::new(raw),
            label: label.into(),
            len,
            usage,
            _marker: PhantomData,
        })
    }

    /// Allocate a device buffer holding a copy of `data`.
    pub fn from_slice(gpu: &GpuContext, label: &str, data: &[T]) -> Result<Self> {
        if data.is_empty() {
            return Self::new(gpu, label, 0, MemoryUsage::Gpu);
        }
        let raw = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: usages(MemoryUsage::Gpu),
        });
        Ok(Self {
            raw: Arc::new(raw),
            label: label.into(),
            len: data.len(),
            usage: MemoryUsage::Gpu,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn usage(&self) -> MemoryUsage {
        self.usage
    }

    /// Upload host data; ordered before any later submission on the queue.
    pub fn write(&self, gpu: &GpuContext, data: &[T]) -> Result<()> {
        self.check_len(data.len())?;
        gpu.queue.write_buffer(&self.raw, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Download the buffer, blocking until all queued work has finished.
    pub fn read(&self, gpu: &GpuContext) -> Result<Vec<T>> {
        match self.usage {
            MemoryUsage::GpuToCpu => readback::map_read(gpu, self, wgpu::Maintain::Wait),
            MemoryUsage::Gpu => {
                let staging = Buffer::<T>::new(
                    gpu,
                    &format!("{} Staging", self.label),
                    self.len,
                    MemoryUsage::GpuToCpu,
                )?;
                let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Buffer Read Encoder"),
                });
                encoder.copy_buffer_to_buffer(&self.raw, 0, &staging.raw, 0, self.raw.size());
                gpu.queue.submit(std::iter::once(encoder.finish()));
                readback::map_read(gpu, &staging, wgpu::Maintain::Wait)
            }
        }
    }

    /// Record a fill with zeros.
    pub fn clear(&self, command: &mut CommandEncoder) {
        command.push(Command::Clear {
            buffer: self.raw.clone(),
        });
    }

    /// Record a full copy of `src` into this buffer.
    pub fn copy_from(&self, command: &mut CommandEncoder, src: &Buffer<T>) {
        command.push(Command::Copy {
            src: src.raw.clone(),
            dst: self.raw.clone(),
            size: src.raw.size().min(self.raw.size()),
        });
    }

    /// Record an ordering point: every earlier `old` access to this buffer
    /// completes before any later `new` access begins.
    pub fn barrier(&self, command: &mut CommandEncoder, old: Access, new: Access) {
        command.barrier(&self.label, old, new);
    }

    pub(crate) fn check_len(&self, len: usize) -> Result<()> {
        if len != self.len {
            return Err(SolverError::SizeMismatch {
                label: self.label.to_string(),
                expected: len,
                actual: self.len,
            });
        }
        Ok(())
    }
}
