//! Record-once, replay-many command lists.
//!
//! Solvers append dispatches, copies, clears and barriers to a
//! [`CommandEncoder`] once at bind time. [`CommandBuffer::submit`] turns the
//! list into a fresh wgpu command buffer each time it is queued. Consecutive
//! dispatches share one compute pass (wgpu orders storage hazards between
//! dispatches itself); copies and clears are encoded between passes.

use std::sync::Arc;

use super::buffer::Access;
use super::GpuContext;
use crate::error::{Result, SolverError};

pub(crate) enum Command {
    Dispatch {
        label: Arc<str>,
        pipeline: Arc<wgpu::ComputePipeline>,
        bind_group: Arc<wgpu::BindGroup>,
        workgroups: [u32; 3],
    },
    DispatchIndirect {
        label: Arc<str>,
        pipeline: Arc<wgpu::ComputePipeline>,
        bind_group: Arc<wgpu::BindGroup>,
        indirect: Arc<wgpu::Buffer>,
        offset: u64,
    },
    Clear {
        buffer: Arc<wgpu::Buffer>,
    },
    Copy {
        src: Arc<wgpu::Buffer>,
        dst: Arc<wgpu::Buffer>,
        size: u64,
    },
    Barrier,
    DebugBegin(String),
    DebugEnd,
}

impl Command {
    fn is_dispatch(&self) -> bool {
        matches!(self, Command::Dispatch { .. } | Command::DispatchIndirect { .. })
    }
}

/// Ordered list of recorded commands.
#[derive(Default)]
pub struct CommandEncoder {
    commands: Vec<Command>,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Order every earlier access before every later one.
    ///
    /// The label and access kinds only document intent; wgpu tracks the
    /// actual hazards.
    pub fn barrier(&mut self, _label: &str, _old: Access, _new: Access) {
        if !matches!(self.commands.last(), Some(Command::Barrier) | None) {
            self.commands.push(Command::Barrier);
        }
    }

    pub fn debug_marker_begin(&mut self, label: &str) {
        self.commands.push(Command::DebugBegin(label.to_owned()));
    }

    pub fn debug_marker_end(&mut self) {
        self.commands.push(Command::DebugEnd);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of recorded dispatches, direct or indirect.
    pub fn dispatch_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_dispatch()).count()
    }

    fn encode(&self, device: &wgpu::Device, label: &str) -> wgpu::CommandBuffer {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });

        let commands = &self.commands;
        let mut i = 0;
        while i < commands.len() {
            match &commands[i] {
                Command::Dispatch { .. } | Command::DispatchIndirect { .. } => {
                    let end = commands[i..]
                        .iter()
                        .position(|c| !c.is_dispatch())
                        .map_or(commands.len(), |p| i + p);
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(label),
                        timestamp_writes: None,
                    });
                    for command in &commands[i..end] {
                        match command {
                            Command::Dispatch {
                                label,
                                pipeline,
                                bind_group,
                                workgroups,
                            } => {
                                pass.insert_debug_marker(label);
                                pass.set_pipeline(pipeline);
                                pass.set_bind_group(0, bind_group.as_ref(), &[]);
                                pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
                            }
                            Command::DispatchIndirect {
                                label,
                                pipeline,
                                bind_group,
                                indirect,
                                offset,
                            } => {
                                pass.insert_debug_marker(label);
                                pass.set_pipeline(pipeline);
                                pass.set_bind_group(0, bind_group.as_ref(), &[]);
                                pass.dispatch_workgroups_indirect(indirect, *offset);
                            }
                            _ => {}
                        }
                    }
                    i = end;
                    continue;
                }
                Command::Clear { buffer } => encoder.clear_buffer(buffer, 0, None),
                Command::Copy { src, dst, size } => {
                    encoder.copy_buffer_to_buffer(src, 0, dst, 0, *size)
                }
                Command::Barrier => {}
                Command::DebugBegin(label) => encoder.push_debug_group(label),
                Command::DebugEnd => encoder.pop_debug_group(),
            }
            i += 1;
        }

        encoder.finish()
    }
}

/// A recorded command list plus the bookkeeping to submit and wait on it.
pub struct CommandBuffer {
    gpu: GpuContext,
    label: String,
    synchronise: bool,
    recorded: CommandEncoder,
    submission: Option<wgpu::SubmissionIndex>,
}

impl CommandBuffer {
    /// `synchronise` enables [`CommandBuffer::wait`]; without it, submissions
    /// are fire-and-forget and ordered only by the queue.
    pub fn new(gpu: &GpuContext, label: &str, synchronise: bool) -> Self {
        Self {
            gpu: gpu.clone(),
            label: label.to_owned(),
            synchronise,
            recorded: CommandEncoder::new(),
            submission: None,
        }
    }

    /// Replace the recorded list with whatever `record` appends.
    pub fn record<F>(&mut self, record: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut CommandEncoder) -> Result<()>,
    {
        let mut encoder = CommandEncoder::new();
        record(&mut encoder)?;
        self.recorded = encoder;
        Ok(self)
    }

    pub fn is_recorded(&self) -> bool {
        !self.recorded.is_empty()
    }

    /// Queue the recorded list. Submitting an empty list is a no-op.
    pub fn submit(&mut self) -> Result<&mut Self> {
        if self.gpu.is_device_lost() {
            return Err(SolverError::DeviceLost);
        }
        if self.recorded.is_empty() {
            return Ok(self);
        }
        let buffer = self.recorded.encode(&self.gpu.device, &self.label);
        self.submission = Some(self.gpu.queue.submit(std::iter::once(buffer)));
        Ok(self)
    }

    /// Block until the last submission of this buffer has completed.
    pub fn wait(&mut self) -> Result<&mut Self> {
        if !self.synchronise {
            return Ok(self);
        }
        if let Some(index) = self.submission.clone() {
            self.gpu
                .device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        if self.gpu.is_device_lost() {
            return Err(SolverError::DeviceLost);
        }
        Ok(self)
    }

    /// Poll mode that waits for exactly this buffer's last submission.
    pub fn maintain(&self) -> wgpu::Maintain {
        match &self.submission {
            Some(index) => wgpu::Maintain::WaitForSubmissionIndex(index.clone()),
            None => wgpu::Maintain::Poll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barriers_collapse() {
        let mut encoder = CommandEncoder::new();
        encoder.barrier("x", Access::Write, Access::Read);
        assert!(encoder.is_empty());

        encoder.debug_marker_begin("Step");
        encoder.barrier("x", Access::Write, Access::Read);
        encoder.barrier("y", Access::Write, Access::Write);
        encoder.debug_marker_end();
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.dispatch_count(), 0);
    }
}
