//! Exclusive prefix sum of per-cell counts, used to bucket particles.
//!
//! Each level scans 512-element blocks and stores the block totals; the
//! totals are scanned as the next level until one block is left, then the
//! scanned totals are added back down. The last stage also writes a
//! [`DispatchParams`] for an indirect dispatch over the counted items.

use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::gpu::{
    kernels, Access, Bound, Buffer, CommandEncoder, ComputeSize, GenericBuffer, GpuContext, MemoryUsage, Work,
};

/// Indirect dispatch arguments followed by the scanned total.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchParams {
    pub workgroups: [u32; 3],
    pub count: u32,
}

/// Lengths of each scan level, starting with `n` and ending with the first
/// length that fits one block.
pub fn level_sizes(n: u32) -> Vec<u32> {
    let mut sizes = vec![n];
    let mut length = n;
    while length > ComputeSize::REDUCTION_FACTOR {
        length = length.div_ceil(ComputeSize::REDUCTION_FACTOR);
        sizes.push(length);
    }
    sizes
}

struct Level {
    sums: Buffer<u32>,
    scanned: Buffer<u32>,
}

pub struct PrefixScan {
    size: u32,
    store_sum: Work,
    scan: Work,
    add: Work,
    levels: Vec<Level>,
}

impl PrefixScan {
    pub fn new(gpu: &GpuContext, size: u32) -> Result<Self> {
        let placeholder = ComputeSize::reduction(size);
        let levels = level_sizes(size)
            .into_iter()
            .skip(1)
            .enumerate()
            .map(|(i, len)| {
                Ok(Level {
                    sums: Buffer::new(gpu, &format!("Scan Sums {i}"), len as usize, MemoryUsage::Gpu)?,
                    scanned: Buffer::new(gpu, &format!("Scan Offsets {i}"), len as usize, MemoryUsage::Gpu)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            size,
            store_sum: Work::new(gpu, placeholder, &kernels::PRESCAN_STORE_SUM)?,
            scan: Work::new(gpu, placeholder, &kernels::PRESCAN)?,
            add: Work::new(gpu, placeholder, &kernels::PRESCAN_ADD)?,
            levels,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Scan `input` into `output`; both have `size` elements.
    pub fn bind(
        &self,
        input: &Buffer<u32>,
        output: &Buffer<u32>,
        dispatch_params: &Buffer<DispatchParams>,
    ) -> Result<PrefixScanBound> {
        input.check_len(self.size as usize)?;
        output.check_len(self.size as usize)?;
        dispatch_params.check_len(1)?;

        let sizes = level_sizes(self.size);
        let mut inputs: Vec<&Buffer<u32>> = vec![input];
        let mut outputs: Vec<&Buffer<u32>> = vec![output];
        for level in &self.levels {
            inputs.push(&level.sums);
            outputs.push(&level.scanned);
        }

        let last = sizes.len() - 1;
        let mut down = Vec::with_capacity(last);
        for i in 0..last {
            let sums = &self.levels[i].sums;
            down.push(self.store_sum.bind_with(
                ComputeSize::reduction(sizes[i]),
                &[inputs[i] as &dyn GenericBuffer, outputs[i], sums],
                0.0,
                0,
            )?);
        }

        let top = self.scan.bind_with(
            ComputeSize::reduction(sizes[last]),
            &[inputs[last] as &dyn GenericBuffer, outputs[last], dispatch_params],
            0.0,
            0,
        )?;

        let mut up = Vec::with_capacity(last);
        for i in (0..last).rev() {
            up.push(self.add.bind_with(
                ComputeSize::reduction(sizes[i]),
                &[outputs[i + 1] as &dyn GenericBuffer, outputs[i]],
                0.0,
                0,
            )?);
        }

        Ok(PrefixScanBound {
            down,
            top,
            up,
            outputs: outputs.into_iter().cloned().collect(),
            dispatch_params: dispatch_params.clone(),
        })
    }
}

pub struct PrefixScanBound {
    down: Vec<Bound>,
    top: Bound,
    up: Vec<Bound>,
    /// `outputs[k]` is the scanned data of level `k`.
    outputs: Vec<Buffer<u32>>,
    dispatch_params: Buffer<DispatchParams>,
}

impl PrefixScanBound {
    pub fn record(&self, command: &mut CommandEncoder) {
        command.debug_marker_begin("Prefix Scan");
        for bound in &self.down {
            bound.record(command);
        }
        self.top.record(command);
        self.dispatch_params.barrier(command, Access::Write, Access::Read);
        let levels = self.outputs.len();
        for (k, bound) in self.up.iter().enumerate() {
            // `up` runs from the second finest level back to the finest.
            self.outputs[levels - 1 - k].barrier(command, Access::Write, Access::Read);
            bound.record(command);
        }
        self.outputs[0].barrier(command, Access::Write, Access::Read);
        command.debug_marker_end();
    }

    /// Number of dispatches recorded per scan.
    pub fn dispatch_count(&self) -> usize {
        self.down.len() + 1 + self.up.len()
    }

    /// The buffer the scan writes its indirect dispatch arguments to.
    pub fn dispatch_params(&self) -> &Buffer<DispatchParams> {
        &self.dispatch_params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_inputs_scan_in_one_level() {
        assert_eq!(level_sizes(1), vec![1]);
        assert_eq!(level_sizes(512), vec![512]);
    }

    #[test]
    fn levels_shrink_by_block_size() {
        assert_eq!(level_sizes(513), vec![513, 2]);
        assert_eq!(level_sizes(512 * 512 + 1), vec![512 * 512 + 1, 513, 2]);
    }

    #[test]
    fn dispatch_params_match_indirect_layout() {
        assert_eq!(std::mem::size_of::<DispatchParams>(), 16);
    }
}
