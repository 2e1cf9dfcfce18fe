#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

//! Bulk copy strategies for the aligned middle of a copy.
//!
//! Each strategy moves one fixed-size block per call. The mover picks one
//! per CPU model when it is built and never looks at the model again.

use std::fmt::Debug;

use crate::{
    cpu::{CpuFeatures, CpuModel},
    memory::{Fault, Memory, LINE_SIZE},
};

pub trait BulkCopy: Debug + Sync {
    fn name(&self) -> &'static str;
    /// Bytes moved per block.
    fn block_len(&self) -> u32;
    /// Both pointers must be aligned to this before a block is issued.
    fn block_align(&self) -> u32;
    /// Copies `[src, src + block_len)` to `dst`, lowest address first.
    ///
    /// # Errors
    ///
    /// Propagates the bus fault of the first failing access.
    fn copy_forward(&self, mem: &mut Memory, dst: u32, src: u32) -> Result<(), Fault>;
    /// Copies the block ending just below `src_end` to the block ending just
    /// below `dst_end`, highest address first.
    ///
    /// # Errors
    ///
    /// Propagates the bus fault of the first failing access.
    fn copy_backward(&self, mem: &mut Memory, dst_end: u32, src_end: u32) -> Result<(), Fault>;
}

/// `move16` bursts: eight 16 byte lines per block, both pointers line aligned.
#[derive(Debug, Clone, Copy)]
pub struct Move16;

/// `movem.l` through eight data registers: load 32 bytes, then store them.
#[derive(Debug, Clone, Copy)]
pub struct Movem;

/// 32 long moves per iteration; pays off up to 128 bytes on the 020/030.
#[derive(Debug, Clone, Copy)]
pub struct UnrolledLongs;

pub static MOVE16: Move16 = Move16;
pub static MOVEM: Movem = Movem;
pub static UNROLLED_LONGS: UnrolledLongs = UnrolledLongs;

const MOVE16_LINES: u32 = 8;
const MOVEM_REGS: u32 = 8;
const UNROLL_LONGS: u32 = 32;

impl BulkCopy for Move16 {
    fn name(&self) -> &'static str { "move16" }
    fn block_len(&self) -> u32 { MOVE16_LINES * LINE_SIZE }
    fn block_align(&self) -> u32 { LINE_SIZE }
    fn copy_forward(&self, mem: &mut Memory, dst: u32, src: u32) -> Result<(), Fault> {
        for line in 0..MOVE16_LINES {
            let off = line * LINE_SIZE;
            let data = mem.read_line(src + off)?;
            mem.write_line(dst + off, &data)?;
        }
        Ok(())
    }
    fn copy_backward(&self, mem: &mut Memory, dst_end: u32, src_end: u32) -> Result<(), Fault> {
        for line in 1..=MOVE16_LINES {
            let off = line * LINE_SIZE;
            let data = mem.read_line(src_end - off)?;
            mem.write_line(dst_end - off, &data)?;
        }
        Ok(())
    }
}

impl BulkCopy for Movem {
    fn name(&self) -> &'static str { "movem.l" }
    fn block_len(&self) -> u32 { MOVEM_REGS * 4 }
    fn block_align(&self) -> u32 { 2 }
    fn copy_forward(&self, mem: &mut Memory, dst: u32, src: u32) -> Result<(), Fault> {
        let mut regs = [0u32; MOVEM_REGS as usize];
        for (i, reg) in (0u32..).zip(regs.iter_mut()) {
            *reg = mem.read_u32(src + 4 * i)?;
        }
        for (i, reg) in (0u32..).zip(regs) {
            mem.write_u32(dst + 4 * i, reg)?;
        }
        Ok(())
    }
    fn copy_backward(&self, mem: &mut Memory, dst_end: u32, src_end: u32) -> Result<(), Fault> {
        let mut regs = [0u32; MOVEM_REGS as usize];
        // predecrement mode walks from the top register down
        for (i, reg) in (1u32..).zip(regs.iter_mut()) {
            *reg = mem.read_u32(src_end - 4 * i)?;
        }
        for (i, reg) in (1u32..).zip(regs) {
            mem.write_u32(dst_end - 4 * i, reg)?;
        }
        Ok(())
    }
}

impl BulkCopy for UnrolledLongs {
    fn name(&self) -> &'static str { "unrolled move.l" }
    fn block_len(&self) -> u32 { UNROLL_LONGS * 4 }
    fn block_align(&self) -> u32 { 2 }
    fn copy_forward(&self, mem: &mut Memory, dst: u32, src: u32) -> Result<(), Fault> {
        for i in 0..UNROLL_LONGS {
            let value = mem.read_u32(src + 4 * i)?;
            mem.write_u32(dst + 4 * i, value)?;
        }
        Ok(())
    }
    fn copy_backward(&self, mem: &mut Memory, dst_end: u32, src_end: u32) -> Result<(), Fault> {
        for i in 1..=UNROLL_LONGS {
            let value = mem.read_u32(src_end - 4 * i)?;
            mem.write_u32(dst_end - 4 * i, value)?;
        }
        Ok(())
    }
}

/// Strategy for the chunk tier, only present with `move16`.
pub fn chunk_strategy(model: CpuModel) -> Option<&'static dyn BulkCopy> {
    model.has(CpuFeatures::MOVE16).then_some(&MOVE16 as &'static dyn BulkCopy)
}

/// Strategy for the block tier.
pub fn block_strategy(model: CpuModel) -> &'static dyn BulkCopy {
    if model.has(CpuFeatures::HEAVY_UNROLL) {
        &UNROLLED_LONGS
    } else {
        &MOVEM
    }
}
