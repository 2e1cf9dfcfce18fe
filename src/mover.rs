#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use crate::{
    bulk::{self, BulkCopy},
    cpu::{CpuFeatures, CpuModel},
    memory::{Fault, Memory, MemoryInitError},
};

/// Source and destination differ in address parity, so no amount of
/// leading byte copies gets both of them even.
pub const fn wonky(dst: u32, src: u32) -> bool { (dst & 1) != (src & 1) }

/// `memcpy`/`memmove` for one CPU model, strategies fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct Mover {
    model: CpuModel,
    chunk: Option<&'static dyn BulkCopy>,
    block: &'static dyn BulkCopy,
}

impl Mover {
    pub fn for_cpu(model: CpuModel) -> Self {
        Self {
            model,
            chunk: bulk::chunk_strategy(model),
            block: bulk::block_strategy(model),
        }
    }
    pub fn with_strategies(model: CpuModel, chunk: Option<&'static dyn BulkCopy>, block: &'static dyn BulkCopy) -> Self {
        Self { model, chunk, block }
    }
    pub const fn model(&self) -> CpuModel { self.model }
    pub fn chunk(&self) -> Option<&'static dyn BulkCopy> { self.chunk }
    pub fn block(&self) -> &'static dyn BulkCopy { self.block }
    /// Memory with the access rules of this mover's CPU.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be allocated.
    pub fn memory(&self, size: u32) -> Result<Memory, MemoryInitError> {
        Memory::new(size, self.model.has(CpuFeatures::WORD_ALIGN))
    }

    /// Copies `n` bytes from `src` to `dst` and returns `dst`.
    ///
    /// The regions must not overlap unless `dst <= src`. Nothing is touched
    /// when `n == 0`, and neither range is validated in that case.
    ///
    /// # Errors
    ///
    /// Returns the bus fault before writing anything when either range
    /// leaves memory.
    pub fn copy_forward(&self, mem: &mut Memory, dst: u32, src: u32, n: u32) -> Result<u32, Fault> {
        if n == 0 {
            return Ok(dst);
        }
        mem.check_range(dst, n)?;
        mem.check_range(src, n)?;

        if wonky(dst, src) {
            forward_bytes(mem, dst, src, n)?;
            return Ok(dst);
        }

        let mut pos = 0;
        if dst & 1 != 0 {
            let byte = mem.read_u8(src)?;
            mem.write_u8(dst, byte)?;
            pos += 1;
        }

        if let Some(chunk) = self.chunk {
            pos = chunk_forward(chunk, mem, dst, src, pos, n)?;
        }

        // on the 040 unrolling stops paying after 32 bytes, on the 030 it pays until 128
        let block_len = self.block.block_len();
        while n - pos >= block_len {
            self.block.copy_forward(mem, dst + pos, src + pos)?;
            pos += block_len;
        }

        forward_tail(mem, dst + pos, src + pos, n - pos)?;
        Ok(dst)
    }

    /// Copies `n` bytes from `src` to `dst` for arbitrarily overlapping
    /// regions and returns `dst`.
    ///
    /// # Errors
    ///
    /// Returns the bus fault before writing anything when either range
    /// leaves memory.
    pub fn move_bytes(&self, mem: &mut Memory, dst: u32, src: u32, n: u32) -> Result<u32, Fault> {
        if n == 0 {
            return Ok(dst);
        }
        mem.check_range(dst, n)?;
        mem.check_range(src, n)?;

        if dst < src {
            if wonky(dst, src) {
                forward_bytes(mem, dst, src, n)?;
            } else {
                self.forward_aligned(mem, dst, src, n)?;
            }
        } else {
            let (dst_end, src_end) = (dst + n, src + n);
            if wonky(dst_end, src_end) {
                backward_bytes(mem, dst_end, src_end, n)?;
            } else {
                self.backward_aligned(mem, dst_end, src_end, n)?;
            }
        }
        Ok(dst)
    }

    fn forward_aligned(&self, mem: &mut Memory, dst: u32, src: u32, n: u32) -> Result<(), Fault> {
        let (mut dst, mut src, mut n) = (dst, src, n);
        if dst & 1 != 0 {
            let byte = mem.read_u8(src)?;
            mem.write_u8(dst, byte)?;
            (dst, src, n) = (dst + 1, src + 1, n - 1);
        }
        if n > 2 && dst & 2 != 0 {
            let word = mem.read_u16(src)?;
            mem.write_u16(dst, word)?;
            (dst, src, n) = (dst + 2, src + 2, n - 2);
        }
        let block_len = self.block.block_len();
        while n >= block_len {
            self.block.copy_forward(mem, dst, src)?;
            (dst, src, n) = (dst + block_len, src + block_len, n - block_len);
        }
        forward_tail(mem, dst, src, n)
    }

    fn backward_aligned(&self, mem: &mut Memory, dst_end: u32, src_end: u32, n: u32) -> Result<(), Fault> {
        let (mut dst, mut src, mut n) = (dst_end, src_end, n);
        if dst & 1 != 0 {
            (dst, src, n) = (dst - 1, src - 1, n - 1);
            let byte = mem.read_u8(src)?;
            mem.write_u8(dst, byte)?;
        }
        if n > 2 && dst & 2 != 0 {
            (dst, src, n) = (dst - 2, src - 2, n - 2);
            let word = mem.read_u16(src)?;
            mem.write_u16(dst, word)?;
        }
        let block_len = self.block.block_len();
        while n >= block_len {
            self.block.copy_backward(mem, dst, src)?;
            (dst, src, n) = (dst - block_len, src - block_len, n - block_len);
        }
        while n >= 4 {
            (dst, src, n) = (dst - 4, src - 4, n - 4);
            let long = mem.read_u32(src)?;
            mem.write_u32(dst, long)?;
        }
        if n & 2 != 0 {
            (dst, src) = (dst - 2, src - 2);
            let word = mem.read_u16(src)?;
            mem.write_u16(dst, word)?;
        }
        if n & 1 != 0 {
            let byte = mem.read_u8(src - 1)?;
            mem.write_u8(dst - 1, byte)?;
        }
        Ok(())
    }
}

/// Brings both pointers onto the chunk alignment and runs chunks while
/// enough bytes remain. Returns the new position.
fn chunk_forward(chunk: &dyn BulkCopy, mem: &mut Memory, dst: u32, src: u32, pos: u32, n: u32) -> Result<u32, Fault> {
    let align = chunk.block_align();
    let chunk_len = chunk.block_len();
    let misalignment = (dst + pos) & (align - 1);
    if n - pos < chunk_len || misalignment != (src + pos) & (align - 1) {
        return Ok(pos);
    }

    let mut pos = pos;
    if misalignment != 0 {
        let lead = align - misalignment;
        forward_tail(mem, dst + pos, src + pos, lead)?;
        pos += lead;
    }
    while n - pos >= chunk_len {
        chunk.copy_forward(mem, dst + pos, src + pos)?;
        pos += chunk_len;
    }
    Ok(pos)
}

/// Longs, then a word, then a byte. Both pointers must share parity.
fn forward_tail(mem: &mut Memory, dst: u32, src: u32, n: u32) -> Result<(), Fault> {
    let mut pos = 0;
    while n - pos >= 4 {
        let long = mem.read_u32(src + pos)?;
        mem.write_u32(dst + pos, long)?;
        pos += 4;
    }
    if n - pos >= 2 {
        let word = mem.read_u16(src + pos)?;
        mem.write_u16(dst + pos, word)?;
        pos += 2;
    }
    if n - pos == 1 {
        let byte = mem.read_u8(src + pos)?;
        mem.write_u8(dst + pos, byte)?;
    }
    Ok(())
}

fn forward_bytes(mem: &mut Memory, dst: u32, src: u32, n: u32) -> Result<(), Fault> {
    for i in 0..n {
        let byte = mem.read_u8(src + i)?;
        mem.write_u8(dst + i, byte)?;
    }
    Ok(())
}

/// Pre-decrements, so nothing at or past the end addresses is touched.
fn backward_bytes(mem: &mut Memory, dst_end: u32, src_end: u32, n: u32) -> Result<(), Fault> {
    for i in 1..=n {
        let byte = mem.read_u8(src_end - i)?;
        mem.write_u8(dst_end - i, byte)?;
    }
    Ok(())
}
