#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]

use thiserror::Error;

const MEM_PAGE_SIZE: u32 = 0x4000;
pub const MEM_DEFAULT_SIZE: u32 = 64 * MEM_PAGE_SIZE;
/// Size of a `move16` line.
pub const LINE_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte = 1,
    Word = 2,
    Long = 4,
    Line = 16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("bus error: {len} bytes at {addr:#010x} lie outside memory")]
    OutOfBounds { addr: u32, len: u32 },
    #[error("address error: {width:?} access at {addr:#010x}")]
    Unaligned { addr: u32, width: Width },
}

/// Number of bus cycles issued per access width, reads and writes together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub byte: u64,
    pub word: u64,
    pub long: u64,
    pub line: u64,
}
impl AccessStats {
    pub const fn total(&self) -> u64 { self.byte + self.word + self.long + self.line }
    /// Bytes moved across the bus.
    pub const fn bytes(&self) -> u64 { self.byte + 2 * self.word + 4 * self.long + 16 * self.line }
    fn count(&mut self, width: Width) {
        match width {
            Width::Byte => self.byte += 1,
            Width::Word => self.word += 1,
            Width::Long => self.long += 1,
            Width::Line => self.line += 1,
        }
    }
}

/// Flat big-endian memory as seen from the CPU.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Memory {
    memory:     Box<[u8]>,
    word_align: bool,
    stats:      AccessStats,
}
#[derive(Debug, Clone, Copy, Error)]
#[error("cannot allocate {0} bytes of simulated memory")]
pub struct MemoryInitError(pub u32);

impl Memory {
    pub fn mem_len(&self) -> u32 { self.memory.len() as u32 }
    pub const fn word_align(&self) -> bool { self.word_align }
    pub const fn stats(&self) -> AccessStats { self.stats }
    pub fn reset_stats(&mut self) { self.stats = AccessStats::default(); }
    fn new_option(mem_cap: u32, word_align: bool) -> Option<Self> {
        let mem_cap = if mem_cap == 0 { MEM_DEFAULT_SIZE } else { mem_cap };
        let capacity: usize = mem_cap.try_into().ok()?;
        let mut memory = Vec::new();
        memory.try_reserve_exact(capacity).ok()?;
        memory.resize(capacity, 0);
        Some(Self {
            memory: memory.into_boxed_slice(),
            word_align,
            stats: AccessStats::default(),
        })
    }
    /// `mem_cap == 0` selects the default size.
    pub fn new(mem_cap: u32, word_align: bool) -> Result<Self, MemoryInitError> {
        Self::new_option(mem_cap, word_align).ok_or(MemoryInitError(mem_cap))
    }

    /// Checks that `[addr, addr + len)` lies inside memory.
    pub fn check_range(&self, addr: u32, len: u32) -> Result<(), Fault> {
        match addr.checked_add(len) {
            Some(end) if end <= self.mem_len() => Ok(()),
            _ => Err(Fault::OutOfBounds { addr, len }),
        }
    }
    fn check(&self, addr: u32, width: Width) -> Result<usize, Fault> {
        self.check_range(addr, width as u32)?;
        let misaligned = match width {
            Width::Byte => false,
            Width::Word | Width::Long => self.word_align && addr & 1 != 0,
            Width::Line => addr & (LINE_SIZE - 1) != 0,
        };
        if misaligned {
            return Err(Fault::Unaligned { addr, width });
        }
        Ok(addr as usize)
    }

    pub fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        let at = self.check(addr, Width::Byte)?;
        self.stats.count(Width::Byte);
        Ok(self.memory[at])
    }
    pub fn read_u16(&mut self, addr: u32) -> Result<u16, Fault> {
        let at = self.check(addr, Width::Word)?;
        self.stats.count(Width::Word);
        Ok(u16::from_be_bytes([self.memory[at], self.memory[at + 1]]))
    }
    pub fn read_u32(&mut self, addr: u32) -> Result<u32, Fault> {
        let at = self.check(addr, Width::Long)?;
        self.stats.count(Width::Long);
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.memory[at..at + 4]);
        Ok(u32::from_be_bytes(bytes))
    }
    pub fn read_line(&mut self, addr: u32) -> Result<[u8; LINE_SIZE as usize], Fault> {
        let at = self.check(addr, Width::Line)?;
        self.stats.count(Width::Line);
        let mut line = [0; LINE_SIZE as usize];
        line.copy_from_slice(&self.memory[at..at + LINE_SIZE as usize]);
        Ok(line)
    }
    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        let at = self.check(addr, Width::Byte)?;
        self.stats.count(Width::Byte);
        self.memory[at] = value;
        Ok(())
    }
    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), Fault> {
        let at = self.check(addr, Width::Word)?;
        self.stats.count(Width::Word);
        self.memory[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        let at = self.check(addr, Width::Long)?;
        self.stats.count(Width::Long);
        self.memory[at..at + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
    pub fn write_line(&mut self, addr: u32, line: &[u8; LINE_SIZE as usize]) -> Result<(), Fault> {
        let at = self.check(addr, Width::Line)?;
        self.stats.count(Width::Line);
        self.memory[at..at + LINE_SIZE as usize].copy_from_slice(line);
        Ok(())
    }

    /// Host-side view, not counted as bus traffic.
    pub fn slice(&self, addr: u32, len: u32) -> Result<&[u8], Fault> {
        self.check_range(addr, len)?;
        Ok(&self.memory[addr as usize..(addr + len) as usize])
    }
    /// Host-side fill, not counted as bus traffic.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Fault> {
        let len = u32::try_from(bytes.len()).map_err(|_| Fault::OutOfBounds { addr, len: u32::MAX })?;
        self.check_range(addr, len)?;
        self.memory[addr as usize..addr as usize + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
    /// Fills the whole memory with a byte pattern that never repeats within 251 bytes.
    pub fn fill_pattern(&mut self, seed: u8) {
        for (i, byte) in self.memory.iter_mut().enumerate() {
            *byte = ((i % 251) as u8).wrapping_mul(7).wrapping_add(seed);
        }
    }
}
