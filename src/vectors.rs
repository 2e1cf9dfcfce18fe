#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use std::{fmt::Debug, ops::RangeInclusive, str::FromStr};

use log::debug;
use static_assertions::const_assert;
use thiserror::Error;

use crate::{cpu::TrapFrame, irq::IRQ_USER, traps::SyscallAbi};

pub const VEC_BUSERR: u32 = 2;
pub const VEC_ADDRERR: u32 = 3;
pub const VEC_ILLEGAL: u32 = 4;
pub const VEC_ZERODIV: u32 = 5;
pub const VEC_CHK: u32 = 6;
pub const VEC_TRAP: u32 = 7;
pub const VEC_PRIV: u32 = 8;
/// Spurious interrupt; auto-vector level `n` sits at `VEC_SPUR + n`.
pub const VEC_SPUR: u32 = 24;
pub const VEC_INT1: u32 = 25;
pub const VEC_INT7: u32 = 31;
/// `trap #0`
pub const VEC_SYS: u32 = 32;
pub const VEC_TRAP1: u32 = 33;
pub const VEC_TRAP15: u32 = 47;
pub const VEC_USER: u32 = 64;

const_assert!(VEC_INT1 == VEC_SPUR + 1);
const_assert!(VEC_INT7 < VEC_SYS);
const_assert!(VEC_TRAP15 < VEC_USER);

/// Platform replacement for the generic auto-vector path; gets the logical irq.
pub type AutoHandlerFn = fn(u32, &TrapFrame);
/// Raw vector hook installed by code outside the irq layer.
pub type HookFn = fn(&TrapFrame);

#[derive(Clone, Copy)]
pub enum Handler {
    /// Ends in a signal to the current task.
    CpuException,
    AutoVector,
    UserVector,
    SystemCall(SyscallAbi),
    /// Trap through a vector nobody should ever reach.
    BadTrap,
    Hook(HookFn),
}
impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CpuException => write!(f, "CpuException"),
            Self::AutoVector => write!(f, "AutoVector"),
            Self::UserVector => write!(f, "UserVector"),
            Self::SystemCall(abi) => write!(f, "SystemCall({abi:?})"),
            Self::BadTrap => write!(f, "BadTrap"),
            Self::Hook(hook) => write!(f, "Hook({:p})", *hook as *const ()),
        }
    }
}

/// Every slot holds something; `Unassigned` dispatches to the
/// unexpected-interrupt handler.
#[derive(Debug, Clone, Copy, Default)]
pub enum Slot {
    #[default]
    Unassigned,
    Assigned(Handler),
}
impl Slot {
    pub const fn is_assigned(self) -> bool { matches!(self, Self::Assigned(_)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableSize {
    /// vectors 0..64, no room for user vectors
    Base,
    #[default]
    Full,
}
impl TableSize {
    pub const fn len(self) -> u32 {
        match self {
            Self::Base => 64,
            Self::Full => 256,
        }
    }
}
#[derive(Debug, Clone, Error)]
#[error("vector table size must be 64 or 256, got \"{0}\"")]
pub struct BadTableSize(pub String);
impl FromStr for TableSize {
    type Err = BadTableSize;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "64" => Ok(Self::Base),
            "256" => Ok(Self::Full),
            _ => Err(BadTableSize(s.to_owned())),
        }
    }
}

/// Locations inside the low-level trap stubs that get patched at boot.
#[derive(Clone, Copy, Default)]
pub struct StubFixups {
    /// `first_user_vector - IRQ_USER`; the user stub subtracts it from the
    /// vector number to get the logical irq.
    pub user_vec:     u32,
    pub auto_handler: Option<AutoHandlerFn>,
}
impl Debug for StubFixups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubFixups")
            .field("user_vec", &self.user_vec)
            .field("auto_handler", &self.auto_handler.map(|handler| handler as *const ()))
            .finish()
    }
}

/// The exception vector table the CPU reads on every trap.
///
/// Slots can only change through the methods here, and every change is
/// followed by an instruction cache flush.
#[derive(Debug, Clone)]
pub struct VectorTable {
    slots:          Box<[Slot]>,
    fixups:         StubFixups,
    icache_flushes: u64,
}
impl VectorTable {
    pub fn new(size: TableSize) -> Self {
        Self {
            slots:          vec![Slot::Unassigned; size.len() as usize].into_boxed_slice(),
            fixups:         StubFixups {
                user_vec:     VEC_USER - IRQ_USER,
                auto_handler: None,
            },
            icache_flushes: 0,
        }
    }
    pub fn len(&self) -> u32 { self.slots.len() as u32 }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
    pub fn get(&self, vector: u32) -> Option<Slot> { self.slots.get(vector as usize).copied() }
    pub fn is_assigned(&self, vector: u32) -> bool { self.get(vector).is_some_and(Slot::is_assigned) }
    pub const fn fixups(&self) -> &StubFixups { &self.fixups }
    pub const fn icache_flushes(&self) -> u64 { self.icache_flushes }
    pub fn assigned(&self) -> impl Iterator<Item = (u32, Handler)> + '_ {
        (0u32..).zip(self.slots.iter()).filter_map(|(vector, slot)| match slot {
            Slot::Assigned(handler) => Some((vector, *handler)),
            Slot::Unassigned => None,
        })
    }

    fn flush_icache(&mut self) { self.icache_flushes += 1; }
    fn slot_mut(&mut self, vector: u32) -> &mut Slot {
        let len = self.len();
        self.slots
            .get_mut(vector as usize)
            .unwrap_or_else(|| panic!("vector {vector} outside the {len} entry vector table"))
    }

    /// # Panics
    ///
    /// Panics if `vector` is outside the table.
    pub fn install(&mut self, vector: u32, handler: Handler) {
        *self.slot_mut(vector) = Slot::Assigned(handler);
        debug!("vector {vector}: {handler:?}");
        self.flush_icache();
    }
    /// # Panics
    ///
    /// Panics if the range reaches outside the table.
    pub fn install_range(&mut self, vectors: RangeInclusive<u32>, handler: Handler) {
        for vector in vectors.clone() {
            *self.slot_mut(vector) = Slot::Assigned(handler);
        }
        debug!("vectors {}..={}: {handler:?}", vectors.start(), vectors.end());
        self.flush_icache();
    }
    /// Routes `vector` back to the unexpected-interrupt handler.
    ///
    /// # Panics
    ///
    /// Panics if `vector` is outside the table.
    pub fn reset_to_default(&mut self, vector: u32) {
        *self.slot_mut(vector) = Slot::Unassigned;
        debug!("vector {vector}: unassigned");
        self.flush_icache();
    }
    pub fn patch_user_vec(&mut self, fixup: u32) {
        self.fixups.user_vec = fixup;
        self.flush_icache();
    }
    pub fn patch_auto_handler(&mut self, handler: Option<AutoHandlerFn>) {
        if handler.is_some() {
            self.fixups.auto_handler = handler;
        }
        self.flush_icache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(_: &TrapFrame) {}

    #[test]
    fn fresh_table_is_fully_unassigned() {
        let table = VectorTable::new(TableSize::Full);
        assert_eq!(table.len(), 256);
        assert!((0..256).all(|v| matches!(table.get(v), Some(Slot::Unassigned))));
        assert!(table.get(256).is_none());
        assert_eq!(VectorTable::new(TableSize::Base).len(), 64);
    }

    #[test]
    fn install_and_reset_flip_one_slot() {
        let mut table = VectorTable::new(TableSize::Full);
        table.install(VEC_INT1 + 2, Handler::AutoVector);
        assert!(table.is_assigned(27));
        assert!(matches!(table.get(27), Some(Slot::Assigned(Handler::AutoVector))));
        assert!(!table.is_assigned(26));
        table.reset_to_default(27);
        assert!(!table.is_assigned(27));
        assert_eq!(table.assigned().count(), 0);
    }

    #[test]
    fn every_write_flushes_the_icache() {
        let mut table = VectorTable::new(TableSize::Full);
        table.install(VEC_SYS, Handler::SystemCall(SyscallAbi::Standard));
        table.install_range(VEC_TRAP1..=VEC_TRAP15, Handler::BadTrap);
        table.reset_to_default(VEC_SYS);
        table.patch_user_vec(200 - IRQ_USER);
        table.patch_auto_handler(None);
        assert_eq!(table.icache_flushes(), 5);
        assert_eq!(table.fixups().user_vec, 192);
        assert_eq!(table.assigned().count(), 15);
    }

    #[test]
    fn hooks_are_kept_verbatim() {
        let mut table = VectorTable::new(TableSize::Base);
        table.install(40, Handler::Hook(hook));
        let Some(Slot::Assigned(Handler::Hook(installed))) = table.get(40) else {
            panic!("hook not installed");
        };
        installed(&TrapFrame::for_vector(40));
        assert!(format!("{:?}", Handler::Hook(hook)).starts_with("Hook(0x"));
    }

    #[test]
    fn auto_handler_patch_keeps_previous_on_none() {
        fn platform(_: u32, _: &TrapFrame) {}
        let mut table = VectorTable::new(TableSize::Full);
        table.patch_auto_handler(Some(platform));
        table.patch_auto_handler(None);
        assert!(table.fixups().auto_handler.is_some());
    }

    #[test]
    #[should_panic(expected = "vector 64 outside the 64 entry vector table")]
    fn install_past_the_end_is_fatal() {
        VectorTable::new(TableSize::Base).install(64, Handler::UserVector);
    }

    #[test]
    fn table_size_parses() {
        assert_eq!("64".parse::<TableSize>().unwrap(), TableSize::Base);
        assert_eq!("256".parse::<TableSize>().unwrap(), TableSize::Full);
        assert!("128".parse::<TableSize>().is_err());
    }
}
