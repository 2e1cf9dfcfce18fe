#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use std::fmt::Display;

use log::debug;

use crate::{
    cpu::TrapFrame,
    vectors::{VEC_ADDRERR, VEC_BUSERR, VEC_CHK, VEC_PRIV, VEC_TRAP, VEC_ZERODIV},
};

/// Calling convention of the `trap #0` system call entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallAbi {
    /// 68000 without a format word on the exception frame.
    Legacy68000,
    Standard,
}

#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Sigill = 4,
    Sigbus = 7,
    Sigfpe = 8,
}

#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigCode {
    IllIllopc, // illegal opcode
    IllPrvopc, // privileged opcode
    BusAdraln, // invalid address alignment
    BusAdrerr, // non-existent physical address
    FpeIntdiv, // integer divide by zero
    FpeIntovf, // integer overflow
}
impl SigCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::IllIllopc | Self::BusAdraln | Self::FpeIntdiv => 1,
            Self::BusAdrerr | Self::FpeIntovf => 2,
            Self::IllPrvopc => 5,
        }
    }
}

/// Fault delivered to the interrupted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigInfo {
    pub signo: Signal,
    pub code:  SigCode,
    pub addr:  u32,
}
impl Display for SigInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?} (signo {}, code {}) at {:#010x}", self.signo, self.code, self.signo as i32, self.code.code(), self.addr)
    }
}

/// Signal for a CPU exception that reached the generic exception handler.
pub fn process_int_oops(frame: &TrapFrame) -> SigInfo {
    let vector = frame.vector_number();
    let (signo, code) = match vector {
        VEC_PRIV => (Signal::Sigill, SigCode::IllPrvopc),
        VEC_BUSERR => (Signal::Sigbus, SigCode::BusAdrerr),
        VEC_ADDRERR => (Signal::Sigbus, SigCode::BusAdraln),
        VEC_ZERODIV => (Signal::Sigfpe, SigCode::FpeIntdiv),
        VEC_CHK | VEC_TRAP => (Signal::Sigfpe, SigCode::FpeIntovf),
        _ => (Signal::Sigill, SigCode::IllIllopc),
    };
    debug!("vector {vector}: {signo:?}/{code:?}");
    SigInfo { signo, code, addr: frame.pc }
}

/// Trap through a slot that must never be reached.
///
/// # Panics
///
/// Always.
pub fn bad_trap(frame: &TrapFrame) -> ! {
    panic!(
        "Hit bad trap, NULL function pointer, bad stack? (vector {}, pc {:#010x})",
        frame.vector_number(),
        frame.pc
    )
}
