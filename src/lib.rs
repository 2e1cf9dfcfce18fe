#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation, clippy::missing_panics_doc, clippy::module_name_repetitions)]
#![deny(unsafe_code)]

//! Host-side model of the 680x0 exception vector table, the auto-vector
//! and user-vector interrupt domains, and the alignment-aware `memcpy`
//! and `memmove` used alongside them.

pub mod bulk;
pub mod config;
pub mod cpu;
pub mod domain;
pub mod intc;
pub mod irq;
pub mod machine;
pub mod memory;
pub mod mover;
pub mod of;
pub mod traps;
pub mod vectors;

pub use config::Config;
pub use cpu::{CpuModel, TrapFrame};
pub use machine::{BootError, Machine, TrapOutcome};
pub use mover::Mover;
