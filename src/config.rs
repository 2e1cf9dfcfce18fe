#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use crate::{
    cpu::CpuModel,
    irq::NR_IRQS,
    vectors::TableSize,
};

pub const DEFAULT_MEMORY_SIZE: u32 = 0x10_0000;
pub const DEFAULT_MAX_DOMAINS: usize = 2;

/// Board description a [`Machine`](crate::machine::Machine) boots from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub cpu:         CpuModel,
    pub table:       TableSize,
    /// logical irq capacity, auto and user irqs together
    pub nr_irqs:     u32,
    pub max_domains: usize,
    /// bytes of simulated bus behind the memory mover
    pub memory_size: u32,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            cpu:         CpuModel::default(),
            table:       TableSize::default(),
            nr_irqs:     NR_IRQS,
            max_domains: DEFAULT_MAX_DOMAINS,
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}
impl Config {
    pub const fn with_cpu(self, cpu: CpuModel) -> Self { Self { cpu, ..self } }
    pub const fn with_table(self, table: TableSize) -> Self { Self { table, ..self } }
    pub const fn with_nr_irqs(self, nr_irqs: u32) -> Self { Self { nr_irqs, ..self } }
    pub const fn with_max_domains(self, max_domains: usize) -> Self { Self { max_domains, ..self } }
}
