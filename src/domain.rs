#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

//! Just enough of an irq domain to map a contiguous hwirq range onto a
//! contiguous logical irq range.

use std::fmt::Debug;

use log::{info, warn};

use crate::irq::{IrqError, IrqReturn, IrqTable};

pub trait IrqDomainOps: Debug + Sync {
    /// Turns a firmware interrupt specifier into a hwirq.
    ///
    /// # Errors
    ///
    /// `BadSpecifier` when the specifier has the wrong shape.
    fn xlate(&self, intspec: &[u32]) -> Result<u32, IrqError> { xlate_onecell(intspec) }
    /// Sets up the descriptor of `virq` for `hwirq`.
    ///
    /// # Errors
    ///
    /// Whatever the descriptor table reports for `virq`.
    fn map(&self, irqs: &mut IrqTable, virq: u32, hwirq: u32) -> Result<(), IrqError>;
}

/// Single cell specifier: the cell is the hwirq.
///
/// # Errors
///
/// `BadSpecifier` for an empty specifier.
pub fn xlate_onecell(intspec: &[u32]) -> Result<u32, IrqError> {
    intspec.first().copied().ok_or(IrqError::BadSpecifier(intspec.len()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(usize);

#[derive(Debug)]
pub struct IrqDomain {
    name:        &'static str,
    first_virq:  u32,
    first_hwirq: u32,
    size:        u32,
    ops:         &'static dyn IrqDomainOps,
}
impl IrqDomain {
    pub const fn name(&self) -> &'static str { self.name }
    pub const fn first_virq(&self) -> u32 { self.first_virq }
    pub const fn first_hwirq(&self) -> u32 { self.first_hwirq }
    pub const fn size(&self) -> u32 { self.size }
    pub fn ops(&self) -> &'static dyn IrqDomainOps { self.ops }
    pub const fn find_mapping(&self, hwirq: u32) -> Option<u32> {
        if hwirq >= self.first_hwirq && hwirq - self.first_hwirq < self.size {
            Some(self.first_virq + (hwirq - self.first_hwirq))
        } else {
            None
        }
    }
    const fn virq_overlaps(&self, first_virq: u32, size: u32) -> bool {
        first_virq < self.first_virq + self.size && self.first_virq < first_virq + size
    }
}

/// Fixed number of domain slots, like a board with a known set of controllers.
#[derive(Debug)]
pub struct DomainRegistry {
    domains: Vec<Option<IrqDomain>>,
}
impl DomainRegistry {
    pub fn new(slots: usize) -> Self {
        let mut domains = Vec::with_capacity(slots);
        domains.resize_with(slots, || None);
        Self { domains }
    }
    pub fn get(&self, id: DomainId) -> Option<&IrqDomain> { self.domains.get(id.0).and_then(Option::as_ref) }
    pub fn find(&self, name: &str) -> Option<DomainId> {
        self.domains
            .iter()
            .position(|domain| domain.as_ref().is_some_and(|domain| domain.name == name))
            .map(DomainId)
    }
    pub fn len(&self) -> usize { self.domains.iter().flatten().count() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Registers a domain whose `size` hwirqs starting at `first_hwirq` map
    /// one to one onto logical irqs starting at `first_virq`, and maps every
    /// one of them through `ops`.
    ///
    /// # Errors
    ///
    /// `NoDevice` when every slot is taken, `Exists` when the name is
    /// already registered, `Invalid` when the logical range leaves the
    /// descriptor table and `Busy` when it overlaps another domain.
    pub fn create_legacy(
        &mut self,
        irqs: &mut IrqTable,
        name: &'static str,
        size: u32,
        first_virq: u32,
        first_hwirq: u32,
        ops: &'static dyn IrqDomainOps,
    ) -> Result<DomainId, IrqError> {
        if self.find(name).is_some() {
            return Err(IrqError::Exists(name));
        }
        let slot = self.domains.iter().position(Option::is_none).ok_or(IrqError::NoDevice)?;
        let end = first_virq.checked_add(size).ok_or(IrqError::Invalid(first_virq))?;
        if end > irqs.nr_irqs() {
            return Err(IrqError::Invalid(end - 1));
        }
        if self.domains.iter().flatten().any(|domain| domain.virq_overlaps(first_virq, size)) {
            return Err(IrqError::Busy(first_virq));
        }

        for i in 0..size {
            ops.map(irqs, first_virq + i, first_hwirq + i)?;
        }
        self.domains[slot] = Some(IrqDomain {
            name,
            first_virq,
            first_hwirq,
            size,
            ops,
        });
        info!("{name}: irq domain, hwirq {first_hwirq}..{} -> irq {first_virq}..{end}", first_hwirq + size);
        Ok(DomainId(slot))
    }
    pub fn remove(&mut self, id: DomainId) -> Option<IrqDomain> { self.domains.get_mut(id.0).and_then(Option::take) }

    /// # Errors
    ///
    /// `NoDevice` for an unknown domain, otherwise whatever its `xlate` says.
    pub fn xlate(&self, id: DomainId, intspec: &[u32]) -> Result<u32, IrqError> {
        self.get(id).ok_or(IrqError::NoDevice)?.ops.xlate(intspec)
    }

    /// Looks up the logical irq for `hwirq` and runs its flow handler.
    ///
    /// # Errors
    ///
    /// `NoDevice` for an unknown domain, `NoMapping` for a hwirq outside it.
    pub fn handle_domain_irq(&self, irqs: &mut IrqTable, id: DomainId, hwirq: u32) -> Result<(u32, IrqReturn), IrqError> {
        let domain = self.get(id).ok_or(IrqError::NoDevice)?;
        let Some(virq) = domain.find_mapping(hwirq) else {
            warn!("{}: hwirq {hwirq} has no mapping", domain.name);
            return Err(IrqError::NoMapping { domain: domain.name, hwirq });
        };
        Ok((virq, irqs.handle(virq)?))
    }
}
