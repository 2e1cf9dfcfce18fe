#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use std::fmt::Debug;

use log::{debug, warn};
use static_assertions::const_assert;
use thiserror::Error;

use crate::vectors::{Handler, VectorTable, VEC_SPUR};

pub const IRQ_AUTO_1: u32 = 1;
pub const IRQ_AUTO_7: u32 = 7;
/// First logical irq of the user-vector domain.
pub const IRQ_USER: u32 = 8;
pub const MAX_USER_IRQS: u32 = 91;
pub const NR_IRQS: u32 = IRQ_USER + MAX_USER_IRQS;

const_assert!(IRQ_AUTO_7 < IRQ_USER);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IrqError {
    #[error("no free irq domain slot")]
    NoDevice,
    #[error("irq {0} out of range")]
    Invalid(u32),
    #[error("irq {0} already has an action")]
    Busy(u32),
    #[error("{0} domain already registered")]
    Exists(&'static str),
    #[error("hwirq {hwirq} has no mapping in the {domain} domain")]
    NoMapping { domain: &'static str, hwirq: u32 },
    #[error("interrupt specifier has {0} cells, expected 1")]
    BadSpecifier(usize),
}
impl IrqError {
    /// Kernel style negative error number.
    pub const fn errno(self) -> i32 {
        match self {
            Self::NoDevice => -19,
            Self::Busy(_) => -16,
            Self::Exists(_) => -17,
            Self::Invalid(_) | Self::NoMapping { .. } | Self::BadSpecifier(_) => -22,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// What a chip callback gets to see.
#[derive(Debug)]
pub struct ChipData<'a> {
    pub irq:     u32,
    pub vectors: &'a mut VectorTable,
}

pub trait IrqChip: Debug + Sync {
    fn name(&self) -> &'static str;
    /// Vector slot startup writes for `irq`, if any.
    fn vector(&self, _irq: u32, _vectors: &VectorTable) -> Option<u32> { None }
    fn startup(&self, _data: &mut ChipData<'_>) {}
    fn shutdown(&self, _data: &mut ChipData<'_>) {}
    fn mask(&self, _irq: u32) {}
    fn unmask(&self, _irq: u32) {}
}

/// Chip for irqs nobody has claimed yet.
#[derive(Debug)]
pub struct NoChip;
impl IrqChip for NoChip {
    fn name(&self) -> &'static str { "none" }
}
pub static NO_IRQ_CHIP: NoChip = NoChip;

/// Auto and user vector chip: startup points the vector at the dispatch
/// stub, shutdown points it back at the unexpected-interrupt handler.
#[derive(Debug)]
pub struct M68kChip {
    name: &'static str,
}
pub static AUTO_IRQ_CHIP: M68kChip = M68kChip { name: "auto" };
pub static USER_IRQ_CHIP: M68kChip = M68kChip { name: "user" };

impl M68kChip {
    /// Vector number serving logical irq `irq`.
    pub fn vector_for(irq: u32, vectors: &VectorTable) -> u32 {
        if irq <= IRQ_AUTO_7 {
            VEC_SPUR + irq
        } else {
            // fixup is first_user_vector - IRQ_USER
            vectors.fixups().user_vec + irq
        }
    }
}
impl IrqChip for M68kChip {
    fn name(&self) -> &'static str { self.name }
    fn vector(&self, irq: u32, vectors: &VectorTable) -> Option<u32> { Some(Self::vector_for(irq, vectors)) }
    fn startup(&self, data: &mut ChipData<'_>) {
        let vector = Self::vector_for(data.irq, data.vectors);
        let handler = if data.irq <= IRQ_AUTO_7 {
            Handler::AutoVector
        } else {
            Handler::UserVector
        };
        data.vectors.install(vector, handler);
    }
    fn shutdown(&self, data: &mut ChipData<'_>) {
        let vector = Self::vector_for(data.irq, data.vectors);
        data.vectors.reset_to_default(vector);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowHandler {
    /// no chip interaction, just run the action
    Simple,
    /// mask around the action
    Level,
}

pub type ActionFn = Box<dyn FnMut(u32) -> IrqReturn>;

pub struct IrqAction {
    pub name: String,
    handler:  ActionFn,
}
impl IrqAction {
    pub fn new(name: impl Into<String>, handler: impl FnMut(u32) -> IrqReturn + 'static) -> Self {
        Self {
            name:    name.into(),
            handler: Box::new(handler),
        }
    }
}
impl Debug for IrqAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqAction").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct IrqDesc {
    irq:       u32,
    chip:      &'static dyn IrqChip,
    flow:      Option<FlowHandler>,
    probe:     bool,
    masked:    bool,
    action:    Option<IrqAction>,
    count:     u64,
    unhandled: u64,
}
impl IrqDesc {
    fn new(irq: u32) -> Self {
        Self {
            irq,
            chip: &NO_IRQ_CHIP,
            flow: None,
            probe: false,
            masked: false,
            action: None,
            count: 0,
            unhandled: 0,
        }
    }
    pub const fn irq(&self) -> u32 { self.irq }
    pub fn chip(&self) -> &'static dyn IrqChip { self.chip }
    pub const fn flow(&self) -> Option<FlowHandler> { self.flow }
    pub const fn probe(&self) -> bool { self.probe }
    pub const fn masked(&self) -> bool { self.masked }
    pub fn action(&self) -> Option<&IrqAction> { self.action.as_ref() }
    /// Times an action ran.
    pub const fn count(&self) -> u64 { self.count }
    /// Times the irq fired with nothing to run it.
    pub const fn unhandled(&self) -> u64 { self.unhandled }

    fn run_action(&mut self) -> IrqReturn {
        match (&mut self.action, self.masked) {
            (Some(action), false) => {
                self.count += 1;
                (action.handler)(self.irq)
            }
            _ => {
                self.unhandled += 1;
                IrqReturn::None
            }
        }
    }
    fn handle(&mut self) -> IrqReturn {
        match self.flow {
            Some(FlowHandler::Simple) => self.run_action(),
            Some(FlowHandler::Level) => {
                self.chip.mask(self.irq);
                let ret = self.run_action();
                if !self.masked {
                    self.chip.unmask(self.irq);
                }
                ret
            }
            None => {
                self.unhandled += 1;
                warn!("irq {}: no flow handler", self.irq);
                IrqReturn::None
            }
        }
    }
}

/// Per logical irq state, indexed by irq number.
#[derive(Debug)]
pub struct IrqTable {
    descs: Vec<IrqDesc>,
}
impl IrqTable {
    pub fn new(nr_irqs: u32) -> Self { Self { descs: (0..nr_irqs).map(IrqDesc::new).collect() } }
    pub fn nr_irqs(&self) -> u32 { self.descs.len() as u32 }
    pub fn desc(&self, irq: u32) -> Option<&IrqDesc> { self.descs.get(irq as usize) }
    fn desc_mut(&mut self, irq: u32) -> Result<&mut IrqDesc, IrqError> {
        self.descs.get_mut(irq as usize).ok_or(IrqError::Invalid(irq))
    }

    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn set_chip(&mut self, irq: u32, chip: &'static dyn IrqChip) -> Result<(), IrqError> {
        self.desc_mut(irq)?.chip = chip;
        Ok(())
    }
    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn set_handler(&mut self, irq: u32, flow: FlowHandler) -> Result<(), IrqError> {
        self.desc_mut(irq)?.flow = Some(flow);
        Ok(())
    }
    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn set_chip_and_handler(&mut self, irq: u32, chip: &'static dyn IrqChip, flow: FlowHandler) -> Result<(), IrqError> {
        let desc = self.desc_mut(irq)?;
        desc.chip = chip;
        desc.flow = Some(flow);
        Ok(())
    }
    /// Marks `irq` as usable for autoprobing.
    ///
    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn set_probe(&mut self, irq: u32) -> Result<(), IrqError> {
        self.desc_mut(irq)?.probe = true;
        Ok(())
    }
    /// Switches `cnt` irqs starting at `irq` to another chip, and to another
    /// flow handler when one is given.
    ///
    /// # Errors
    ///
    /// `Invalid` when the range runs past the table; nothing is changed then.
    pub fn setup_irq_controller(&mut self, chip: &'static dyn IrqChip, flow: Option<FlowHandler>, irq: u32, cnt: u32) -> Result<(), IrqError> {
        let end = irq.checked_add(cnt).ok_or(IrqError::Invalid(irq))?;
        if end > self.nr_irqs() {
            return Err(IrqError::Invalid(end - 1));
        }
        for desc in &mut self.descs[irq as usize..end as usize] {
            desc.chip = chip;
            if let Some(flow) = flow {
                desc.flow = Some(flow);
            }
        }
        Ok(())
    }

    /// Attaches `action` and starts the irq up through its chip.
    ///
    /// # Errors
    ///
    /// `Invalid` for an irq past the table or one whose chip vector is
    /// past the vector table, `Busy` when an action is already attached.
    pub fn request(&mut self, vectors: &mut VectorTable, irq: u32, action: IrqAction) -> Result<(), IrqError> {
        let desc = self.desc_mut(irq)?;
        if desc.action.is_some() {
            return Err(IrqError::Busy(irq));
        }
        if desc.chip.vector(irq, vectors).is_some_and(|vector| vector >= vectors.len()) {
            return Err(IrqError::Invalid(irq));
        }
        debug!("irq {irq}: startup on {} for {}", desc.chip.name(), action.name);
        desc.action = Some(action);
        desc.masked = false;
        desc.chip.startup(&mut ChipData { irq, vectors });
        Ok(())
    }
    /// Detaches the action and shuts the irq down through its chip.
    ///
    /// # Errors
    ///
    /// `Invalid` for an irq past the table or without an action.
    pub fn free(&mut self, vectors: &mut VectorTable, irq: u32) -> Result<IrqAction, IrqError> {
        let desc = self.desc_mut(irq)?;
        let action = desc.action.take().ok_or(IrqError::Invalid(irq))?;
        desc.chip.shutdown(&mut ChipData { irq, vectors });
        debug!("irq {irq}: shutdown on {}", desc.chip.name());
        Ok(action)
    }
    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn disable(&mut self, irq: u32) -> Result<(), IrqError> {
        let desc = self.desc_mut(irq)?;
        desc.masked = true;
        desc.chip.mask(irq);
        Ok(())
    }
    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn enable(&mut self, irq: u32) -> Result<(), IrqError> {
        let desc = self.desc_mut(irq)?;
        desc.masked = false;
        desc.chip.unmask(irq);
        Ok(())
    }
    /// Runs the flow handler of `irq`.
    ///
    /// # Errors
    ///
    /// `Invalid` when `irq` is past the table.
    pub fn handle(&mut self, irq: u32) -> Result<IrqReturn, IrqError> { Ok(self.desc_mut(irq)?.handle()) }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        rc::Rc,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::vectors::{Slot, TableSize, VEC_USER};

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, IrqAction) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let action = IrqAction::new("rec", move |irq| {
            sink.borrow_mut().push(irq);
            IrqReturn::Handled
        });
        (seen, action)
    }

    #[test]
    fn auto_startup_and_shutdown_move_the_vector() {
        let mut vectors = VectorTable::new(TableSize::Full);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.set_chip_and_handler(3, &AUTO_IRQ_CHIP, FlowHandler::Simple).unwrap();
        let (_, action) = recorder();
        irqs.request(&mut vectors, 3, action).unwrap();
        assert!(matches!(vectors.get(27), Some(Slot::Assigned(Handler::AutoVector))));
        irqs.free(&mut vectors, 3).unwrap();
        assert!(matches!(vectors.get(27), Some(Slot::Unassigned)));
    }

    #[test]
    fn user_startup_follows_the_patched_base() {
        let mut vectors = VectorTable::new(TableSize::Full);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.set_chip_and_handler(IRQ_USER + 5, &USER_IRQ_CHIP, FlowHandler::Simple).unwrap();
        assert_eq!(M68kChip::vector_for(IRQ_USER + 5, &vectors), VEC_USER + 5);

        vectors.patch_user_vec(200 - IRQ_USER);
        let (_, action) = recorder();
        irqs.request(&mut vectors, IRQ_USER + 5, action).unwrap();
        assert!(matches!(vectors.get(205), Some(Slot::Assigned(Handler::UserVector))));
        assert!(!vectors.is_assigned(VEC_USER + 5));
    }

    #[test]
    fn simple_flow_counts_and_calls() {
        let mut vectors = VectorTable::new(TableSize::Full);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.set_chip_and_handler(2, &AUTO_IRQ_CHIP, FlowHandler::Simple).unwrap();
        assert_eq!(irqs.handle(2), Ok(IrqReturn::None));

        let (seen, action) = recorder();
        irqs.request(&mut vectors, 2, action).unwrap();
        assert_eq!(irqs.handle(2), Ok(IrqReturn::Handled));
        assert_eq!(irqs.handle(2), Ok(IrqReturn::Handled));
        assert_eq!(*seen.borrow(), vec![2, 2]);
        let desc = irqs.desc(2).unwrap();
        assert_eq!((desc.count(), desc.unhandled()), (2, 1));
    }

    #[test]
    fn masked_irqs_are_not_delivered() {
        let mut vectors = VectorTable::new(TableSize::Full);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.set_chip_and_handler(4, &AUTO_IRQ_CHIP, FlowHandler::Simple).unwrap();
        let (seen, action) = recorder();
        irqs.request(&mut vectors, 4, action).unwrap();
        irqs.disable(4).unwrap();
        assert_eq!(irqs.handle(4), Ok(IrqReturn::None));
        irqs.enable(4).unwrap();
        assert_eq!(irqs.handle(4), Ok(IrqReturn::Handled));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[derive(Debug)]
    struct CountingChip;
    static MASKS: AtomicU32 = AtomicU32::new(0);
    static UNMASKS: AtomicU32 = AtomicU32::new(0);
    impl IrqChip for CountingChip {
        fn name(&self) -> &'static str { "counting" }
        fn mask(&self, _irq: u32) { MASKS.fetch_add(1, Ordering::Relaxed); }
        fn unmask(&self, _irq: u32) { UNMASKS.fetch_add(1, Ordering::Relaxed); }
    }
    static COUNTING_CHIP: CountingChip = CountingChip;

    #[test]
    fn level_flow_masks_around_the_action() {
        let mut vectors = VectorTable::new(TableSize::Full);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.setup_irq_controller(&COUNTING_CHIP, Some(FlowHandler::Level), 20, 3).unwrap();
        assert_eq!(irqs.desc(22).unwrap().chip().name(), "counting");
        let (_, action) = recorder();
        irqs.request(&mut vectors, 21, action).unwrap();
        irqs.handle(21).unwrap();
        assert_eq!(MASKS.load(Ordering::Relaxed), 1);
        assert_eq!(UNMASKS.load(Ordering::Relaxed), 1);
        // chip without startup leaves the vectors alone
        assert_eq!(vectors.assigned().count(), 0);
    }

    #[test]
    fn controller_range_is_checked() {
        let mut irqs = IrqTable::new(NR_IRQS);
        assert_eq!(
            irqs.setup_irq_controller(&USER_IRQ_CHIP, None, NR_IRQS - 2, 3),
            Err(IrqError::Invalid(NR_IRQS))
        );
        assert_eq!(irqs.desc(NR_IRQS - 1).unwrap().chip().name(), "none");
    }

    #[test]
    fn request_past_a_short_vector_table_is_invalid() {
        let mut vectors = VectorTable::new(TableSize::Base);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.setup_irq_controller(&USER_IRQ_CHIP, Some(FlowHandler::Simple), IRQ_USER, 4).unwrap();
        assert_eq!(irqs.request(&mut vectors, IRQ_USER + 1, recorder().1), Err(IrqError::Invalid(IRQ_USER + 1)));
        assert!(irqs.desc(IRQ_USER + 1).unwrap().action().is_none());
        assert_eq!(vectors.icache_flushes(), 0);
        // auto vectors still fit
        irqs.set_chip_and_handler(2, &AUTO_IRQ_CHIP, FlowHandler::Simple).unwrap();
        irqs.request(&mut vectors, 2, recorder().1).unwrap();
    }

    #[test]
    fn double_request_is_busy_and_free_needs_an_action() {
        let mut vectors = VectorTable::new(TableSize::Full);
        let mut irqs = IrqTable::new(NR_IRQS);
        irqs.set_chip_and_handler(1, &AUTO_IRQ_CHIP, FlowHandler::Simple).unwrap();
        irqs.request(&mut vectors, 1, recorder().1).unwrap();
        assert_eq!(irqs.request(&mut vectors, 1, recorder().1), Err(IrqError::Busy(1)));
        assert_eq!(irqs.free(&mut vectors, 1).unwrap().name, "rec");
        assert_eq!(irqs.free(&mut vectors, 1).unwrap_err(), IrqError::Invalid(1));
        assert_eq!(irqs.request(&mut vectors, NR_IRQS, recorder().1), Err(IrqError::Invalid(NR_IRQS)));
    }

    #[test]
    fn no_flow_handler_is_unhandled() {
        let mut irqs = IrqTable::new(16);
        assert_eq!(irqs.handle(9), Ok(IrqReturn::None));
        assert_eq!(irqs.desc(9).unwrap().unhandled(), 1);
        assert_eq!(IrqError::NoDevice.errno(), -19);
        assert_eq!(IrqError::Busy(1).errno(), -16);
    }
}
