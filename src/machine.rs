#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    config::Config,
    cpu::{CpuFeatures, TrapFrame},
    domain::{DomainId, DomainRegistry},
    intc::{self, IntcVariant, UserVectors, AUTO_DOMAIN, USER_DOMAIN},
    irq::{FlowHandler, IrqAction, IrqChip, IrqError, IrqReturn, IrqTable, AUTO_IRQ_CHIP, IRQ_AUTO_1, IRQ_AUTO_7},
    memory::{Fault, Memory, MemoryInitError},
    mover::Mover,
    traps::{self, SigInfo, SyscallAbi},
    vectors::{AutoHandlerFn, Handler, HookFn, Slot, VectorTable},
};

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Memory(#[from] MemoryInitError),
    #[error("irq setup failed: {0}")]
    Irq(#[from] IrqError),
}

/// What a single trap turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Went through an irq domain to a logical irq.
    Irq {
        domain: &'static str,
        hwirq:  u32,
        virq:   u32,
        ret:    IrqReturn,
    },
    /// Auto-vector handed to the platform handler instead of the domain.
    Platform { virq: u32 },
    /// Domain dispatch found nothing for the hwirq.
    Unmapped { vector: u32, error: IrqError },
    /// Slot was unassigned; counted and ignored.
    BadInterrupt { vector: u32 },
    Signal(SigInfo),
    SystemCall(SyscallAbi),
    Hooked { vector: u32 },
}

/// One 680x0 board: vector table, irq descriptors, domains and a bus for
/// the memory mover.
#[derive(Debug)]
pub struct Machine {
    config:        Config,
    vectors:       VectorTable,
    irqs:          IrqTable,
    domains:       DomainRegistry,
    auto_domain:   Option<DomainId>,
    user_domain:   Option<(DomainId, UserVectors)>,
    syscall_abi:   SyscallAbi,
    irq_err_count: u64,
    mover:         Mover,
    memory:        Memory,
}

impl Machine {
    /// Brings up an empty vector table and gives the auto-vector irqs
    /// their default chip. Controllers come later through device probing.
    ///
    /// # Errors
    ///
    /// Fails when the bus cannot be allocated or the descriptor table is
    /// too small for the auto-vector irqs.
    pub fn boot(config: Config) -> Result<Self, BootError> {
        let mover = Mover::for_cpu(config.cpu);
        let memory = mover.memory(config.memory_size)?;
        let mut machine = Self {
            config,
            vectors: VectorTable::new(config.table),
            irqs: IrqTable::new(config.nr_irqs),
            domains: DomainRegistry::new(config.max_domains),
            auto_domain: None,
            user_domain: None,
            syscall_abi: if config.cpu.has(CpuFeatures::FRAME_FORMAT) {
                SyscallAbi::Standard
            } else {
                SyscallAbi::Legacy68000
            },
            irq_err_count: 0,
            mover,
            memory,
        };
        machine.init_irq()?;
        info!(
            "{}: {} vectors, {} irqs, memcpy blocks via {}",
            config.cpu,
            machine.vectors.len(),
            config.nr_irqs,
            mover.block().name()
        );
        Ok(machine)
    }
    fn init_irq(&mut self) -> Result<(), IrqError> {
        for irq in IRQ_AUTO_1..=IRQ_AUTO_7 {
            self.irqs.set_chip_and_handler(irq, &AUTO_IRQ_CHIP, FlowHandler::Simple)?;
        }
        Ok(())
    }

    pub const fn config(&self) -> &Config { &self.config }
    pub const fn vectors(&self) -> &VectorTable { &self.vectors }
    pub const fn irqs(&self) -> &IrqTable { &self.irqs }
    pub const fn domains(&self) -> &DomainRegistry { &self.domains }
    pub const fn auto_domain(&self) -> Option<DomainId> { self.auto_domain }
    pub fn user_domain(&self) -> Option<DomainId> { self.user_domain.map(|(id, _)| id) }
    pub fn user_vectors(&self) -> Option<UserVectors> { self.user_domain.map(|(_, window)| window) }
    pub const fn syscall_abi(&self) -> SyscallAbi { self.syscall_abi }
    /// Interrupts taken through unassigned slots.
    pub const fn irq_err_count(&self) -> u64 { self.irq_err_count }
    pub const fn mover(&self) -> &Mover { &self.mover }
    pub const fn memory(&self) -> &Memory { &self.memory }
    pub fn memory_mut(&mut self) -> &mut Memory { &mut self.memory }

    /// Vector controller bring-up: installs the layout of `variant` and
    /// registers the auto-vector domain.
    ///
    /// # Errors
    ///
    /// Domain creation failures are passed up; the vector layout and the
    /// syscall ABI are left as they were then.
    pub fn init_intc_vect(&mut self, variant: IntcVariant) -> Result<DomainId, IrqError> {
        let id = intc::create_auto_domain(&mut self.domains, &mut self.irqs)?;
        self.auto_domain = Some(id);
        self.syscall_abi = variant.syscall_abi();
        variant.install_vectors(&mut self.vectors);
        Ok(id)
    }
    /// User controller bring-up.
    ///
    /// # Errors
    ///
    /// See [`Machine::setup_user_interrupt`].
    pub fn init_intc_user(&mut self, variant: IntcVariant, first_vector: u32, count: u32) -> Result<UserVectors, IrqError> {
        let window = self.setup_user_interrupt(first_vector, count)?;
        self.syscall_abi = variant.syscall_abi();
        Ok(window)
    }

    /// Replaces domain dispatch of auto-vectors by `handler`; `None` keeps
    /// whatever was patched in before.
    pub fn setup_auto_interrupt(&mut self, handler: Option<AutoHandlerFn>) { self.vectors.patch_auto_handler(handler); }

    /// Activates `count` user vectors starting at vector `first_vector`.
    ///
    /// # Panics
    ///
    /// Panics when the window does not fit the irq or vector tables.
    ///
    /// # Errors
    ///
    /// Domain creation failures are passed up.
    pub fn setup_user_interrupt(&mut self, first_vector: u32, count: u32) -> Result<UserVectors, IrqError> {
        let (id, window) = intc::configure_user(&mut self.vectors, &mut self.irqs, &mut self.domains, first_vector, count)?;
        self.user_domain = Some((id, window));
        Ok(window)
    }

    /// # Errors
    ///
    /// `Invalid` when the irq range runs past the descriptor table.
    pub fn setup_irq_controller(&mut self, chip: &'static dyn IrqChip, flow: Option<FlowHandler>, irq: u32, cnt: u32) -> Result<(), IrqError> {
        self.irqs.setup_irq_controller(chip, flow, irq, cnt)
    }

    /// # Errors
    ///
    /// `Invalid` for an unknown irq, `Busy` for one already claimed.
    pub fn request_irq(&mut self, irq: u32, action: IrqAction) -> Result<(), IrqError> { self.irqs.request(&mut self.vectors, irq, action) }
    /// # Errors
    ///
    /// `Invalid` for an unknown or unclaimed irq.
    pub fn free_irq(&mut self, irq: u32) -> Result<IrqAction, IrqError> { self.irqs.free(&mut self.vectors, irq) }
    /// # Errors
    ///
    /// `Invalid` for an unknown irq.
    pub fn disable_irq(&mut self, irq: u32) -> Result<(), IrqError> { self.irqs.disable(irq) }
    /// # Errors
    ///
    /// `Invalid` for an unknown irq.
    pub fn enable_irq(&mut self, irq: u32) -> Result<(), IrqError> { self.irqs.enable(irq) }

    /// Hooks `vector` directly, bypassing the irq layer.
    ///
    /// # Panics
    ///
    /// Panics if `vector` is outside the table.
    pub fn install_handler(&mut self, vector: u32, hook: HookFn) { self.vectors.install(vector, Handler::Hook(hook)); }
    /// # Panics
    ///
    /// Panics if `vector` is outside the table.
    pub fn reset_vector(&mut self, vector: u32) { self.vectors.reset_to_default(vector); }

    /// # Errors
    ///
    /// `NoDevice` for a domain that is not registered, `BadSpecifier` for a
    /// malformed specifier.
    pub fn translate(&self, domain: DomainId, intspec: &[u32]) -> Result<u32, IrqError> { self.domains.xlate(domain, intspec) }

    /// `memcpy` on the board's bus.
    ///
    /// # Errors
    ///
    /// Bus fault when either range leaves memory.
    pub fn memcpy(&mut self, dst: u32, src: u32, n: u32) -> Result<u32, Fault> { self.mover.copy_forward(&mut self.memory, dst, src, n) }
    /// `memmove` on the board's bus.
    ///
    /// # Errors
    ///
    /// Bus fault when either range leaves memory.
    pub fn memmove(&mut self, dst: u32, src: u32, n: u32) -> Result<u32, Fault> { self.mover.move_bytes(&mut self.memory, dst, src, n) }

    /// Delivers `frame` the way the CPU would: read the slot, run its stub.
    ///
    /// # Panics
    ///
    /// Panics on a vector past the table, a bad trap, or an auto or user
    /// stub reached with a vector outside its window.
    pub fn take_trap(&mut self, frame: &TrapFrame) -> TrapOutcome {
        let vector = frame.vector_number();
        trace!("trap: vector {vector}, sr {:#06x}, pc {:#010x}", frame.sr, frame.pc);
        let Some(slot) = self.vectors.get(vector) else {
            panic!("trap through vector {vector} outside the {} entry vector table", self.vectors.len());
        };
        match slot {
            Slot::Unassigned => {
                self.irq_err_count += 1;
                warn!("unexpected interrupt from {vector}");
                TrapOutcome::BadInterrupt { vector }
            }
            Slot::Assigned(Handler::CpuException) => TrapOutcome::Signal(traps::process_int_oops(frame)),
            Slot::Assigned(Handler::AutoVector) => self.process_int_autovec(frame),
            Slot::Assigned(Handler::UserVector) => self.process_int_user(frame),
            Slot::Assigned(Handler::SystemCall(abi)) => TrapOutcome::SystemCall(abi),
            Slot::Assigned(Handler::BadTrap) => traps::bad_trap(frame),
            Slot::Assigned(Handler::Hook(hook)) => {
                hook(frame);
                TrapOutcome::Hooked { vector }
            }
        }
    }

    fn process_int_autovec(&mut self, frame: &TrapFrame) -> TrapOutcome {
        let hwirq = intc::autovec_hwirq(frame);
        if let Some(handler) = self.vectors.fixups().auto_handler {
            let virq = IRQ_AUTO_1 + hwirq;
            handler(virq, frame);
            return TrapOutcome::Platform { virq };
        }
        let Some(domain) = self.auto_domain else {
            panic!("auto-vector trap on level {} with no auto-vector domain", hwirq + 1);
        };
        self.dispatch(frame, domain, AUTO_DOMAIN, hwirq)
    }
    fn process_int_user(&mut self, frame: &TrapFrame) -> TrapOutcome {
        let Some((domain, window)) = self.user_domain else {
            panic!("user-vector trap through vector {} with no user-vector domain", frame.vector_number());
        };
        let hwirq = window.hwirq(frame);
        self.dispatch(frame, domain, USER_DOMAIN, hwirq)
    }
    fn dispatch(&mut self, frame: &TrapFrame, domain: DomainId, name: &'static str, hwirq: u32) -> TrapOutcome {
        match self.domains.handle_domain_irq(&mut self.irqs, domain, hwirq) {
            Ok((virq, ret)) => {
                trace!("{name}: hwirq {hwirq} -> irq {virq}: {ret:?}");
                TrapOutcome::Irq { domain: name, hwirq, virq, ret }
            }
            Err(error) => {
                debug!("{name}: vector {}: {error}", frame.vector_number());
                TrapOutcome::Unmapped { vector: frame.vector_number(), error }
            }
        }
    }
}
