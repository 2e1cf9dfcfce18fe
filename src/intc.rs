#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

//! The 680x0 vector interrupt controller: the fixed auto-vector domain,
//! the relocatable user-vector domain, and the vector layouts installed
//! for each controller flavour.

use log::info;

use crate::{
    cpu::TrapFrame,
    domain::{xlate_onecell, DomainId, DomainRegistry, IrqDomainOps},
    irq::{FlowHandler, IrqError, IrqTable, AUTO_IRQ_CHIP, IRQ_AUTO_1, IRQ_USER, MAX_USER_IRQS, USER_IRQ_CHIP},
    traps::SyscallAbi,
    vectors::{Handler, VectorTable, VEC_BUSERR, VEC_INT1, VEC_INT7, VEC_PRIV, VEC_SYS, VEC_TRAP1, VEC_TRAP15, VEC_USER},
};

pub const AUTOVEC_START: u32 = VEC_INT1;
pub const AUTOVEC_NUM: u32 = 7;
pub const USER_START: u32 = VEC_USER;

pub const AUTO_DOMAIN: &str = "mc680x0-intc-vect";
pub const USER_DOMAIN: &str = "mc680x0-intc-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntcVariant {
    Mc68000,
    Mc68010,
}
impl IntcVariant {
    pub const fn syscall_abi(self) -> SyscallAbi {
        match self {
            Self::Mc68000 => SyscallAbi::Legacy68000,
            Self::Mc68010 => SyscallAbi::Standard,
        }
    }

    /// Points the exception, auto-vector and trap slots at their entry stubs.
    pub fn install_vectors(self, vectors: &mut VectorTable) {
        vectors.install(VEC_SYS, Handler::SystemCall(self.syscall_abi()));
        match self {
            // one stub per vector
            Self::Mc68000 => {
                for vector in VEC_BUSERR..=VEC_PRIV {
                    vectors.install(vector, Handler::CpuException);
                }
                for vector in VEC_INT1..=VEC_INT7 {
                    vectors.install(vector, Handler::AutoVector);
                }
                vectors.install(VEC_TRAP1, Handler::BadTrap);
            }
            Self::Mc68010 => {
                vectors.install_range(VEC_BUSERR..=VEC_PRIV, Handler::CpuException);
                vectors.install_range(VEC_INT1..=VEC_INT7, Handler::AutoVector);
                vectors.install_range(VEC_TRAP1..=VEC_TRAP15, Handler::BadTrap);
            }
        }
    }
}

#[derive(Debug)]
pub struct AutoDomainOps;
impl IrqDomainOps for AutoDomainOps {
    fn map(&self, irqs: &mut IrqTable, virq: u32, _hwirq: u32) -> Result<(), IrqError> {
        irqs.set_chip_and_handler(virq, &AUTO_IRQ_CHIP, FlowHandler::Simple)?;
        irqs.set_probe(virq)
    }
}
pub static AUTO_DOMAIN_OPS: AutoDomainOps = AutoDomainOps;

/// Device tree cells count from zero; user hwirqs start at `IRQ_USER`.
#[derive(Debug)]
pub struct UserDomainOps;
impl IrqDomainOps for UserDomainOps {
    fn xlate(&self, intspec: &[u32]) -> Result<u32, IrqError> { Ok(xlate_onecell(intspec)? + IRQ_USER) }
    fn map(&self, irqs: &mut IrqTable, virq: u32, _hwirq: u32) -> Result<(), IrqError> {
        irqs.set_chip_and_handler(virq, &USER_IRQ_CHIP, FlowHandler::Simple)?;
        irqs.set_probe(virq)
    }
}
pub static USER_DOMAIN_OPS: UserDomainOps = UserDomainOps;

/// Levels 1 to 7 as hwirqs 0 to 6, logical irqs `IRQ_AUTO_1..=IRQ_AUTO_7`.
///
/// # Errors
///
/// Domain creation failures are passed up.
pub fn create_auto_domain(domains: &mut DomainRegistry, irqs: &mut IrqTable) -> Result<DomainId, IrqError> {
    domains.create_legacy(irqs, AUTO_DOMAIN, AUTOVEC_NUM, IRQ_AUTO_1, 0, &AUTO_DOMAIN_OPS)
}

/// Hardware irq of an auto-vectored trap.
///
/// # Panics
///
/// Panics if the frame's vector is not one of the seven auto-vectors.
pub fn autovec_hwirq(frame: &TrapFrame) -> u32 {
    let vector = frame.vector_number();
    assert!(
        (AUTOVEC_START..AUTOVEC_START + AUTOVEC_NUM).contains(&vector),
        "auto-vector dispatch through vector {vector} (offset {:#x}), expected {AUTOVEC_START}..{}",
        frame.vector_offset(),
        AUTOVEC_START + AUTOVEC_NUM
    );
    vector - AUTOVEC_START
}

/// Window of the vector table owned by the user-vector domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserVectors {
    pub first_vector: u32,
    pub count:        u32,
}
impl Default for UserVectors {
    fn default() -> Self {
        Self {
            first_vector: USER_START,
            count:        MAX_USER_IRQS,
        }
    }
}
impl UserVectors {
    pub const fn end(&self) -> u32 { self.first_vector + self.count }
    pub const fn contains(&self, vector: u32) -> bool { vector >= self.first_vector && vector < self.end() }

    /// Hardware irq of a user-vectored trap.
    ///
    /// # Panics
    ///
    /// Panics if the frame's vector is outside the configured window.
    pub fn hwirq(&self, frame: &TrapFrame) -> u32 {
        let vector = frame.vector_number();
        assert!(
            self.contains(vector),
            "user-vector dispatch through vector {vector} (offset {:#x}), expected {}..{}",
            frame.vector_offset(),
            self.first_vector,
            self.end()
        );
        IRQ_USER + (vector - self.first_vector)
    }
}

/// Activates `count` user vectors starting at `first_vector`: creates the
/// user domain and relocates the user stub to the new base.
///
/// # Panics
///
/// Panics if `count` user irqs do not fit the descriptor table, if the
/// window starts below `VEC_USER` or if it runs past the vector table.
///
/// # Errors
///
/// Domain creation failures are passed up; the fixup is untouched then.
pub fn configure_user(
    vectors: &mut VectorTable,
    irqs: &mut IrqTable,
    domains: &mut DomainRegistry,
    first_vector: u32,
    count: u32,
) -> Result<(DomainId, UserVectors), IrqError> {
    assert!(
        count <= irqs.nr_irqs().saturating_sub(IRQ_USER),
        "{count} user vectors need irqs up to {}, only {} available",
        u64::from(IRQ_USER) + u64::from(count),
        irqs.nr_irqs()
    );
    assert!(
        first_vector >= VEC_USER,
        "user vectors must start at or above {VEC_USER}, got {first_vector}"
    );
    assert!(
        first_vector.checked_add(count).is_some_and(|end| end <= vectors.len()),
        "user vectors {first_vector}..{} overrun the {} entry vector table",
        u64::from(first_vector) + u64::from(count),
        vectors.len()
    );

    let domain = domains.create_legacy(irqs, USER_DOMAIN, count, IRQ_USER, IRQ_USER, &USER_DOMAIN_OPS)?;
    vectors.patch_user_vec(first_vector - IRQ_USER);
    info!("user vectors {first_vector}..{} -> irq {IRQ_USER}..{}", first_vector + count, IRQ_USER + count);
    Ok((domain, UserVectors { first_vector, count }))
}

#[cfg(test)]
mod tests {
    use std::panic::catch_unwind;

    use super::*;
    use crate::{
        irq::{IrqChip, NR_IRQS},
        vectors::{Slot, TableSize},
    };

    fn parts() -> (VectorTable, IrqTable, DomainRegistry) {
        (VectorTable::new(TableSize::Full), IrqTable::new(NR_IRQS), DomainRegistry::new(2))
    }

    #[test]
    fn every_auto_vector_yields_its_level() {
        for level in 0..AUTOVEC_NUM {
            let frame = TrapFrame::new(((AUTOVEC_START + level) * 4) as u16);
            assert_eq!(autovec_hwirq(&frame), level);
        }
    }

    #[test]
    fn auto_dispatch_outside_the_window_is_fatal() {
        for vector in (0..256).filter(|v| !(25..32).contains(v)) {
            let frame = TrapFrame::for_vector(vector);
            assert!(catch_unwind(|| autovec_hwirq(&frame)).is_err(), "vector {vector}");
        }
    }

    #[test]
    fn auto_domain_maps_levels_to_irqs_1_to_7() {
        let (_, mut irqs, mut domains) = parts();
        let id = create_auto_domain(&mut domains, &mut irqs).unwrap();
        let domain = domains.get(id).unwrap();
        assert_eq!(domain.find_mapping(0), Some(IRQ_AUTO_1));
        assert_eq!(domain.find_mapping(3), Some(4));
        assert_eq!(domain.find_mapping(7), None);
        assert_eq!(irqs.desc(7).unwrap().chip().name(), "auto");
        assert!(irqs.desc(7).unwrap().probe());
        assert_eq!(domains.xlate(id, &[2]), Ok(2));
    }

    #[test]
    fn user_configure_translates_and_relocates() {
        let (mut vectors, mut irqs, mut domains) = parts();
        let flushes = vectors.icache_flushes();
        let (id, window) = configure_user(&mut vectors, &mut irqs, &mut domains, 200, 50).unwrap();
        assert_eq!(window, UserVectors { first_vector: 200, count: 50 });
        assert_eq!(vectors.fixups().user_vec, 192);
        assert_eq!(vectors.icache_flushes(), flushes + 1);
        assert_eq!(domains.xlate(id, &[10]), Ok(IRQ_USER + 10));
        assert_eq!(domains.xlate(id, &[]), Err(IrqError::BadSpecifier(0)));
        assert_eq!(irqs.desc(IRQ_USER + 49).unwrap().chip().name(), USER_IRQ_CHIP.name());
        assert_eq!(irqs.desc(IRQ_USER + 50).unwrap().chip().name(), "none");
        assert_eq!(window.hwirq(&TrapFrame::for_vector(210)), IRQ_USER + 10);
    }

    #[test]
    fn user_dispatch_outside_the_window_is_fatal() {
        let window = UserVectors { first_vector: 200, count: 50 };
        for vector in [0, 64, 199, 250, 255] {
            let frame = TrapFrame::for_vector(vector);
            assert!(catch_unwind(|| window.hwirq(&frame)).is_err(), "vector {vector}");
        }
        assert_eq!(UserVectors::default().hwirq(&TrapFrame::for_vector(154)), IRQ_USER + 90);
    }

    #[test]
    #[should_panic(expected = "92 user vectors need irqs up to 100, only 99 available")]
    fn user_capacity_is_asserted() {
        let (mut vectors, mut irqs, mut domains) = parts();
        let _ = configure_user(&mut vectors, &mut irqs, &mut domains, 64, MAX_USER_IRQS + 1);
    }

    #[test]
    #[should_panic(expected = "4294967288 user vectors need irqs up to 4294967296, only 99 available")]
    fn huge_user_count_cannot_wrap_past_the_capacity_check() {
        let (mut vectors, mut irqs, mut domains) = parts();
        let _ = configure_user(&mut vectors, &mut irqs, &mut domains, 64, u32::MAX - 7);
    }

    #[test]
    #[should_panic(expected = "overrun the 256 entry vector table")]
    fn huge_first_vector_cannot_wrap_past_the_table_check() {
        let (mut vectors, mut irqs, mut domains) = parts();
        let _ = configure_user(&mut vectors, &mut irqs, &mut domains, u32::MAX - 2, 8);
    }

    #[test]
    #[should_panic(expected = "user vectors must start at or above 64")]
    fn user_window_cannot_cover_exceptions() {
        let (mut vectors, mut irqs, mut domains) = parts();
        let _ = configure_user(&mut vectors, &mut irqs, &mut domains, 40, 8);
    }

    #[test]
    #[should_panic(expected = "overrun the 256 entry vector table")]
    fn user_window_stays_inside_the_table() {
        let (mut vectors, mut irqs, mut domains) = parts();
        let _ = configure_user(&mut vectors, &mut irqs, &mut domains, 240, 20);
    }

    #[test]
    fn second_user_domain_is_refused() {
        let (mut vectors, mut irqs, mut domains) = parts();
        configure_user(&mut vectors, &mut irqs, &mut domains, 64, 8).unwrap();
        assert_eq!(
            configure_user(&mut vectors, &mut irqs, &mut domains, 128, 8),
            Err(IrqError::Exists(USER_DOMAIN))
        );
        assert_eq!(vectors.fixups().user_vec, 64 - IRQ_USER);
    }

    #[test]
    fn layouts_differ_per_variant() {
        let mut vectors = VectorTable::new(TableSize::Base);
        IntcVariant::Mc68000.install_vectors(&mut vectors);
        assert!(matches!(vectors.get(VEC_SYS), Some(Slot::Assigned(Handler::SystemCall(SyscallAbi::Legacy68000)))));
        assert!(matches!(vectors.get(33), Some(Slot::Assigned(Handler::BadTrap))));
        assert!(!vectors.is_assigned(34));
        assert_eq!(vectors.assigned().count(), 1 + 7 + 7 + 1);

        let mut vectors = VectorTable::new(TableSize::Base);
        IntcVariant::Mc68010.install_vectors(&mut vectors);
        assert!(matches!(vectors.get(VEC_SYS), Some(Slot::Assigned(Handler::SystemCall(SyscallAbi::Standard)))));
        assert!((33..=47).all(|v| matches!(vectors.get(v), Some(Slot::Assigned(Handler::BadTrap)))));
        assert!(matches!(vectors.get(VEC_PRIV), Some(Slot::Assigned(Handler::CpuException))));
        assert!(!vectors.is_assigned(VEC_BUSERR - 1));
        assert!(!vectors.is_assigned(24));
        assert_eq!(vectors.icache_flushes(), 4);
    }
}
