#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

//! Controller discovery from a flattened device description.

use std::{collections::BTreeMap, fmt::Debug};

use log::{info, warn};

use crate::{
    intc::{IntcVariant, UserVectors},
    irq::IrqError,
    machine::Machine,
};

/// Property holding `<first_vector count>` on a user-vector controller.
pub const VECTOR_RANGE: &str = "vector-range";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNode {
    pub name:       String,
    pub compatible: Vec<String>,
    pub props:      BTreeMap<String, Vec<u32>>,
}
impl DeviceNode {
    pub fn new(name: impl Into<String>, compatible: &[&str]) -> Self {
        Self {
            name:       name.into(),
            compatible: compatible.iter().map(|&c| c.to_owned()).collect(),
            props:      BTreeMap::new(),
        }
    }
    #[must_use]
    pub fn with_prop(mut self, name: &str, cells: &[u32]) -> Self {
        self.props.insert(name.to_owned(), cells.to_vec());
        self
    }
    pub fn prop(&self, name: &str) -> Option<&[u32]> { self.props.get(name).map(Vec::as_slice) }
    pub fn is_compatible(&self, compatible: &str) -> bool { self.compatible.iter().any(|c| c == compatible) }
}

pub type IrqchipInitFn = fn(&mut Machine, &DeviceNode) -> Result<(), IrqError>;

#[derive(Clone, Copy)]
pub struct OfDeviceId {
    pub compatible: &'static str,
    pub init:       IrqchipInitFn,
}
impl Debug for OfDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfDeviceId").field("compatible", &self.compatible).finish_non_exhaustive()
    }
}

#[rustfmt::skip]
pub static IRQCHIP_OF_MATCH: [OfDeviceId; 4] = [
    OfDeviceId { compatible: "motorola,mc68000-intc-vect", init: mc68000_intc_of_init },
    OfDeviceId { compatible: "motorola,mc68010-intc-vect", init: mc68010_intc_of_init },
    OfDeviceId { compatible: "motorola,mc68000-intc-user", init: mc68000_intc_user_of_init },
    OfDeviceId { compatible: "motorola,mc68010-intc-user", init: mc68010_intc_user_of_init },
];

fn mc68000_intc_of_init(machine: &mut Machine, _node: &DeviceNode) -> Result<(), IrqError> {
    machine.init_intc_vect(IntcVariant::Mc68000).map(drop)
}
fn mc68010_intc_of_init(machine: &mut Machine, _node: &DeviceNode) -> Result<(), IrqError> {
    machine.init_intc_vect(IntcVariant::Mc68010).map(drop)
}
fn mc68000_intc_user_of_init(machine: &mut Machine, node: &DeviceNode) -> Result<(), IrqError> {
    intc_user_of_init(machine, node, IntcVariant::Mc68000)
}
fn mc68010_intc_user_of_init(machine: &mut Machine, node: &DeviceNode) -> Result<(), IrqError> {
    intc_user_of_init(machine, node, IntcVariant::Mc68010)
}
fn intc_user_of_init(machine: &mut Machine, node: &DeviceNode, variant: IntcVariant) -> Result<(), IrqError> {
    let window = match node.prop(VECTOR_RANGE) {
        None => UserVectors::default(),
        Some(&[first_vector, count]) => UserVectors { first_vector, count },
        Some(cells) => return Err(IrqError::BadSpecifier(cells.len())),
    };
    machine.init_intc_user(variant, window.first_vector, window.count).map(drop)
}

/// First match table entry the node is compatible with.
pub fn match_node(node: &DeviceNode) -> Option<&'static OfDeviceId> {
    IRQCHIP_OF_MATCH.iter().find(|id| node.is_compatible(id.compatible))
}

/// Runs the init function of every interrupt controller in `nodes`, in
/// order. A controller that fails to come up is logged and skipped.
///
/// Returns the number of controllers brought up.
pub fn irqchip_init(machine: &mut Machine, nodes: &[DeviceNode]) -> usize {
    let mut up = 0;
    for node in nodes {
        let Some(id) = match_node(node) else { continue };
        match (id.init)(machine, node) {
            Ok(()) => {
                info!("{}: {} up", node.name, id.compatible);
                up += 1;
            }
            Err(e) => warn!("{}: {} failed: {e} ({})", node.name, id.compatible, e.errno()),
        }
    }
    up
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        irq::IRQ_USER,
        traps::SyscallAbi,
        vectors::{Handler, Slot, VEC_SYS},
    };

    fn machine() -> Machine { Machine::boot(Config::default()).unwrap() }

    #[test]
    fn match_table_covers_both_flavours() {
        for id in &IRQCHIP_OF_MATCH {
            assert_eq!(match_node(&DeviceNode::new("intc", &[id.compatible])).map(|m| m.compatible), Some(id.compatible));
        }
        assert!(match_node(&DeviceNode::new("uart", &["motorola,mc68681"])).is_none());
        let node = DeviceNode::new("intc", &["vendor,board-intc", "motorola,mc68010-intc-vect"]);
        assert_eq!(match_node(&node).map(|m| m.compatible), Some("motorola,mc68010-intc-vect"));
    }

    #[test]
    fn vect_controller_installs_layout_and_domain() {
        let mut machine = machine();
        let nodes = [DeviceNode::new("intc", &["motorola,mc68010-intc-vect"])];
        assert_eq!(irqchip_init(&mut machine, &nodes), 1);
        assert!(machine.auto_domain().is_some());
        assert_eq!(machine.syscall_abi(), SyscallAbi::Standard);
        assert!(matches!(machine.vectors().get(VEC_SYS), Some(Slot::Assigned(Handler::SystemCall(SyscallAbi::Standard)))));
    }

    #[test]
    fn user_controller_defaults_to_the_full_window() {
        let mut machine = machine();
        let nodes = [
            DeviceNode::new("intc", &["motorola,mc68000-intc-vect"]),
            DeviceNode::new("uintc", &["motorola,mc68000-intc-user"]),
        ];
        assert_eq!(irqchip_init(&mut machine, &nodes), 2);
        assert_eq!(machine.user_vectors(), Some(UserVectors { first_vector: 64, count: 91 }));
        assert_eq!(machine.syscall_abi(), SyscallAbi::Legacy68000);
    }

    #[test]
    fn user_controller_reads_its_vector_range() {
        let mut machine = machine();
        let nodes = [DeviceNode::new("uintc", &["motorola,mc68010-intc-user"]).with_prop(VECTOR_RANGE, &[200, 50])];
        assert_eq!(irqchip_init(&mut machine, &nodes), 1);
        assert_eq!(machine.vectors().fixups().user_vec, 200 - IRQ_USER);
        let domain = machine.user_domain().unwrap();
        assert_eq!(machine.translate(domain, &[10]), Ok(IRQ_USER + 10));
    }

    #[test]
    fn second_vect_controller_leaves_the_first_alone() {
        let mut machine = machine();
        let nodes = [
            DeviceNode::new("intc", &["motorola,mc68000-intc-vect"]),
            DeviceNode::new("intc2", &["motorola,mc68010-intc-vect"]),
        ];
        assert_eq!(irqchip_init(&mut machine, &nodes), 1);
        assert_eq!(machine.syscall_abi(), SyscallAbi::Legacy68000);
        assert!(matches!(machine.vectors().get(VEC_SYS), Some(Slot::Assigned(Handler::SystemCall(SyscallAbi::Legacy68000)))));
        assert!(!machine.vectors().is_assigned(34));
    }

    #[test]
    fn failed_controllers_are_skipped() {
        let mut machine = Machine::boot(Config::default().with_max_domains(1)).unwrap();
        let nodes = [
            DeviceNode::new("intc", &["motorola,mc68010-intc-vect"]),
            DeviceNode::new("uintc", &["motorola,mc68010-intc-user"]),
            DeviceNode::new("bad", &["motorola,mc68010-intc-user"]).with_prop(VECTOR_RANGE, &[64]),
        ];
        assert_eq!(irqchip_init(&mut machine, &nodes), 1);
        assert!(machine.auto_domain().is_some());
        assert!(machine.user_domain().is_none());
    }
}
