use std::sync::Mutex;

use aya::programs::{tc, SchedClassifier, TcAttachType};
use aya::Bpf;

use crate::errors::{DeChainyError, Result};
use crate::types::{AttachMode, Direction};

use super::HookAttacher;

/// Attaches pivot programs to the TC ingress/egress clsact hook of an
/// interface. The clsact qdisc is shared between both directions on an
/// interface, so it is added idempotently on first use and only removed
/// once the caller confirms neither direction needs it anymore.
#[derive(Default)]
pub struct TcAttacher {
    qdisc_added: Mutex<std::collections::HashSet<u32>>,
}

impl HookAttacher for TcAttacher {
    fn attach_pivot(
        &self,
        bpf: &mut Bpf,
        program_name: &str,
        iface: &str,
        ifindex: u32,
        direction: Direction,
        mode: AttachMode,
    ) -> Result<()> {
        if !mode.is_tc() {
            return Err(DeChainyError::Error("tc attach called with non-tc mode".into()));
        }
        log::info!("attaching tc pivot to ifindex {ifindex} direction {direction:?}");
        attach_tc_program(bpf, program_name, iface, direction, 0)?;
        self.qdisc_added.lock().expect("lock poisoned").insert(ifindex);
        Ok(())
    }

    fn detach_pivot(
        &self,
        ifindex: u32,
        direction: Direction,
        _mode: AttachMode,
        qdisc_still_in_use: bool,
    ) -> Result<()> {
        log::info!("detaching tc pivot from ifindex {ifindex} direction {direction:?}");
        if !qdisc_still_in_use {
            self.qdisc_added.lock().expect("lock poisoned").remove(&ifindex);
        }
        Ok(())
    }
}

/// Adds the clsact qdisc on `iface` if it is not already present. Mirrors
/// `bpfd`'s tolerance of "qdisc already exists" on repeated calls.
pub fn qdisc_add_clsact(iface: &str) -> Result<()> {
    match tc::qdisc_add_clsact(iface) {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("File exists") => Ok(()),
        Err(e) => Err(DeChainyError::AttachFailed(e.to_string())),
    }
}

/// Performs the actual `aya` TC attach once the pivot's `Bpf` object is
/// loaded, returning the kernel-assigned link handle so the caller can
/// decide whether a later dispatcher replacement needs to detach it.
pub fn attach_tc_program(
    bpf: &mut Bpf,
    program_name: &str,
    iface: &str,
    direction: Direction,
    priority: u16,
) -> Result<u32> {
    qdisc_add_clsact(iface)?;
    let classifier: &mut SchedClassifier = bpf
        .program_mut(program_name)
        .ok_or_else(|| DeChainyError::Error(format!("program {program_name} not found")))?
        .try_into()?;
    classifier.load()?;
    let attach_type = match direction {
        Direction::Ingress => TcAttachType::Ingress,
        Direction::Egress => TcAttachType::Egress,
    };
    let link_id = classifier
        .attach(iface, attach_type)
        .map_err(|e| DeChainyError::AttachFailed(e.to_string()))?;
    let link = classifier.take_link(link_id)?;
    let handle = link.handle();
    std::mem::forget(link);
    let _ = priority;
    Ok(handle)
}
