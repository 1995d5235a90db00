use aya::programs::{Xdp, XdpFlags};
use aya::Bpf;

use crate::errors::{DeChainyError, Result};
use crate::types::{AttachMode, Direction};

use super::HookAttacher;

/// Attaches pivot programs to the XDP hook of an interface. XDP has no
/// ingress/egress split in the kernel — `direction` here is only used to
/// pick the dispatch map name convention, never to change the attach call.
#[derive(Default)]
pub struct XdpAttacher;

impl HookAttacher for XdpAttacher {
    fn attach_pivot(
        &self,
        bpf: &mut Bpf,
        program_name: &str,
        iface: &str,
        ifindex: u32,
        _direction: Direction,
        mode: AttachMode,
    ) -> Result<()> {
        let flags = mode
            .xdp_flags()
            .ok_or_else(|| DeChainyError::Error("xdp attach called with non-xdp mode".into()))?;
        log::info!("attaching xdp pivot to ifindex {ifindex} with flags {flags:?}");
        attach_xdp_program(bpf, program_name, iface, flags)
    }

    fn detach_pivot(
        &self,
        ifindex: u32,
        _direction: Direction,
        _mode: AttachMode,
        _qdisc_still_in_use: bool,
    ) -> Result<()> {
        // No owned link is kept past `attach_xdp_program`'s call, so dropping
        // the pivot's `Bpf` object (done by the caller right after this
        // returns) detaches the program; this is purely the log line.
        log::info!("detaching xdp pivot from ifindex {ifindex}");
        Ok(())
    }
}

/// Performs the actual `aya` attach call once the pivot's `Bpf` object is
/// loaded. Split out from the trait method above because the trait is the
/// testable seam and this function is the concrete kernel-facing half the
/// controller calls directly.
pub fn attach_xdp_program(bpf: &mut Bpf, program_name: &str, iface: &str, flags: XdpFlags) -> Result<()> {
    let xdp: &mut Xdp = bpf
        .program_mut(program_name)
        .ok_or_else(|| DeChainyError::Error(format!("program {program_name} not found")))?
        .try_into()?;
    xdp.load()?;
    xdp.attach(iface, flags)
        .map_err(|e| DeChainyError::AttachFailed(e.to_string()))?;
    Ok(())
}
