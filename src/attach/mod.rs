//! Hook Attacher: puts the pivot program of a hook onto the kernel (XDP
//! program or TC clsact filter) and tears it down again when the hook
//! empties. The concrete kernel calls are free functions in [`xdp`]/[`tc`];
//! `HookAttacher` is the seam the Controller Facade calls through so the
//! chain/slot bookkeeping in [`crate::chain`] stays testable with a fake
//! implementation.

pub mod tc;
pub mod xdp;

use aya::Bpf;

use crate::errors::Result;
use crate::types::{AttachMode, Direction};

/// Seam over the kernel-facing half of hook attachment.
pub trait HookAttacher: Send + Sync {
    /// Attaches `program_name` out of `bpf` as the pivot program for
    /// `(ifindex, direction, mode)`. For XDP this replaces any existing
    /// program link; for TC it adds the clsact qdisc on first use for the
    /// interface. `bpf` must already have the pivot's bytecode loaded (not
    /// yet attached) via `aya::BpfLoader`.
    fn attach_pivot(
        &self,
        bpf: &mut Bpf,
        program_name: &str,
        iface: &str,
        ifindex: u32,
        direction: Direction,
        mode: AttachMode,
    ) -> Result<()>;

    /// Detaches the pivot for `(ifindex, direction, mode)`. For TC, removes
    /// the clsact qdisc only when the caller confirms (via
    /// `qdisc_still_in_use`) that no other direction still needs it.
    fn detach_pivot(
        &self,
        ifindex: u32,
        direction: Direction,
        mode: AttachMode,
        qdisc_still_in_use: bool,
    ) -> Result<()>;
}

pub use tc::TcAttacher;
pub use xdp::XdpAttacher;
