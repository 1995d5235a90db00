use serde::{Deserialize, Serialize};

/// Hook direction relative to the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }

    /// The other direction on the same interface. Used to check whether a
    /// TC clsact qdisc is still needed by a sibling hook before removing it.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Ingress => Direction::Egress,
            Direction::Egress => Direction::Ingress,
        }
    }
}

/// Attach mode requested for a hook: XDP (with its sub-mode) or classic TC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachMode {
    XdpSkb,
    XdpDrv,
    XdpHw,
    SchedCls,
}

impl AttachMode {
    pub fn is_tc(&self) -> bool {
        matches!(self, AttachMode::SchedCls)
    }

    pub fn xdp_flags(&self) -> Option<aya::programs::XdpFlags> {
        match self {
            AttachMode::XdpSkb => Some(aya::programs::XdpFlags::SKB_MODE),
            AttachMode::XdpDrv => Some(aya::programs::XdpFlags::DRV_MODE),
            AttachMode::XdpHw => Some(aya::programs::XdpFlags::HW_MODE),
            AttachMode::SchedCls => None,
        }
    }
}

/// Which map-attribute, if any, annotated a `BPF_TABLE`/`BPF_QUEUESTACK`/`BPF_PERF`
/// declaration via `__attributes__((...))` in the probe source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFeatures {
    pub swap: bool,
    pub empty: bool,
    pub export: bool,
}

/// The fixed-layout header that prefixes every perf-buffer record emitted by
/// a probe, whether it is a log message or a packet capture. Field order and
/// widths mirror the C struct probes are compiled against; this must stay
/// `#[repr(C)]` and byte-stable.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Metadata {
    pub ifindex: u32,
    pub length: u32,
    pub ingress: u8,
    pub xdp: u8,
    pub program_id: u16,
    pub plugin_id: u16,
    pub probe_id: u16,
}

impl Metadata {
    pub const SIZE: usize = std::mem::size_of::<Metadata>();

    /// Parses a `Metadata` header out of the front of a raw perf-buffer
    /// record. Returns `None` if the buffer is shorter than the header.
    pub fn parse(buf: &[u8]) -> Option<Metadata> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const Metadata) })
    }
}

// SAFETY: plain-old-data layout matching the C-side wire struct.
unsafe impl aya::Pod for Metadata {}
