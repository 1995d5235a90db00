use thiserror::Error;

/// Error surface for the whole crate. One variant per failure mode a caller
/// of the controller facade needs to distinguish; everything else is
/// wrapped transparently from the underlying library that raised it.
#[derive(Debug, Error)]
pub enum DeChainyError {
    #[error("unknown interface: {0}")]
    UnknownInterface(String),

    #[error("interface {0} is already attached with incompatible xdp flags")]
    IncompatibleXdpFlags(String),

    #[error("hook has no free program slots (max {0} reached)")]
    HookFull(u32),

    #[error("probe not found for plugin_id={plugin_id} probe_id={probe_id}")]
    ProbeNotFound { plugin_id: u16, probe_id: u16 },

    #[error(
        "probe plugin_id={plugin_id} probe_id={probe_id} did not register a {direction:?} hook"
    )]
    HookDisabled {
        plugin_id: u16,
        probe_id: u16,
        direction: crate::types::Direction,
    },

    #[error("probe plugin_id={plugin_id} probe_id={probe_id} was given neither ingress nor egress source")]
    NoCodeProbe { plugin_id: u16, probe_id: u16 },

    #[error("source rewriting failed: {0}")]
    RewriteFailed(String),

    #[error("program compilation failed: {0}")]
    CompilationFailed(String),

    #[error("attach failed: {0}")]
    AttachFailed(String),

    #[error("another instance is already running, or a previous instance crashed without cleaning up")]
    AlreadyRunning,

    #[error("redirect target interface not found: {0}")]
    UnknownRedirectTarget(String),

    #[error("{0}")]
    Error(String),

    #[error(transparent)]
    Bpf(#[from] aya::BpfError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),
}

pub type Result<T> = std::result::Result<T, DeChainyError>;
