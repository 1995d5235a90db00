//! Program Builder: assembles the final cflags for a probe and turns its
//! rewritten C source into loadable eBPF bytecode. The only place in the
//! crate that shells out to an external toolchain; everything downstream of
//! this module talks to the kernel exclusively through `aya`.

use std::io::Write;
use std::process::Command;

use crate::errors::{DeChainyError, Result};
use crate::types::AttachMode;

/// Global EPOCH_BASE cflag baked once per controller process, mirroring the
/// original's `/proc/uptime`-derived constant used so probes can compute
/// monotonic timestamps without a helper call on every packet.
#[derive(Debug, Clone, Copy)]
pub struct Epoch(pub u64);

/// Numeric log-level names probe sources may pass to `dp_log`'s first
/// argument, expanded by `expand_dp_log` into a bare `if ({name} <= LOG_LEVEL)`
/// guard. Every name the guard can reference must be a defined constant or
/// the probe fails to compile. Values mirror Python's standard `logging`
/// module levels, the scale the original expressed `log_level` in.
const LOG_LEVELS: &[(&str, u32)] = &[
    ("CRITICAL", 50),
    ("FATAL", 50),
    ("ERROR", 40),
    ("WARN", 30),
    ("WARNING", 30),
    ("INFO", 20),
    ("DEBUG", 10),
    ("NOTSET", 0),
];

/// Assembles the full `-D...` cflag list for one probe compilation.
///
/// `program_id` and `slot_id` are deliberately separate constants:
/// `program_id` is a never-reused identity baked into the wire `Metadata`
/// header so the Event Dispatcher can tell a stale record from a reoccupied
/// chain slot apart from a current one (see `probe::ProbeRegistry`);
/// `slot_id` is the chain/dispatch-map index this program's own tail call
/// addresses (`SLOT_ID` in `wrapper.c`), which the controller does reuse
/// once a slot frees up. Conflating the two, as an earlier revision did, let
/// a record from a removed program reach whatever probe was reinstalled at
/// the same slot id.
#[allow(clippy::too_many_arguments)]
pub fn assemble_cflags(
    mode: AttachMode,
    epoch: Epoch,
    program_id: u16,
    slot_id: u32,
    plugin_id: u16,
    probe_id: u16,
    ingress: bool,
    log_level: u32,
    extra: &[String],
) -> Vec<String> {
    let mut cflags = vec![
        "-DMAX_PROGRAMS_PER_HOOK=32".to_string(),
        format!("-DEPOCH_BASE={}", epoch.0),
    ];
    for (name, level) in LOG_LEVELS {
        cflags.push(format!("-D{name}={level}"));
    }
    if mode.is_tc() {
        cflags.push("-DCTXTYPE=__sk_buff".to_string());
        // TC_ACT_OK / TC_ACT_SHOT: XDP's neutral/drop values (2/1) mean
        // something else entirely under TC and would invert behavior.
        cflags.push("-DPASS=0".to_string());
        cflags.push("-DDROP=2".to_string());
    } else {
        cflags.push("-DCTXTYPE=xdp_md".to_string());
        // XDP_PASS / XDP_DROP.
        cflags.push("-DPASS=2".to_string());
        cflags.push("-DDROP=1".to_string());
    }
    cflags.push(format!("-DXDP={}", if mode.is_tc() { 0 } else { 1 }));
    cflags.push(format!("-DPROGRAM_ID={program_id}"));
    cflags.push(format!("-DSLOT_ID={slot_id}"));
    cflags.push(format!("-DPLUGIN_ID={plugin_id}"));
    cflags.push(format!("-DPROBE_ID={probe_id}"));
    cflags.push(format!("-DINGRESS={}", if ingress { 1 } else { 0 }));
    cflags.push(format!("-DLOG_LEVEL={log_level}"));
    cflags.extend(extra.iter().cloned());
    cflags
}

/// Seam over the actual C-to-bytecode toolchain so chain/slot bookkeeping
/// can be tested without clang or a kernel present.
pub trait Toolchain {
    fn compile(&self, source: &str, cflags: &[String]) -> Result<Vec<u8>>;
}

/// Invokes the system `clang` targeting `bpf`, mirroring how a from-scratch
/// userspace controller replaces BCC's embedded-compiler step.
pub struct ClangToolchain {
    pub clang_path: String,
}

impl Default for ClangToolchain {
    fn default() -> Self {
        ClangToolchain {
            clang_path: "clang".to_string(),
        }
    }
}

impl Toolchain for ClangToolchain {
    fn compile(&self, source: &str, cflags: &[String]) -> Result<Vec<u8>> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".c")
            .tempfile()
            .map_err(DeChainyError::Io)?;
        tmp.write_all(source.as_bytes()).map_err(DeChainyError::Io)?;
        let out_path = tmp.path().with_extension("o");

        let status = Command::new(&self.clang_path)
            .arg("-target")
            .arg("bpf")
            .arg("-O2")
            .arg("-g")
            .args(cflags)
            .arg("-c")
            .arg(tmp.path())
            .arg("-o")
            .arg(&out_path)
            .status()
            .map_err(DeChainyError::Io)?;

        if !status.success() {
            return Err(DeChainyError::CompilationFailed(format!(
                "clang exited with {status}"
            )));
        }

        std::fs::read(&out_path).map_err(DeChainyError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cflags_include_core_constants() {
        let cflags = assemble_cflags(AttachMode::XdpDrv, Epoch(12345), 3, 7, 1, 2, true, 3, &[]);
        assert!(cflags.contains(&"-DMAX_PROGRAMS_PER_HOOK=32".to_string()));
        assert!(cflags.contains(&"-DEPOCH_BASE=12345".to_string()));
        assert!(cflags.contains(&"-DCTXTYPE=xdp_md".to_string()));
        assert!(cflags.contains(&"-DXDP=1".to_string()));
        assert!(cflags.contains(&"-DPROGRAM_ID=3".to_string()));
        assert!(cflags.contains(&"-DSLOT_ID=7".to_string()));
        assert!(cflags.contains(&"-DINGRESS=1".to_string()));
        assert!(cflags.contains(&"-DPASS=2".to_string()));
        assert!(cflags.contains(&"-DDROP=1".to_string()));
        assert!(cflags.contains(&"-DINFO=20".to_string()));
        assert!(cflags.contains(&"-DDEBUG=10".to_string()));
    }

    #[test]
    fn tc_mode_uses_sk_buff_ctxtype() {
        let cflags = assemble_cflags(AttachMode::SchedCls, Epoch(1), 1, 1, 0, 0, false, 2, &[]);
        assert!(cflags.contains(&"-DCTXTYPE=__sk_buff".to_string()));
        assert!(cflags.contains(&"-DXDP=0".to_string()));
        assert!(cflags.contains(&"-DINGRESS=0".to_string()));
    }

    #[test]
    fn tc_and_xdp_disagree_on_pass_and_drop_values() {
        let tc = assemble_cflags(AttachMode::SchedCls, Epoch(1), 0, 0, 0, 0, true, 3, &[]);
        assert!(tc.contains(&"-DPASS=0".to_string()));
        assert!(tc.contains(&"-DDROP=2".to_string()));

        let xdp = assemble_cflags(AttachMode::XdpDrv, Epoch(1), 0, 0, 0, 0, true, 3, &[]);
        assert!(xdp.contains(&"-DPASS=2".to_string()));
        assert!(xdp.contains(&"-DDROP=1".to_string()));
    }

    #[test]
    fn program_id_and_slot_id_are_independent_constants() {
        // A patch that recompiles the same chain slot gets a fresh
        // program_id but keeps the same slot_id.
        let first = assemble_cflags(AttachMode::XdpDrv, Epoch(1), 10, 4, 0, 0, true, 3, &[]);
        let patched = assemble_cflags(AttachMode::XdpDrv, Epoch(1), 11, 4, 0, 0, true, 3, &[]);
        assert!(first.contains(&"-DPROGRAM_ID=10".to_string()));
        assert!(first.contains(&"-DSLOT_ID=4".to_string()));
        assert!(patched.contains(&"-DPROGRAM_ID=11".to_string()));
        assert!(patched.contains(&"-DSLOT_ID=4".to_string()));
    }
}
