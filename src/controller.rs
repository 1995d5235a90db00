//! Controller Facade: the single entry point external collaborators (REST
//! layer, CLI, plugin-directory watcher — none of which live in this crate)
//! use to compile, remove, and patch hooks. Not a singleton in the
//! language-level sense: callers construct one `Controller` at process
//! entry and hold it for the process lifetime; the one-per-host invariant
//! is enforced by the sentinel interface, not by a global.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aya::maps::ProgramArray;
use aya::{Bpf, BpfLoader};
use rtnetlink::Handle;
use tokio_util::sync::CancellationToken;

use crate::attach::{HookAttacher, TcAttacher, XdpAttacher};
use crate::chain::{HookSlot, InterfaceRegistry, RemovePlan};
use crate::compiler::{assemble_cflags, ClangToolchain, Epoch, Toolchain};
use crate::config::Config;
use crate::dispatch::DispatchMap;
use crate::errors::{DeChainyError, Result};
use crate::events::{self, DispatchStats};
use crate::probe::{Probe, ProbeRegistry};
use crate::program::{Program, ProgramKind, SlotProgram, SwapPair};
use crate::rewriter;
use crate::sentinel;
use crate::templates;
use crate::types::{AttachMode, Direction, MetricFeatures};

/// Entry point name of the pivot program in every compiled pivot object
/// (`templates/pivot.c`). Always `handler`, same as a probe's own entry
/// point within its own, separately compiled object — the two never share a
/// `Bpf` instance, so the name collision is harmless.
const PIVOT_PROGRAM_NAME: &str = "handler";

/// Entry point name of the tail-call-reachable function in every compiled
/// probe object (`templates/wrapper.c`).
const PROBE_PROGRAM_NAME: &str = "internal_handler";

/// Parameters an external collaborator supplies to `compile_hook`.
pub struct CompileRequest {
    pub direction: Direction,
    pub source: String,
    pub interface: String,
    pub mode: AttachMode,
    pub cflags: Vec<String>,
    pub debug: bool,
    pub plugin_id: u16,
    pub probe_id: u16,
    pub log_level: u32,
}

/// Identifies one (interface, direction, mode) hook's runtime state: its
/// pivot attachment and chain dispatch map. Distinct from
/// `crate::chain::HookSlot`, which tracks only the slot-id bookkeeping and
/// knows nothing about `aya`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HookKey {
    ifindex: u32,
    direction: Direction,
    is_tc: bool,
}

/// Everything the controller needs to mutate a live hook: the pivot's own
/// `Bpf` (kept alive so its XDP/TC attachment is not dropped), the chain
/// dispatch map, and the currently loaded program for each occupied slot.
struct HookRuntime {
    #[allow(dead_code)]
    pivot: Program,
    dispatch_map: DispatchMap,
    slots: HashMap<u32, SlotProgram>,
}

/// Locking order is always facade → interface registry → hook slot; no
/// code path in this module acquires them in the other order. `hook_runtimes`
/// is a sibling lock, never held across a call that also locks `interfaces`.
pub struct Controller {
    config: Config,
    epoch: Epoch,
    netlink: Handle,
    interfaces: Mutex<InterfaceRegistry>,
    probes: Arc<ProbeRegistry>,
    dispatch_stats: Arc<DispatchStats>,
    shutdown_token: CancellationToken,
    shut_down: AtomicBool,
    toolchain: Box<dyn Toolchain + Send + Sync>,
    xdp_attacher: Box<dyn HookAttacher>,
    tc_attacher: Box<dyn HookAttacher>,
    hook_runtimes: Mutex<HashMap<HookKey, HookRuntime>>,
    /// Monotonically increasing, never-reused wire identity handed out to
    /// each compiled program. Deliberately independent of chain slot ids,
    /// which the free-list in `crate::chain` does reuse — see
    /// `compiler::assemble_cflags`'s doc comment.
    next_program_id: AtomicU64,
    /// Which directions a `(plugin_id, probe_id)` pair currently has a live
    /// hook registered for, so `remove_hook`/`patch_hook` can distinguish
    /// "never registered" (`ProbeNotFound`) from "registered, but not for
    /// this direction" (`HookDisabled`).
    registered_directions: Mutex<HashMap<(u16, u16), HashSet<Direction>>>,
}

impl Controller {
    /// Creates the sentinel interface (failing with `AlreadyRunning` if one
    /// already exists), compiles the startup perf maps, and spawns the
    /// Event Dispatcher. Idempotent in the sense that a second call from a
    /// different process fails cleanly rather than corrupting the first
    /// controller's state; a second call within the *same* process is not
    /// supported — callers hold one `Controller` for the process lifetime.
    pub async fn init(config: Config) -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(DeChainyError::Io)?;
        tokio::spawn(connection);

        sentinel::create_sentinel(&handle).await?;

        let epoch = Epoch(read_epoch_base());

        let startup_source = rewriter::remove_c_comments(templates::STARTUP_C);
        let mut bpf = BpfLoader::new()
            .load(
                &ClangToolchain::default()
                    .compile(&startup_source, &["-DMAX_PROGRAMS_PER_HOOK=32".to_string()])?,
            )
            .map_err(DeChainyError::Bpf)?;

        let log_buffer = aya::maps::perf::AsyncPerfEventArray::try_from(
            bpf.take_map("log_buffer")
                .ok_or_else(|| DeChainyError::Error("log_buffer map missing".into()))?,
        )?;
        let control_plane = aya::maps::perf::AsyncPerfEventArray::try_from(
            bpf.take_map("control_plane")
                .ok_or_else(|| DeChainyError::Error("control_plane map missing".into()))?,
        )?;

        let probes = Arc::new(ProbeRegistry::new());
        let dispatch_stats = Arc::new(DispatchStats::default());
        let shutdown_token = CancellationToken::new();

        tokio::spawn(events::run_dispatcher(
            log_buffer,
            control_plane,
            probes.clone(),
            dispatch_stats.clone(),
            shutdown_token.clone(),
        ));

        Ok(Controller {
            config,
            epoch,
            netlink: handle,
            interfaces: Mutex::new(InterfaceRegistry::new()),
            probes,
            dispatch_stats,
            shutdown_token,
            shut_down: AtomicBool::new(false),
            toolchain: Box::new(ClangToolchain::default()),
            xdp_attacher: Box::new(XdpAttacher),
            tc_attacher: Box::new(TcAttacher::default()),
            hook_runtimes: Mutex::new(HashMap::new()),
            next_program_id: AtomicU64::new(1),
            registered_directions: Mutex::new(HashMap::new()),
        })
    }

    /// Compiles and attaches a new probe, returning the opaque
    /// `(plugin_id, probe_id)` handle the caller uses for removal/patching.
    /// On any failure, no dispatch-map entry is left dangling and the slot
    /// id (if one was allocated) is returned to the free-list.
    pub fn compile_hook(&self, req: CompileRequest, probe: Box<dyn Probe>) -> Result<u32> {
        if req.source.trim().is_empty() {
            return Err(DeChainyError::NoCodeProbe {
                plugin_id: req.plugin_id,
                probe_id: req.probe_id,
            });
        }

        let ifindex = crate::netlink::get_ifindex(&req.interface)?;

        let mut interfaces = self.interfaces.lock().expect("lock poisoned");
        let holder = interfaces.get_or_create(ifindex);

        if req.direction == Direction::Ingress {
            if let Some(existing_mode) = holder.xdp_mode_locked {
                if existing_mode != req.mode && !req.mode.is_tc() {
                    return Err(DeChainyError::IncompatibleXdpFlags(req.interface.clone()));
                }
            } else if !req.mode.is_tc() {
                holder.xdp_mode_locked = Some(req.mode);
            }
        }

        let hook = hook_slot_mut(holder, req.direction, req.mode);

        let plan = hook
            .plan_insert(req.plugin_id, req.probe_id)
            .map_err(|_| DeChainyError::HookFull(crate::chain::MAX_PROGRAMS_PER_HOOK))?;

        let map_suffix = if req.mode.is_tc() { "tc" } else { "xdp" };
        let rewritten = match self.rewrite_source(&req, map_suffix, plan.new_slot_id) {
            Ok(r) => r,
            Err(e) => {
                self.undo_failed_insert(hook);
                return Err(e);
            }
        };

        let program_id = self.next_program_id.fetch_add(1, Ordering::Relaxed) as u16;
        let cflags = assemble_cflags(
            req.mode,
            self.epoch,
            program_id,
            plan.new_slot_id,
            req.plugin_id,
            req.probe_id,
            req.direction == Direction::Ingress,
            req.log_level,
            &req.cflags,
        );

        let mut slot_program = match self.build_slot_program(
            &rewritten,
            &cflags,
            ProgramKind::Probe,
            plan.new_slot_id,
            req.plugin_id,
            req.probe_id,
        ) {
            Ok(p) => p,
            Err(e) => {
                self.undo_failed_insert(hook);
                return Err(e);
            }
        };

        let fd = match slot_program.fd() {
            Some(fd) => fd,
            None => {
                self.undo_failed_insert(hook);
                return Err(DeChainyError::Error(
                    "compiled probe program produced no usable fd".into(),
                ));
            }
        };

        let key = HookKey {
            ifindex,
            direction: req.direction,
            is_tc: req.mode.is_tc(),
        };

        if plan.needs_pivot {
            if let Err(e) = self.load_and_attach_pivot(
                key,
                ifindex,
                &req.interface,
                req.direction,
                req.mode,
                map_suffix,
            ) {
                self.undo_failed_insert(hook);
                return Err(e);
            }
        }

        {
            let mut runtimes = self.hook_runtimes.lock().expect("lock poisoned");
            let runtime = runtimes
                .get_mut(&key)
                .ok_or_else(|| DeChainyError::Error("hook runtime missing after pivot setup".into()))?;
            runtime.dispatch_map.set(plan.predecessor_slot_id, fd)?;
            runtime.slots.insert(plan.new_slot_id, slot_program);
        }

        self.probes.register(req.plugin_id, req.probe_id, program_id, probe);
        self.registered_directions
            .lock()
            .expect("lock poisoned")
            .entry((req.plugin_id, req.probe_id))
            .or_default()
            .insert(req.direction);

        log::info!(
            "compiled probe plugin_id={} probe_id={} into slot {} (predecessor slot {})",
            req.plugin_id,
            req.probe_id,
            plan.new_slot_id,
            plan.predecessor_slot_id
        );

        Ok(plan.new_slot_id)
    }

    /// Compiles the pivot program for a brand-new hook, loads it, attaches
    /// it to the kernel through the appropriate `HookAttacher`, and stores
    /// its dispatch map and `Bpf` under `key` in `hook_runtimes`.
    fn load_and_attach_pivot(
        &self,
        key: HookKey,
        ifindex: u32,
        iface: &str,
        direction: Direction,
        mode: AttachMode,
        map_suffix: &str,
    ) -> Result<()> {
        let direction_str = direction.as_str();
        let pivot_source = rewriter::format_for_hook(
            direction_str,
            map_suffix,
            &rewriter::remove_c_comments(templates::PIVOT_C),
        );
        let cflags = assemble_cflags(
            mode,
            self.epoch,
            0,
            0,
            0,
            0,
            direction == Direction::Ingress,
            self.config.log_level,
            &[],
        );
        let bytecode = self.toolchain.compile(&pivot_source, &cflags)?;
        let mut bpf: Bpf = BpfLoader::new().load(&bytecode).map_err(DeChainyError::Bpf)?;

        let attacher = self.attacher_for(mode);
        attacher.attach_pivot(&mut bpf, PIVOT_PROGRAM_NAME, iface, ifindex, direction, mode)?;

        let map_name = format!("{direction_str}_next_{map_suffix}");
        let prog_array = ProgramArray::try_from(
            bpf.take_map(&map_name)
                .ok_or_else(|| DeChainyError::Error(format!("{map_name} map missing from pivot object")))?,
        )?;
        let dispatch_map = DispatchMap::new(prog_array);

        let pivot = Program::new(
            ProgramKind::Pivot,
            0,
            0,
            0,
            HashMap::new(),
            bpf,
            PIVOT_PROGRAM_NAME.to_string(),
        );

        self.hook_runtimes.lock().expect("lock poisoned").insert(
            key,
            HookRuntime {
                pivot,
                dispatch_map,
                slots: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Compiles (and, if the probe declared a `SWAP` map, double-compiles)
    /// `rewritten` into a loaded, not-yet-attached `SlotProgram`. Shared by
    /// `compile_hook` and `patch_hook`.
    fn build_slot_program(
        &self,
        rewritten: &RewrittenSource,
        cflags: &[String],
        kind: ProgramKind,
        slot_id: u32,
        plugin_id: u16,
        probe_id: u16,
    ) -> Result<SlotProgram> {
        let primary = self.load_program(&rewritten.original, cflags, kind, slot_id, plugin_id, probe_id, &rewritten.features)?;

        if let Some(swap_source) = &rewritten.swap {
            let secondary = self.load_program(swap_source, cflags, kind, slot_id, plugin_id, probe_id, &rewritten.features)?;
            Ok(SlotProgram::Swapped(SwapPair::new(primary, secondary)))
        } else {
            Ok(SlotProgram::Single(primary))
        }
    }

    fn load_program(
        &self,
        source: &str,
        cflags: &[String],
        kind: ProgramKind,
        slot_id: u32,
        plugin_id: u16,
        probe_id: u16,
        features: &HashMap<String, MetricFeatures>,
    ) -> Result<Program> {
        let bytecode = self.toolchain.compile(source, cflags)?;
        let bpf = BpfLoader::new().load(&bytecode).map_err(DeChainyError::Bpf)?;
        Ok(Program::new(
            kind,
            slot_id,
            plugin_id,
            probe_id,
            features.clone(),
            bpf,
            PROBE_PROGRAM_NAME.to_string(),
        ))
    }

    fn attacher_for(&self, mode: AttachMode) -> &dyn HookAttacher {
        if mode.is_tc() {
            self.tc_attacher.as_ref()
        } else {
            self.xdp_attacher.as_ref()
        }
    }

    fn rewrite_source(
        &self,
        req: &CompileRequest,
        map_suffix: &str,
        _slot_id: u32,
    ) -> Result<RewrittenSource> {
        let no_comments = rewriter::remove_c_comments(&req.source);
        let direction_str = req.direction.as_str();
        let formatted = rewriter::format_for_hook(direction_str, map_suffix, &no_comments);
        let registry_ifindex = self.netlink_ifindex_resolver();
        let redirected = rewriter::resolve_redirects(&formatted, registry_ifindex)?;
        let logged = rewriter::expand_dp_log(&redirected);
        let with_header = format!(
            "{}\n{}\n{}",
            templates::HELPERS_H,
            templates::WRAPPER_C,
            logged
        );
        let (original, swap, features) = rewriter::extract_map_attributes(&with_header);
        Ok(RewrittenSource {
            original,
            swap,
            features,
        })
    }

    fn netlink_ifindex_resolver(&self) -> impl Fn(&str) -> Option<u32> + '_ {
        |name: &str| crate::netlink::get_ifindex(name).ok()
    }

    fn undo_failed_insert(&self, hook: &mut HookSlot) {
        // The bookkeeping plan already consumed a free slot id; since the
        // compile failed before anything was attached, the cleanest
        // correction is to run the removal plan for the entry we just
        // speculatively inserted.
        let last = hook.entries().last().copied();
        if let Some(entry) = last {
            let _ = hook.plan_remove(entry.plugin_id, entry.probe_id);
        }
    }

    /// Returns `Ok(())` if `(plugin_id, probe_id)` has a live hook for
    /// `direction`; `HookDisabled` if it has a live hook but not for this
    /// direction; `ProbeNotFound` if it has none at all.
    fn ensure_direction_registered(&self, plugin_id: u16, probe_id: u16, direction: Direction) -> Result<()> {
        let registered = self.registered_directions.lock().expect("lock poisoned");
        match registered.get(&(plugin_id, probe_id)) {
            Some(dirs) if dirs.contains(&direction) => Ok(()),
            Some(_) => Err(DeChainyError::HookDisabled {
                plugin_id,
                probe_id,
                direction,
            }),
            None => Err(DeChainyError::ProbeNotFound { plugin_id, probe_id }),
        }
    }

    /// Removes a probe, rewriting or clearing dispatch-map entries per the
    /// plan returned by [`crate::chain::HookSlot::plan_remove`], and
    /// detaching the hook entirely if it was the last probe.
    pub fn remove_hook(
        &self,
        direction: Direction,
        interface: &str,
        mode: AttachMode,
        plugin_id: u16,
        probe_id: u16,
    ) -> Result<()> {
        self.ensure_direction_registered(plugin_id, probe_id, direction)?;

        let ifindex = crate::netlink::get_ifindex(interface)?;
        let mut interfaces = self.interfaces.lock().expect("lock poisoned");
        let holder = interfaces
            .get_mut(ifindex)
            .ok_or_else(|| DeChainyError::UnknownInterface(interface.to_string()))?;

        let hook = hook_slot_mut(holder, direction, mode);

        let plan = hook
            .plan_remove(plugin_id, probe_id)
            .map_err(|_| DeChainyError::ProbeNotFound { plugin_id, probe_id })?;

        let key = HookKey {
            ifindex,
            direction,
            is_tc: mode.is_tc(),
        };

        match &plan {
            RemovePlan::HookEmptied { .. } => {
                log::info!("hook emptied on {interface}, detaching");
                self.hook_runtimes.lock().expect("lock poisoned").remove(&key);

                let qdisc_still_in_use =
                    mode.is_tc() && !hook_slot_mut(holder, direction.opposite(), mode).is_empty();
                self.attacher_for(mode)
                    .detach_pivot(ifindex, direction, mode, qdisc_still_in_use)?;
            }
            RemovePlan::Rewired {
                predecessor_slot_id,
                successor_slot_id,
                removed_slot_id,
            } => {
                log::info!(
                    "rewiring dispatch map: slot {predecessor_slot_id} now points to slot {successor_slot_id}"
                );
                let mut runtimes = self.hook_runtimes.lock().expect("lock poisoned");
                if let Some(runtime) = runtimes.get_mut(&key) {
                    let successor_fd = runtime
                        .slots
                        .get_mut(successor_slot_id)
                        .and_then(SlotProgram::fd)
                        .ok_or_else(|| DeChainyError::Error("successor slot has no loaded program".into()))?;
                    runtime.dispatch_map.set(*predecessor_slot_id, successor_fd)?;
                    runtime.dispatch_map.clear(*removed_slot_id)?;
                    runtime.slots.remove(removed_slot_id);
                }
            }
            RemovePlan::Truncated {
                predecessor_slot_id,
                removed_slot_id,
            } => {
                log::info!("truncating chain at predecessor slot {predecessor_slot_id}");
                let mut runtimes = self.hook_runtimes.lock().expect("lock poisoned");
                if let Some(runtime) = runtimes.get_mut(&key) {
                    runtime.dispatch_map.clear(*predecessor_slot_id)?;
                    runtime.slots.remove(removed_slot_id);
                }
            }
        }

        self.probes.unregister(plugin_id, probe_id);
        interfaces.remove_if_empty(ifindex);

        let mut registered = self.registered_directions.lock().expect("lock poisoned");
        if let Some(dirs) = registered.get_mut(&(plugin_id, probe_id)) {
            dirs.remove(&direction);
            if dirs.is_empty() {
                registered.remove(&(plugin_id, probe_id));
            }
        }
        Ok(())
    }

    /// Atomically replaces the compiled code at an existing slot: compiles
    /// the new source first, and only swaps the dispatch-map entry over to
    /// it once compilation and load succeed, so a bad patch leaves the old
    /// program running and attached.
    pub fn patch_hook(
        &self,
        direction: Direction,
        interface: &str,
        mode: AttachMode,
        plugin_id: u16,
        probe_id: u16,
        new_source: String,
        new_cflags: Vec<String>,
    ) -> Result<()> {
        self.ensure_direction_registered(plugin_id, probe_id, direction)?;

        if new_source.trim().is_empty() {
            return Err(DeChainyError::NoCodeProbe { plugin_id, probe_id });
        }

        let ifindex = crate::netlink::get_ifindex(interface)?;

        let (slot_id, predecessor_slot_id) = {
            let mut interfaces = self.interfaces.lock().expect("lock poisoned");
            let holder = interfaces
                .get_mut(ifindex)
                .ok_or_else(|| DeChainyError::UnknownInterface(interface.to_string()))?;
            let hook = hook_slot_mut(holder, direction, mode);
            let pos = hook
                .entries()
                .iter()
                .position(|e| !e.is_pivot && e.plugin_id == plugin_id && e.probe_id == probe_id)
                .ok_or(DeChainyError::ProbeNotFound { plugin_id, probe_id })?;
            let slot_id = hook.entries()[pos].slot_id;
            let predecessor_slot_id = hook.entries()[pos - 1].slot_id;
            (slot_id, predecessor_slot_id)
        };

        let req = CompileRequest {
            direction,
            source: new_source,
            interface: interface.to_string(),
            mode,
            cflags: new_cflags,
            debug: false,
            plugin_id,
            probe_id,
            log_level: self.config.log_level,
        };
        let map_suffix = if mode.is_tc() { "tc" } else { "xdp" };
        let rewritten = self.rewrite_source(&req, map_suffix, slot_id)?;

        let program_id = self.next_program_id.fetch_add(1, Ordering::Relaxed) as u16;
        let cflags = assemble_cflags(
            mode,
            self.epoch,
            program_id,
            slot_id,
            plugin_id,
            probe_id,
            direction == Direction::Ingress,
            req.log_level,
            &req.cflags,
        );

        let mut slot_program =
            self.build_slot_program(&rewritten, &cflags, ProgramKind::Probe, slot_id, plugin_id, probe_id)?;
        let fd = slot_program
            .fd()
            .ok_or_else(|| DeChainyError::Error("patched program produced no usable fd".into()))?;

        let key = HookKey {
            ifindex,
            direction,
            is_tc: mode.is_tc(),
        };
        {
            let mut runtimes = self.hook_runtimes.lock().expect("lock poisoned");
            let runtime = runtimes
                .get_mut(&key)
                .ok_or_else(|| DeChainyError::Error("hook runtime missing for patch".into()))?;
            runtime.dispatch_map.set(predecessor_slot_id, fd)?;
            // Dropping the old entry here detaches/closes its program only
            // after the new one is fully wired in.
            runtime.slots.insert(slot_id, slot_program);
        }

        self.probes.rebind_program_id(plugin_id, probe_id, program_id);
        log::info!("patched probe plugin_id={plugin_id} probe_id={probe_id} at slot {slot_id}");
        Ok(())
    }

    /// Idempotent shutdown: cancels the Event Dispatcher and removes the
    /// sentinel interface. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_token.cancel();
        sentinel::remove_sentinel(&self.netlink).await?;
        Ok(())
    }

    pub fn dropped_record_count(&self) -> u64 {
        self.dispatch_stats.dropped.load(Ordering::Relaxed)
    }
}

fn hook_slot_mut(
    holder: &mut crate::chain::InterfaceHolder,
    direction: Direction,
    mode: AttachMode,
) -> &mut HookSlot {
    match (direction, mode.is_tc()) {
        (Direction::Ingress, true) => &mut holder.ingress_tc,
        (Direction::Ingress, false) => &mut holder.ingress_xdp,
        (Direction::Egress, true) => &mut holder.egress_tc,
        (Direction::Egress, false) => &mut holder.egress_xdp,
    }
}

struct RewrittenSource {
    original: String,
    swap: Option<String>,
    features: HashMap<String, MetricFeatures>,
}

/// Computes `wall_clock_ns - monotonic_ns` at controller startup, the same
/// epoch base the original computed once at class-load time
/// (`dechainy/ebpf.py`'s `__EPOCH_BASE`) so probes can recover a wall-clock
/// timestamp from `bpf_ktime_get_ns()` (monotonic) without a helper call on
/// every packet: `wall_ns_at_event = bpf_ktime_get_ns() + EPOCH_BASE`.
fn read_epoch_base() -> u64 {
    let wall_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0);
    let monotonic_ns = std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| s.split_whitespace().next().map(str::to_string))
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| (secs * 1_000_000_000.0) as i128)
        .unwrap_or(0);
    (wall_ns - monotonic_ns) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_base_is_positive_and_close_to_wall_clock() {
        let epoch = read_epoch_base();
        let wall_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs();
        // EPOCH_BASE is wall_ns - monotonic_ns; since the monotonic clock
        // started at boot (long before this test process), the base should
        // sit well below current wall-clock nanoseconds but still positive
        // on any host that has been up less than its wall-clock age.
        assert!(epoch > 0);
        assert!(epoch < wall_secs * 1_000_000_000);
    }
}
