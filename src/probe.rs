//! The `Probe` trait probe authors implement, and the registry that routes
//! decoded perf-buffer records to the right probe by `(plugin_id, probe_id)`.
//!
//! The original implementation indexes into a plain `dict`'s insertion
//! order with `itertools.islice`, which misroutes or panics if a probe is
//! removed while a record naming a later index is in flight. This registry
//! fixes that by tracking the compiled `program_id` a slot is currently
//! bound to: a record decoded from a program that has since been removed or
//! replaced carries a `program_id` that no longer matches the slot's
//! current one, and is dropped rather than misrouted into whatever
//! reoccupies `(plugin_id, probe_id)`. `program_id` is allocated by
//! [`crate::controller::Controller`] from a crate-wide monotonic counter,
//! never reused, which is what makes the comparison meaningful even though
//! `(plugin_id, probe_id)` pairs and dispatch-map slot indices both get
//! reused as hooks are removed and reinstalled.

use std::sync::RwLock;

use crate::events::{LogRecord, PacketRecord};
use crate::types::Metadata;

/// Callbacks a probe author implements. `post_compilation` is optional —
/// most probes have no extra setup to run once their Program is attached.
pub trait Probe: Send + Sync {
    fn log_message(&self, metadata: Metadata, message: &str, cpu: u32);
    fn handle_packet_cp(&self, metadata: Metadata, raw: &[u8], cpu: u32);

    /// Called once, immediately after the probe's Program(s) are compiled
    /// and attached. Default no-op; restored from the original's
    /// `post_compilation` plugin hook for probes that need to stash state
    /// derived from their own compiled maps.
    fn post_compilation(&self) {}
}

struct Slot {
    generation: u64,
    program_id: Option<u16>,
    probe: Option<Box<dyn Probe>>,
}

/// Dense `(plugin_id, probe_id)` routing table with tombstone/generation
/// protection against the concurrent-removal race described above.
#[derive(Default)]
pub struct ProbeRegistry {
    // Outer index: plugin_id: inner index: probe_id.
    plugins: RwLock<Vec<Vec<Slot>>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a probe bound to `program_id`, returning the generation the
    /// caller must keep to later unregister it.
    pub fn register(&self, plugin_id: u16, probe_id: u16, program_id: u16, probe: Box<dyn Probe>) -> u64 {
        let mut plugins = self.plugins.write().expect("lock poisoned");
        let plugin_idx = plugin_id as usize;
        if plugins.len() <= plugin_idx {
            plugins.resize_with(plugin_idx + 1, Vec::new);
        }
        let probes = &mut plugins[plugin_idx];
        let probe_idx = probe_id as usize;
        if probes.len() <= probe_idx {
            probes.resize_with(probe_idx + 1, || Slot {
                generation: 0,
                program_id: None,
                probe: None,
            });
        }
        let slot = &mut probes[probe_idx];
        slot.generation += 1;
        slot.program_id = Some(program_id);
        slot.probe = Some(probe);
        if let Some(p) = slot.probe.as_ref() {
            p.post_compilation();
        }
        slot.generation
    }

    /// Rebinds an already-registered `(plugin_id, probe_id)` slot to a newly
    /// compiled `program_id` without touching the probe callbacks or
    /// bumping the generation — used by `patch_hook`'s code-swap, which
    /// keeps the same probe object but replaces the compiled program behind
    /// it.
    pub fn rebind_program_id(&self, plugin_id: u16, probe_id: u16, program_id: u16) {
        let mut plugins = self.plugins.write().expect("lock poisoned");
        if let Some(slot) = plugins
            .get_mut(plugin_id as usize)
            .and_then(|probes| probes.get_mut(probe_id as usize))
        {
            slot.program_id = Some(program_id);
        }
    }

    /// Removes the probe at `(plugin_id, probe_id)`, bumping its generation
    /// so any record still in flight for the old occupant is dropped
    /// instead of routed to whatever reoccupies the slot.
    pub fn unregister(&self, plugin_id: u16, probe_id: u16) {
        let mut plugins = self.plugins.write().expect("lock poisoned");
        if let Some(probes) = plugins.get_mut(plugin_id as usize) {
            if let Some(slot) = probes.get_mut(probe_id as usize) {
                slot.generation += 1;
                slot.program_id = None;
                slot.probe = None;
            }
        }
    }

    pub fn dispatch_log(&self, record: LogRecord) {
        let plugins = self.plugins.read().expect("lock poisoned");
        match plugins
            .get(record.metadata.plugin_id as usize)
            .and_then(|probes| probes.get(record.metadata.probe_id as usize))
        {
            Some(slot) if slot.program_id == Some(record.metadata.program_id) => {
                if let Some(probe) = slot.probe.as_ref() {
                    probe.log_message(record.metadata, &record.message, record.cpu);
                }
            }
            _ => {
                log::debug!(
                    "dropping log record for plugin_id={} probe_id={} program_id={}: slot unoccupied or reoccupied",
                    record.metadata.plugin_id,
                    record.metadata.probe_id,
                    record.metadata.program_id
                );
            }
        }
    }

    pub fn dispatch_packet(&self, record: PacketRecord) {
        let plugins = self.plugins.read().expect("lock poisoned");
        match plugins
            .get(record.metadata.plugin_id as usize)
            .and_then(|probes| probes.get(record.metadata.probe_id as usize))
        {
            Some(slot) if slot.program_id == Some(record.metadata.program_id) => {
                if let Some(probe) = slot.probe.as_ref() {
                    probe.handle_packet_cp(record.metadata, &record.raw, record.cpu);
                }
            }
            _ => {
                log::debug!(
                    "dropping packet record for plugin_id={} probe_id={} program_id={}: slot unoccupied or reoccupied",
                    record.metadata.plugin_id,
                    record.metadata.probe_id,
                    record.metadata.program_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingProbe(Arc<AtomicU32>);

    impl Probe for CountingProbe {
        fn log_message(&self, _metadata: Metadata, _message: &str, _cpu: u32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn handle_packet_cp(&self, _metadata: Metadata, _raw: &[u8], _cpu: u32) {}
    }

    fn md(plugin_id: u16, probe_id: u16, program_id: u16) -> Metadata {
        Metadata {
            ifindex: 1,
            length: 0,
            ingress: 1,
            xdp: 0,
            program_id,
            plugin_id,
            probe_id,
        }
    }

    #[test]
    fn routes_to_registered_probe() {
        let registry = ProbeRegistry::new();
        let count = Arc::new(AtomicU32::new(0));
        registry.register(0, 0, 1, Box::new(CountingProbe(count.clone())));

        registry.dispatch_log(LogRecord {
            metadata: md(0, 0, 1),
            level: 1,
            args: [0; 4],
            message: "hi".to_string(),
            cpu: 0,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_record_after_unregister_is_dropped_not_misrouted() {
        let registry = ProbeRegistry::new();
        let count = Arc::new(AtomicU32::new(0));
        registry.register(0, 0, 1, Box::new(CountingProbe(count.clone())));
        registry.unregister(0, 0);

        registry.dispatch_log(LogRecord {
            metadata: md(0, 0, 1),
            level: 1,
            args: [0; 4],
            message: "late".to_string(),
            cpu: 0,
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_record_for_reoccupied_slot_is_dropped_not_misrouted_to_new_occupant() {
        let registry = ProbeRegistry::new();
        let first_count = Arc::new(AtomicU32::new(0));
        let second_count = Arc::new(AtomicU32::new(0));

        // First probe compiled with program_id=1, then removed.
        registry.register(0, 0, 1, Box::new(CountingProbe(first_count.clone())));
        registry.unregister(0, 0);

        // Slot (0, 0) is reoccupied by a different compiled program.
        registry.register(0, 0, 2, Box::new(CountingProbe(second_count.clone())));

        // A record decoded from the perf buffer after the old program's fd
        // was closed, but still carrying the old program_id, must not reach
        // the new occupant.
        registry.dispatch_log(LogRecord {
            metadata: md(0, 0, 1),
            level: 1,
            args: [0; 4],
            message: "stale".to_string(),
            cpu: 0,
        });
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);

        // A record carrying the current program_id reaches the new occupant.
        registry.dispatch_log(LogRecord {
            metadata: md(0, 0, 2),
            level: 1,
            args: [0; 4],
            message: "current".to_string(),
            cpu: 0,
        });
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }
}
