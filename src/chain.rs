//! Pivot/Chain Manager: per-hook slot bookkeeping (free-list allocation,
//! dispatch-map wiring on insert/remove) and the Interface Registry that
//! groups the four hook slots (ingress/egress × xdp/tc) per interface.
//!
//! This module is deliberately kernel-agnostic: it tracks chain slot ids and
//! tells the caller which dispatch-map keys to write or clear and with which
//! neighboring slot's fd, but it never touches `aya` itself. That keeps the
//! free-list/predecessor-rewrite arithmetic — the trickiest part of this
//! subsystem — testable without root or a live kernel.

use std::collections::{HashMap, VecDeque};

pub const MAX_PROGRAMS_PER_HOOK: u32 = 32;

/// One entry in a hook slot's program list. Index 0 is always the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub slot_id: u32,
    pub plugin_id: u16,
    pub probe_id: u16,
    pub is_pivot: bool,
}

/// Instructions for the caller to apply to the real tail-call dispatch map
/// and the newly compiled program's own bookkeeping. `slot_id` on the new
/// entry is always pre-populated; the caller still has to compile/attach
/// the program before it can learn its fd.
pub struct InsertPlan {
    pub new_slot_id: u32,
    /// Dispatch-map key whose value must become the new program's fd.
    pub predecessor_slot_id: u32,
    pub needs_pivot: bool,
}

/// What happened to the dispatch map as a result of a removal.
pub enum RemovePlan {
    /// The hook slot is now fully empty (pivot removed along with the last
    /// probe); the caller should detach the hook entirely.
    HookEmptied { removed_slot_id: u32 },
    /// More than one probe remained. `predecessor_slot_id`'s dispatch-map
    /// entry must be rewritten to `successor_fd` (supplied by the caller,
    /// the successor program's own fd), and `removed_slot_id`'s own entry
    /// must be cleared.
    Rewired {
        predecessor_slot_id: u32,
        successor_slot_id: u32,
        removed_slot_id: u32,
    },
    /// The removed probe was the last one in the chain: no successor to
    /// rewrite toward, just clear the predecessor's entry so the chain
    /// terminates there.
    Truncated {
        predecessor_slot_id: u32,
        removed_slot_id: u32,
    },
}

#[derive(Debug)]
pub enum ChainError {
    HookFull,
    NotFound,
}

/// The program list and free-list for one (interface, direction, mode)
/// hook. Mirrors the original's `HookTypeHolder`.
pub struct HookSlot {
    entries: Vec<SlotEntry>,
    free_ids: VecDeque<u32>,
}

impl Default for HookSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl HookSlot {
    pub fn new() -> Self {
        HookSlot {
            entries: Vec::new(),
            free_ids: (1..MAX_PROGRAMS_PER_HOOK).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    /// Plans the insertion of a new probe. If this is the hook's first
    /// probe, `needs_pivot` tells the caller to compile and attach the
    /// pivot program at slot 0 before the probe itself.
    pub fn plan_insert(
        &mut self,
        plugin_id: u16,
        probe_id: u16,
    ) -> Result<InsertPlan, ChainError> {
        let needs_pivot = self.entries.is_empty();
        if needs_pivot {
            self.entries.push(SlotEntry {
                slot_id: 0,
                plugin_id: 0,
                probe_id: 0,
                is_pivot: true,
            });
        }
        let new_slot_id = self.free_ids.pop_front().ok_or(ChainError::HookFull)?;
        let predecessor_slot_id = self.entries.last().expect("pivot always present").slot_id;
        self.entries.push(SlotEntry {
            slot_id: new_slot_id,
            plugin_id,
            probe_id,
            is_pivot: false,
        });
        Ok(InsertPlan {
            new_slot_id,
            predecessor_slot_id,
            needs_pivot,
        })
    }

    /// Plans removal of the probe identified by `(plugin_id, probe_id)`.
    /// Index arithmetic is always over list position, never over raw slot
    /// ids — those are opaque keys, reused after release, not positions.
    pub fn plan_remove(&mut self, plugin_id: u16, probe_id: u16) -> Result<RemovePlan, ChainError> {
        let k = self
            .entries
            .iter()
            .position(|e| !e.is_pivot && e.plugin_id == plugin_id && e.probe_id == probe_id)
            .ok_or(ChainError::NotFound)?;

        let removed = self.entries[k];
        self.free_ids.push_front(removed.slot_id);

        let plan = if self.entries.len() == 2 {
            // Only the pivot and this probe remain: the whole hook empties.
            self.entries.clear();
            RemovePlan::HookEmptied {
                removed_slot_id: removed.slot_id,
            }
        } else if k + 1 != self.entries.len() {
            let predecessor_slot_id = self.entries[k - 1].slot_id;
            let successor_slot_id = self.entries[k + 1].slot_id;
            self.entries.remove(k);
            RemovePlan::Rewired {
                predecessor_slot_id,
                successor_slot_id,
                removed_slot_id: removed.slot_id,
            }
        } else {
            let predecessor_slot_id = self.entries[k - 1].slot_id;
            self.entries.remove(k);
            RemovePlan::Truncated {
                predecessor_slot_id,
                removed_slot_id: removed.slot_id,
            }
        };
        Ok(plan)
    }
}

/// The four hook slots for one interface: ingress/egress × xdp/tc, plus the
/// shared XDP flags / offload device that the first attached probe pins for
/// all subsequent probes on that interface.
pub struct InterfaceHolder {
    pub ifindex: u32,
    pub xdp_mode_locked: Option<crate::types::AttachMode>,
    pub ingress_xdp: HookSlot,
    pub ingress_tc: HookSlot,
    pub egress_xdp: HookSlot,
    pub egress_tc: HookSlot,
}

impl InterfaceHolder {
    pub fn new(ifindex: u32) -> Self {
        InterfaceHolder {
            ifindex,
            xdp_mode_locked: None,
            ingress_xdp: HookSlot::new(),
            ingress_tc: HookSlot::new(),
            egress_xdp: HookSlot::new(),
            egress_tc: HookSlot::new(),
        }
    }

    pub fn is_fully_empty(&self) -> bool {
        self.ingress_xdp.is_empty()
            && self.ingress_tc.is_empty()
            && self.egress_xdp.is_empty()
            && self.egress_tc.is_empty()
    }
}

/// Tracks one `InterfaceHolder` per ifindex that currently has at least one
/// attached probe. Created lazily on first `compile_hook` for an interface,
/// removed when the interface's last hook empties.
#[derive(Default)]
pub struct InterfaceRegistry {
    interfaces: HashMap<u32, InterfaceHolder>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, ifindex: u32) -> &mut InterfaceHolder {
        self.interfaces
            .entry(ifindex)
            .or_insert_with(|| InterfaceHolder::new(ifindex))
    }

    pub fn get(&self, ifindex: u32) -> Option<&InterfaceHolder> {
        self.interfaces.get(&ifindex)
    }

    pub fn get_mut(&mut self, ifindex: u32) -> Option<&mut InterfaceHolder> {
        self.interfaces.get_mut(&ifindex)
    }

    pub fn remove_if_empty(&mut self, ifindex: u32) {
        if self.interfaces.get(&ifindex).is_some_and(InterfaceHolder::is_fully_empty) {
            self.interfaces.remove(&ifindex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_probe_happy_path_matches_scenario_s1() {
        let mut hook = HookSlot::new();
        let plan = hook.plan_insert(1, 1).unwrap();
        assert!(plan.needs_pivot);
        assert_eq!(plan.new_slot_id, 1);
        assert_eq!(plan.predecessor_slot_id, 0);
        assert_eq!(hook.len(), 2);

        match hook.plan_remove(1, 1).unwrap() {
            RemovePlan::HookEmptied { removed_slot_id } => assert_eq!(removed_slot_id, 1),
            _ => panic!("expected hook to empty"),
        }
        assert!(hook.is_empty());
    }

    #[test]
    fn chain_of_three_matches_scenario_s2() {
        let mut hook = HookSlot::new();

        let a = hook.plan_insert(1, 1).unwrap();
        assert_eq!((a.new_slot_id, a.predecessor_slot_id), (1, 0));

        let b = hook.plan_insert(1, 2).unwrap();
        assert_eq!((b.new_slot_id, b.predecessor_slot_id), (2, 1));

        let c = hook.plan_insert(1, 3).unwrap();
        assert_eq!((c.new_slot_id, c.predecessor_slot_id), (3, 2));

        // Remove B (plugin 1, probe 2).
        match hook.plan_remove(1, 2).unwrap() {
            RemovePlan::Rewired {
                predecessor_slot_id,
                successor_slot_id,
                removed_slot_id,
            } => {
                assert_eq!(predecessor_slot_id, 1); // A's slot
                assert_eq!(successor_slot_id, 3); // C's slot
                assert_eq!(removed_slot_id, 2); // B's slot, now cleared
            }
            _ => panic!("expected a rewire"),
        }

        // D reuses the just-freed slot 2, not the next never-used slot (4).
        let d = hook.plan_insert(1, 4).unwrap();
        assert_eq!(d.new_slot_id, 2);
        assert_eq!(d.predecessor_slot_id, 3); // C is still the chain tail
    }

    #[test]
    fn removing_last_probe_truncates_without_successor() {
        let mut hook = HookSlot::new();
        hook.plan_insert(1, 1).unwrap();
        hook.plan_insert(1, 2).unwrap();

        match hook.plan_remove(1, 2).unwrap() {
            RemovePlan::Truncated {
                predecessor_slot_id,
                removed_slot_id,
            } => {
                assert_eq!(predecessor_slot_id, 1);
                assert_eq!(removed_slot_id, 2);
            }
            _ => panic!("expected truncation"),
        }
    }

    #[test]
    fn hook_full_after_max_programs() {
        let mut hook = HookSlot::new();
        for i in 0..(MAX_PROGRAMS_PER_HOOK - 1) {
            hook.plan_insert(1, i as u16).unwrap();
        }
        let err = hook.plan_insert(1, 999).unwrap_err();
        assert!(matches!(err, ChainError::HookFull));
    }

    #[test]
    fn remove_not_found() {
        let mut hook = HookSlot::new();
        hook.plan_insert(1, 1).unwrap();
        assert!(matches!(hook.plan_remove(9, 9), Err(ChainError::NotFound)));
    }
}
