//! Arena of watched elements. Handles carry a generation so a handle that
//! outlives its element (node removed, membership reset) is detectably stale.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::{ElementKind, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedElement {
    pub node: NodeId,
    pub kind: ElementKind,
    pub processed: bool,
    /// Set while waiting for a lazy-loaded source to appear.
    pub awaiting_source_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<WatchedElement>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_node: HashMap<NodeId, u32>,
    /// Nodes of the current document that have been handed to the
    /// classifier. Survives `clear_membership`, not `forget_page`.
    submitted: HashSet<NodeId>,
}

impl Arena {
    fn slot(&self, handle: ElementHandle) -> Option<&WatchedElement> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn slot_mut(&mut self, handle: ElementHandle) -> Option<&mut WatchedElement> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn handle_at(&self, index: u32) -> ElementHandle {
        ElementHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn vacate(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }
}

#[derive(Debug, Default)]
pub struct ElementRegistry {
    arena: Mutex<Arena>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `node` unless it is already a member or was ever submitted.
    pub fn admit(
        &self,
        node: NodeId,
        kind: ElementKind,
        awaiting_source_until: Option<Instant>,
    ) -> Option<ElementHandle> {
        let mut arena = self.arena.lock();
        if arena.by_node.contains_key(&node) || arena.submitted.contains(&node) {
            return None;
        }
        let entry = WatchedElement {
            node,
            kind,
            processed: false,
            awaiting_source_until,
        };
        let index = match arena.free.pop() {
            Some(index) => {
                arena.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                arena.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (arena.slots.len() - 1) as u32
            }
        };
        arena.by_node.insert(node, index);
        Some(arena.handle_at(index))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        let arena = self.arena.lock();
        arena.by_node.contains_key(&node) || arena.submitted.contains(&node)
    }

    pub fn handle_of(&self, node: NodeId) -> Option<ElementHandle> {
        let arena = self.arena.lock();
        arena.by_node.get(&node).map(|index| arena.handle_at(*index))
    }

    pub fn get(&self, handle: ElementHandle) -> Option<WatchedElement> {
        self.arena.lock().slot(handle).cloned()
    }

    pub fn is_live(&self, handle: ElementHandle) -> bool {
        self.arena.lock().slot(handle).is_some()
    }

    /// Forgets a node that left the document. Outstanding handles go stale.
    pub fn release(&self, node: NodeId) -> bool {
        let mut arena = self.arena.lock();
        match arena.by_node.remove(&node) {
            Some(index) => {
                arena.vacate(index);
                true
            }
            None => false,
        }
    }

    /// Marks the element processed and returns its node, at most once per
    /// physical node for the lifetime of the registry.
    pub fn claim(&self, handle: ElementHandle) -> Option<NodeId> {
        let mut arena = self.arena.lock();
        let node = {
            let entry = arena.slot_mut(handle)?;
            if entry.processed {
                return None;
            }
            entry.processed = true;
            entry.node
        };
        arena.submitted.insert(node).then_some(node)
    }

    /// Ends the lazy-source wait for `node` if it is still pending.
    pub fn resolve_awaiting(&self, node: NodeId, now: Instant) -> Option<ElementHandle> {
        let mut arena = self.arena.lock();
        let index = *arena.by_node.get(&node)?;
        let handle = arena.handle_at(index);
        let entry = arena.slot_mut(handle)?;
        match entry.awaiting_source_until {
            Some(deadline) if deadline > now && !entry.processed => {
                entry.awaiting_source_until = None;
                Some(handle)
            }
            _ => None,
        }
    }

    pub fn is_awaiting_source(&self, node: NodeId) -> bool {
        let arena = self.arena.lock();
        arena
            .by_node
            .get(&node)
            .and_then(|index| arena.slots[*index as usize].entry.as_ref())
            .is_some_and(|entry| entry.awaiting_source_until.is_some())
    }

    /// Stops the lazy-source wait of every entry whose deadline has passed.
    pub fn expire_awaiting(&self, now: Instant) -> Vec<NodeId> {
        let mut arena = self.arena.lock();
        let mut expired = Vec::new();
        for slot in arena.slots.iter_mut() {
            if let Some(entry) = slot.entry.as_mut() {
                if entry.awaiting_source_until.is_some_and(|deadline| deadline <= now) {
                    entry.awaiting_source_until = None;
                    expired.push(entry.node);
                }
            }
        }
        expired
    }

    pub fn next_awaiting_deadline(&self) -> Option<Instant> {
        self.arena
            .lock()
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter_map(|entry| entry.awaiting_source_until)
            .min()
    }

    /// Drops all membership. Submitted nodes stay remembered.
    pub fn clear_membership(&self) {
        let mut arena = self.arena.lock();
        let occupied: Vec<u32> = arena.by_node.drain().map(|(_, index)| index).collect();
        for index in occupied {
            arena.vacate(index);
        }
    }

    /// Forgets membership and submission history. Node ids are only unique
    /// within one document, so this runs on every navigation.
    pub fn forget_page(&self) -> usize {
        self.clear_membership();
        let mut arena = self.arena.lock();
        let forgotten = arena.submitted.len();
        arena.submitted.clear();
        forgotten
    }

    /// Current members with their kind.
    pub fn members(&self) -> Vec<(NodeId, ElementKind)> {
        let arena = self.arena.lock();
        arena
            .by_node
            .iter()
            .filter_map(|(node, index)| {
                let entry = arena.slots[*index as usize].entry.as_ref()?;
                Some((*node, entry.kind))
            })
            .collect()
    }

    /// Records a submission that did not go through `claim`, e.g. a video
    /// whose handle went stale while it was being sampled.
    pub fn mark_submitted(&self, node: NodeId) -> bool {
        self.arena.lock().submitted.insert(node)
    }

    pub fn was_submitted(&self, node: NodeId) -> bool {
        self.arena.lock().submitted.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.arena.lock().by_node.len()
    }
}
