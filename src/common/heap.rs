//! The GC arena. Every heap-allocated `Object` lives in a `Heap` slot,
//! addressed by a `Handle`. This is the Rust replacement for the C
//! reference's intrusive `GCObject*` linked list (`amex.h`'s `GCObject`
//! header embedded in every `Obj*` struct): instead of raw pointers and a
//! `next` field, the arena itself is the traversal structure, and a
//! freed slot's index is recycled via a free-list.

use crate::common::object::Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

struct Slot {
    object: Option<Object>,
    marked: bool,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
}

impl Heap {
    pub fn new(next_gc: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc,
        }
    }

    /// Inserts a freshly-constructed object and returns its handle. The
    /// caller is responsible for the GC-guard discipline of pushing the
    /// resulting `Value` somewhere reachable before the next allocation
    /// that might trigger a collection.
    pub fn insert(&mut self, object: Object) -> Handle {
        self.bytes_allocated += object.approx_size();
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Slot {
                object: Some(object),
                marked: false,
            };
            Handle(index)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                object: Some(object),
                marked: false,
            });
            Handle(index)
        }
    }

    pub fn get(&self, handle: Handle) -> &Object {
        self.slots[handle.0 as usize]
            .object
            .as_ref()
            .expect("dangling handle: slot was swept")
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut Object {
        self.slots[handle.0 as usize]
            .object
            .as_mut()
            .expect("dangling handle: slot was swept")
    }

    pub fn is_marked(&self, handle: Handle) -> bool {
        self.slots[handle.0 as usize].marked
    }

    pub fn mark(&mut self, handle: Handle) -> bool {
        let slot = &mut self.slots[handle.0 as usize];
        if slot.marked {
            false
        } else {
            slot.marked = true;
            true
        }
    }

    pub fn unmark_all(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }

    /// Frees every unmarked live slot, returning the handles that were
    /// collected so callers (e.g. the string-intern table) can drop their
    /// own references to them.
    pub fn sweep(&mut self) -> Vec<Handle> {
        let mut collected = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_some() && !slot.marked {
                if let Some(obj) = slot.object.take() {
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(obj.approx_size());
                }
                collected.push(Handle(index as u32));
            }
        }
        for handle in &collected {
            self.free.push(handle.0);
        }
        collected
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
