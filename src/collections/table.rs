//! Open-addressed hash table with tombstone deletion, grounded on
//! `examples/original_source/src/table.c` in full: linear probing,
//! tombstones represented as a `Nil` key paired with a non-`Nil` value,
//! a 0.75 max load factor, and capacity growth by doubling (starting at
//! 8) exactly as `table_adjust_capacity` does.

use crate::common::heap::Heap;
use crate::common::object::Object;
use crate::common::value::Value;

const MAX_LOAD: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
struct Entry {
    key: Value,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: Value::Nil,
            value: Value::Nil,
        }
    }
}

#[derive(Clone)]
pub struct Table {
    entries: Vec<Entry>,
    count: usize, // live entries + tombstones
    live: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn find_entry(entries: &[Entry], capacity: usize, key: &Value, heap: &Heap) -> usize {
        let mut index = (key.hash(heap) as usize) % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if matches!(entry.key, Value::Nil) {
                if matches!(entry.value, Value::Nil) {
                    // truly empty
                    return tombstone.unwrap_or(index);
                } else if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if entry.key.eq(key) {
                return index;
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize, heap: &Heap) {
        let mut fresh = vec![Entry::empty(); capacity];
        let mut live = 0;
        for entry in &self.entries {
            if matches!(entry.key, Value::Nil) {
                continue;
            }
            let index = Table::find_entry(&fresh, capacity, &entry.key, heap);
            fresh[index] = *entry;
            live += 1;
        }
        self.entries = fresh;
        self.count = live;
        self.live = live;
    }

    /// Returns `true` if this insert created a brand-new key.
    pub fn set(&mut self, key: Value, value: Value, heap: &Heap) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let capacity = if self.entries.is_empty() {
                INITIAL_CAPACITY
            } else {
                self.entries.len() * 2
            };
            self.adjust_capacity(capacity, heap);
        }
        let index = Table::find_entry(&self.entries, self.entries.len(), &key, heap);
        let entry = &mut self.entries[index];
        let is_new = matches!(entry.key, Value::Nil);
        let was_tombstone = is_new && !matches!(entry.value, Value::Nil);
        if is_new && !was_tombstone {
            self.count += 1;
        }
        if is_new {
            self.live += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new
    }

    pub fn get(&self, key: &Value, heap: &Heap) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Table::find_entry(&self.entries, self.entries.len(), key, heap);
        let entry = &self.entries[index];
        if matches!(entry.key, Value::Nil) {
            None
        } else {
            Some(entry.value)
        }
    }

    pub fn contains(&self, key: &Value, heap: &Heap) -> bool {
        self.get(key, heap).is_some()
    }

    /// Tombstone deletion: the slot becomes `(Nil, Bool(true))` so probe
    /// chains through it stay intact.
    pub fn delete(&mut self, key: &Value, heap: &Heap) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Table::find_entry(&self.entries, self.entries.len(), key, heap);
        let entry = &mut self.entries[index];
        if matches!(entry.key, Value::Nil) {
            false
        } else {
            entry.key = Value::Nil;
            entry.value = Value::Bool(true);
            self.live -= 1;
            true
        }
    }

    /// Direct byte-content probe used for string interning, before the
    /// candidate `AmexString` has even been allocated. Grounded on
    /// `table_find_string` in `table.c`.
    pub fn find_string(&self, bytes: &[u8], hash: u32, heap: &Heap) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) % capacity;
        loop {
            let entry = &self.entries[index];
            if matches!(entry.key, Value::Nil) {
                if matches!(entry.value, Value::Nil) {
                    return None;
                }
            } else if let Value::String(h) = entry.key {
                if let Object::Str(s) = heap.get(h) {
                    if s.hash == hash && s.bytes.as_bytes() == bytes {
                        return Some(entry.key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Removes entries whose key handle is unmarked, used by the GC to
    /// keep the string-intern table weak (spec.md §4.4 step 3; grounded
    /// on `table_remove_white`).
    pub fn remove_unmarked(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if let Value::String(h) = entry.key {
                if !heap.is_marked(h) {
                    entry.key = Value::Nil;
                    entry.value = Value::Bool(true);
                    self.live -= 1;
                }
            }
        }
    }

    pub fn trace_values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.live * 2);
        for entry in &self.entries {
            if !matches!(entry.key, Value::Nil) {
                out.push(entry.key);
                out.push(entry.value);
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !matches!(e.key, Value::Nil))
            .map(|e| (e.key, e.value))
    }
}
