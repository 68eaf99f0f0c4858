//! Cycle collector
//!
//! Values are reference-counted, so ordinary garbage frees itself; what
//! cannot free itself is a cycle (`a.next = b; b.next = a`). The heap
//! tracks every composite allocation with a weak handle. A collection
//! marks everything reachable from the environment roots, then any
//! allocation that is still alive but unmarked is cyclic garbage: the
//! collector clears the first holder it finds in allocation order, which
//! breaks the component and lets reference counting reclaim the rest.
//!
//! Struct fields declared `weak` are not traversed during marking, so a
//! cycle that runs through a weak field is collectable even while the
//! rest of the structure is live.
//!
//! Collection runs at statement boundaries: either on an explicit `gc()`
//! or when the allocation counter crosses the configured threshold.

use crate::structs::StructRegistry;
use crate::value::{DictRef, EnvRef, Environment, FunctionValue, ListRef, ModuleHandle, StructRef, StructValue, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use tracing::debug;

enum Tracked {
    List(Weak<RefCell<Vec<Value>>>),
    Dict(Weak<RefCell<HashMap<String, Value>>>),
    Struct(Weak<RefCell<StructValue>>),
}

impl Tracked {
    fn ptr(&self) -> Option<usize> {
        match self {
            Tracked::List(w) => w.upgrade().map(|rc| Rc::as_ptr(&rc) as usize),
            Tracked::Dict(w) => w.upgrade().map(|rc| Rc::as_ptr(&rc) as usize),
            Tracked::Struct(w) => w.upgrade().map(|rc| Rc::as_ptr(&rc) as usize),
        }
    }

    fn is_alive(&self) -> bool {
        self.ptr().is_some()
    }

    /// Drop this holder's contents, releasing its references.
    fn clear(&self) {
        match self {
            Tracked::List(w) => {
                if let Some(rc) = w.upgrade() {
                    if let Ok(mut list) = rc.try_borrow_mut() {
                        list.clear();
                    }
                }
            }
            Tracked::Dict(w) => {
                if let Some(rc) = w.upgrade() {
                    if let Ok(mut dict) = rc.try_borrow_mut() {
                        dict.clear();
                    }
                }
            }
            Tracked::Struct(w) => {
                if let Some(rc) = w.upgrade() {
                    if let Ok(mut sv) = rc.try_borrow_mut() {
                        sv.fields.clear();
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Completed collection passes.
    pub collections: u64,
    /// Values reclaimed across all passes.
    pub collected_total: u64,
    /// Values reclaimed by the most recent pass.
    pub last_collected: u64,
    /// Live tracked allocations after the most recent pass.
    pub live_tracked: u64,
}

pub struct Heap {
    tracked: Vec<Tracked>,
    allocs_since_collect: usize,
    threshold: usize,
    stats: GcStats,
}

impl Heap {
    pub fn new(threshold: usize) -> Self {
        Heap {
            tracked: Vec::new(),
            allocs_since_collect: 0,
            threshold: threshold.max(1),
            stats: GcStats::default(),
        }
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> ListRef {
        let rc: ListRef = Rc::new(RefCell::new(items));
        self.tracked.push(Tracked::List(Rc::downgrade(&rc)));
        self.allocs_since_collect += 1;
        rc
    }

    pub fn alloc_dict(&mut self, entries: HashMap<String, Value>) -> DictRef {
        let rc: DictRef = Rc::new(RefCell::new(entries));
        self.tracked.push(Tracked::Dict(Rc::downgrade(&rc)));
        self.allocs_since_collect += 1;
        rc
    }

    pub fn alloc_struct(&mut self, value: StructValue) -> StructRef {
        let rc: StructRef = Rc::new(RefCell::new(value));
        self.tracked.push(Tracked::Struct(Rc::downgrade(&rc)));
        self.allocs_since_collect += 1;
        rc
    }

    /// Track composites inside a value produced outside the allocation
    /// helpers (e.g. unmarshalled guest results).
    pub fn track_value(&mut self, value: &Value) {
        let mut seen = HashSet::new();
        self.track_value_inner(value, &mut seen);
    }

    fn track_value_inner(&mut self, value: &Value, seen: &mut HashSet<usize>) {
        match value {
            Value::List(list) => {
                if seen.insert(Rc::as_ptr(list) as usize) {
                    self.tracked.push(Tracked::List(Rc::downgrade(list)));
                    self.allocs_since_collect += 1;
                    for item in list.borrow().iter() {
                        self.track_value_inner(item, seen);
                    }
                }
            }
            Value::Dict(dict) => {
                if seen.insert(Rc::as_ptr(dict) as usize) {
                    self.tracked.push(Tracked::Dict(Rc::downgrade(dict)));
                    self.allocs_since_collect += 1;
                    for item in dict.borrow().values() {
                        self.track_value_inner(item, seen);
                    }
                }
            }
            Value::Struct(sv) => {
                if seen.insert(Rc::as_ptr(sv) as usize) {
                    self.tracked.push(Tracked::Struct(Rc::downgrade(sv)));
                    self.allocs_since_collect += 1;
                    for item in sv.borrow().fields.values() {
                        self.track_value_inner(item, seen);
                    }
                }
            }
            _ => {}
        }
    }

    /// Should an automatic pass run at the next statement boundary?
    pub fn should_collect(&self) -> bool {
        self.allocs_since_collect >= self.threshold
    }

    /// Mark from `roots`, then reclaim unreached-but-alive allocations.
    /// Returns how many values were reclaimed.
    pub fn collect(&mut self, roots: &[EnvRef], structs: &StructRegistry) -> usize {
        let mut marker = Marker {
            marked: HashSet::new(),
            visited_envs: HashSet::new(),
            structs,
        };
        for root in roots {
            marker.mark_env(root);
        }

        // Snapshot the unreachable set before touching anything: the
        // count reflects the whole cyclic garbage, while clearing only
        // the first holder of each component does the freeing.
        let unreachable: Vec<usize> = self
            .tracked
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match t.ptr() {
                Some(ptr) if !marker.marked.contains(&ptr) => Some(i),
                _ => None,
            })
            .collect();
        let collected = unreachable.len();

        for index in unreachable {
            // Holders freed by an earlier clear in the same pass no
            // longer upgrade; skipping them is what makes this "one
            // holder per component".
            if self.tracked[index].is_alive() {
                self.tracked[index].clear();
            }
        }

        self.tracked.retain(|t| t.is_alive());
        self.allocs_since_collect = 0;
        self.stats.collections += 1;
        self.stats.collected_total += collected as u64;
        self.stats.last_collected = collected as u64;
        self.stats.live_tracked = self.tracked.len() as u64;
        debug!(collected, live = self.tracked.len(), "cycle collection");
        collected
    }
}

struct Marker<'a> {
    marked: HashSet<usize>,
    visited_envs: HashSet<usize>,
    structs: &'a StructRegistry,
}

impl Marker<'_> {
    fn mark_env(&mut self, env: &EnvRef) {
        if !self.visited_envs.insert(Rc::as_ptr(env) as usize) {
            return;
        }
        let scope = env.borrow();
        for value in scope.local_values() {
            self.mark_value(value);
        }
        if let Some(parent) = scope.parent() {
            drop(scope);
            self.mark_env(&parent);
        }
    }

    fn mark_value(&mut self, value: &Value) {
        match value {
            Value::List(list) => {
                if self.marked.insert(Rc::as_ptr(list) as usize) {
                    for item in list.borrow().iter() {
                        self.mark_value(item);
                    }
                }
            }
            Value::Dict(dict) => {
                if self.marked.insert(Rc::as_ptr(dict) as usize) {
                    for item in dict.borrow().values() {
                        self.mark_value(item);
                    }
                }
            }
            Value::Struct(sv) => {
                if self.marked.insert(Rc::as_ptr(sv) as usize) {
                    let sv = sv.borrow();
                    let def = self.structs.get(&sv.name);
                    for (field, item) in &sv.fields {
                        let weak = def
                            .as_ref()
                            .and_then(|d| d.field(field))
                            .map(|f| f.weak)
                            .unwrap_or(false);
                        if !weak {
                            self.mark_value(item);
                        }
                    }
                }
            }
            Value::Function(func) => {
                if let FunctionValue::User { env, .. } = func.as_ref() {
                    self.mark_env(env);
                }
            }
            Value::Module(module) => {
                if let ModuleHandle::File { exports, .. } = module.as_ref() {
                    for item in exports.borrow().values() {
                        self.mark_value(item);
                    }
                }
            }
            Value::Error(err) => {
                if let Some(payload) = &err.payload {
                    self.mark_value(payload);
                }
            }
            _ => {}
        }
    }
}
