// id.rs — Deterministic fresh-name allocation for compiler-introduced entities
//
// Combined channels, per-field temporaries and generated struct types all
// need names that cannot collide with user names. Names are `prefix$N`
// with one counter per prefix, allocated in request order, so the same
// input always yields the same output.

use std::collections::HashMap;

/// Allocator for fresh names. Produces monotonically increasing suffixes
/// per prefix, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct NameAllocator {
    next: HashMap<String, u32>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A name of the form `prefix$N` not handed out before.
    pub fn unique(&mut self, prefix: &str) -> String {
        let counter = self.next.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}${counter}");
        *counter += 1;
        name
    }
}
