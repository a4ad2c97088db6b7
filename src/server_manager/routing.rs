//! Capability routing index.
//!
//! Memoizes tool name → slot index and resource URI → slot index. On a miss
//! the slots are scanned twice: connected slots first, then disconnected
//! ones, so a live server wins over a stale advertisement. Misses are not
//! cached. Any topology change must call [`RoutingIndex::invalidate`].

use std::collections::HashMap;

use super::connection::ServerConnection;

#[derive(Debug, Default)]
pub struct RoutingIndex {
    tools: HashMap<String, usize>,
    resources: HashMap<String, usize>,
}

impl RoutingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_tool(&mut self, name: &str, slots: &[ServerConnection]) -> Option<usize> {
        if let Some(&index) = self.tools.get(name) {
            if index < slots.len() {
                return Some(index);
            }
            self.tools.remove(name);
        }
        let index = scan(slots, |slot| slot.provides_tool(name))?;
        self.tools.insert(name.to_string(), index);
        Some(index)
    }

    pub fn select_resource(&mut self, uri: &str, slots: &[ServerConnection]) -> Option<usize> {
        if let Some(&index) = self.resources.get(uri) {
            if index < slots.len() {
                return Some(index);
            }
            self.resources.remove(uri);
        }
        let index = scan(slots, |slot| slot.provides_resource(uri))?;
        self.resources.insert(uri.to_string(), index);
        Some(index)
    }

    /// Drop every memoized entry.
    pub fn invalidate(&mut self) {
        self.tools.clear();
        self.resources.clear();
    }

    pub fn cached_tools(&self) -> usize {
        self.tools.len()
    }

    pub fn cached_resources(&self) -> usize {
        self.resources.len()
    }
}

/// First matching slot, connected slots before disconnected ones.
fn scan(slots: &[ServerConnection], matches: impl Fn(&ServerConnection) -> bool) -> Option<usize> {
    let connected = slots
        .iter()
        .position(|slot| slot.is_connected && matches(slot));
    connected.or_else(|| {
        slots
            .iter()
            .position(|slot| !slot.is_connected && matches(slot))
    })
}
