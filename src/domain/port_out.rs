//! Port Out State
//!
//! The port out characteristic replaces every port at once, so the last
//! known state of all ports is kept here and merged on each write.

use crate::infrastructure::bluetooth::protocol::{encode_port_out_mask, MAX_FUNCTION_COUNT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortOutState {
    ports: [bool; MAX_FUNCTION_COUNT],
}

impl PortOutState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update one port. Returns `false` (and changes nothing) when `idx` is
    /// out of range.
    pub fn set(&mut self, idx: usize, on: bool) -> bool {
        match self.ports.get_mut(idx) {
            Some(port) => {
                *port = on;
                true
            }
            None => false,
        }
    }

    /// Overwrite every port. Missing trailing entries turn the port off,
    /// extra entries are ignored.
    pub fn replace(&mut self, states: &[bool]) {
        for (i, port) in self.ports.iter_mut().enumerate() {
            *port = states.get(i).copied().unwrap_or(false);
        }
    }

    pub fn get(&self, idx: usize) -> Option<bool> {
        self.ports.get(idx).copied()
    }

    pub fn as_array(&self) -> [bool; MAX_FUNCTION_COUNT] {
        self.ports
    }

    /// Wire payload for the full current state
    pub fn to_mask(&self) -> [u8; 1] {
        encode_port_out_mask(&self.ports)
    }
}
