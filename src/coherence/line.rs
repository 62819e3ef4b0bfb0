use std::collections::HashMap;

use serde::Serialize;

use super::message::Addr;

/// Local state of a line that is present in this node's cache. INVALID is represented by absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Shared,
    Modified,
}

#[derive(Debug, Default)]
pub struct LineStates {
    lines: HashMap<Addr, LineStatus>,
}

impl LineStates {
    pub fn get(&self, addr: Addr) -> Option<LineStatus> {
        self.lines.get(&addr).copied()
    }

    pub fn set(&mut self, addr: Addr, status: LineStatus) {
        self.lines.insert(addr, status);
    }

    /// Drop to INVALID, returning the previous state.
    pub fn invalidate(&mut self, addr: Addr) -> Option<LineStatus> {
        self.lines.remove(&addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Addr, LineStatus)> + '_ {
        self.lines.iter().map(|(addr, status)| (*addr, *status))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
