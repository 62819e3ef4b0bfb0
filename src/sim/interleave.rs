use crate::coherence::{Addr, NodeId};

/// Maps byte addresses to lines and lines to their home node. Lines are interleaved across nodes
/// round-robin by line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomeMap {
    line_bytes: u64,
    num_nodes: usize,
}

impl HomeMap {
    pub fn new(line_bytes: u64, num_nodes: usize) -> Self {
        Self {
            line_bytes: line_bytes.max(1),
            num_nodes: num_nodes.max(1),
        }
    }

    /// Align down to the start of the containing line.
    pub fn line_addr(&self, addr: Addr) -> Addr {
        addr - addr % self.line_bytes
    }

    pub fn home_of(&self, addr: Addr) -> NodeId {
        ((addr / self.line_bytes) % self.num_nodes as u64) as NodeId
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_interleave_round_robin() {
        let map = HomeMap::new(64, 4);
        assert_eq!(map.home_of(0x0), 0);
        assert_eq!(map.home_of(0x3f), 0);
        assert_eq!(map.home_of(0x40), 1);
        assert_eq!(map.home_of(0xc0), 3);
        assert_eq!(map.home_of(0x100), 0);
    }

    #[test]
    fn line_addr_aligns_down() {
        let map = HomeMap::new(64, 4);
        assert_eq!(map.line_addr(0x7f), 0x40);
        assert_eq!(map.line_addr(0x40), 0x40);
        assert_eq!(map.home_of(map.line_addr(0x7f)), map.home_of(0x7f));
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let map = HomeMap::new(0, 0);
        assert_eq!(map.home_of(u64::MAX), 0);
        assert_eq!(map.line_addr(5), 5);
    }
}
