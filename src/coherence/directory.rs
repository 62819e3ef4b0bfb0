use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use super::message::{Addr, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirStatus {
    Uncached,
    Shared,
    Modified,
}

/// Home-node bookkeeping for one line. An owner is carried by value, so `Modified` always has
/// exactly one holder; `Shared` is only ever built by adding a sharer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", content = "sharers", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectoryEntry {
    #[default]
    Uncached,
    Shared(BTreeSet<NodeId>),
    Modified(NodeId),
}

impl DirectoryEntry {
    pub fn status(&self) -> DirStatus {
        match self {
            Self::Uncached => DirStatus::Uncached,
            Self::Shared(_) => DirStatus::Shared,
            Self::Modified(_) => DirStatus::Modified,
        }
    }

    pub fn sharers(&self) -> BTreeSet<NodeId> {
        match self {
            Self::Uncached => BTreeSet::new(),
            Self::Shared(sharers) => sharers.clone(),
            Self::Modified(owner) => BTreeSet::from([*owner]),
        }
    }

    pub fn is_sharer(&self, node: NodeId) -> bool {
        match self {
            Self::Uncached => false,
            Self::Shared(sharers) => sharers.contains(&node),
            Self::Modified(owner) => *owner == node,
        }
    }

    pub fn owner(&self) -> Option<NodeId> {
        match self {
            Self::Modified(owner) => Some(*owner),
            _ => None,
        }
    }

    /// Grant a read copy. An exclusive owner is demoted to a sharer alongside `node`.
    pub fn add_sharer(&mut self, node: NodeId) {
        match self {
            Self::Shared(sharers) => {
                sharers.insert(node);
            }
            Self::Modified(owner) => *self = Self::Shared(BTreeSet::from([*owner, node])),
            Self::Uncached => *self = Self::Shared(BTreeSet::from([node])),
        }
    }

    pub fn set_owner(&mut self, node: NodeId) {
        *self = Self::Modified(node);
    }

    pub fn clear(&mut self) {
        *self = Self::Uncached;
    }

    pub fn is_consistent(&self) -> bool {
        match self {
            Self::Shared(sharers) => !sharers.is_empty(),
            Self::Uncached | Self::Modified(_) => true,
        }
    }
}

/// Directory entries for the lines this node is home for. Lines never touched read as `Uncached`.
#[derive(Debug, Default)]
pub struct Directory {
    entries: HashMap<Addr, DirectoryEntry>,
}

impl Directory {
    pub fn lookup(&self, addr: Addr) -> DirectoryEntry {
        self.entries.get(&addr).cloned().unwrap_or_default()
    }

    pub fn entry_mut(&mut self, addr: Addr) -> &mut DirectoryEntry {
        self.entries.entry(addr).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Addr, &DirectoryEntry)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
