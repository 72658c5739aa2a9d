// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Group membership interface.
//!
//! The engine only needs two answers from membership services: the ordered
//! member list of a group, and the network destination of one member. Both
//! are behind the [`Membership`] trait so deployments can plug in their own
//! resolver; [`GroupTable`] is the in-memory implementation used by tests
//! and single-process setups.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, RpcResult};

/// Logical identifier of one group member.
pub type Rank = u32;

/// Group name. Groups are identified by string id, like topics.
pub type GroupId = String;

/// Network destination of one RPC target.
///
/// The engine treats the address as opaque; only the transport interprets
/// it. Rank is carried alongside for logging and per-destination tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Member rank within the group (0 for direct addressing).
    pub rank: Rank,
    /// Opaque transport address.
    pub addr: String,
}

impl Destination {
    /// Destination for a directly-addressed (non-group) call.
    #[must_use]
    pub fn direct(addr: impl Into<String>) -> Self {
        Self {
            rank: 0,
            addr: addr.into(),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.addr, self.rank)
    }
}

/// Membership services consumed by the engine.
pub trait Membership: Send + Sync {
    /// Ordered member ranks of a group.
    fn members(&self, group: &str) -> RpcResult<Vec<Rank>>;

    /// Resolve one member to its network destination.
    fn resolve(&self, group: &str, rank: Rank) -> RpcResult<Destination>;
}

/// In-memory group table.
#[derive(Default)]
pub struct GroupTable {
    groups: DashMap<GroupId, Vec<Rank>>,
}

impl GroupTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a group. Ranks are stored sorted and deduplicated.
    pub fn insert(&self, group: impl Into<GroupId>, ranks: &[Rank]) {
        let mut ranks = ranks.to_vec();
        ranks.sort_unstable();
        ranks.dedup();
        self.groups.insert(group.into(), ranks);
    }

    /// Remove a group.
    pub fn remove(&self, group: &str) {
        self.groups.remove(group);
    }

    /// Shared handle, for handing to the engine.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Membership for GroupTable {
    fn members(&self, group: &str) -> RpcResult<Vec<Rank>> {
        self.groups
            .get(group)
            .map(|ranks| ranks.clone())
            .ok_or_else(|| Error::GroupNotFound(group.to_string()))
    }

    fn resolve(&self, group: &str, rank: Rank) -> RpcResult<Destination> {
        let members = self.members(group)?;
        if !members.contains(&rank) {
            return Err(Error::invalid_arg(format!(
                "rank {} not in group '{}'",
                rank, group
            )));
        }
        // Synthetic address: one endpoint per rank.
        Ok(Destination {
            rank,
            addr: format!("{}/{}", group, rank),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_sorted_dedup() {
        let table = GroupTable::new();
        table.insert("storage", &[3, 1, 2, 1]);
        assert_eq!(table.members("storage").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_group() {
        let table = GroupTable::new();
        let err = table.members("nope").unwrap_err();
        assert_eq!(err, Error::GroupNotFound("nope".to_string()));
    }

    #[test]
    fn test_resolve_non_member() {
        let table = GroupTable::new();
        table.insert("g", &[0, 1]);
        assert!(table.resolve("g", 9).is_err());
        let dest = table.resolve("g", 1).unwrap();
        assert_eq!(dest.rank, 1);
    }
}
