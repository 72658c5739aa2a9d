// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collective RPC engine.
//!
//! A collective fans one logical call out to every non-excluded member of
//! a group as ordinary point-to-point children, then accounts every member
//! exactly once: a real reply, an exclusion, or a synthesized failure. The
//! parent completes at the single increment where `ack_count` reaches
//! `child_count`; `ack_count` is monotonic and bounded, so only one code
//! path can cross that threshold no matter how completions interleave.
//!
//! Per-child errors never abort the collective: the first one wins and is
//! surfaced once, at overall completion. A mid-fan-out dispatch failure
//! bulk-accounts every not-yet-processed member with the observed error
//! and stops the loop.

use std::sync::Arc;

use crate::error::{Error, RpcResult};
use crate::group::{GroupId, Rank};
use crate::registry::Opcode;

use super::send::deliver_completion;
use super::{CompletionCallback, RpcEngine, RpcObject, RpcState};

/// Caller-supplied fold combining one child's reply buffer into the
/// parent's accumulated reply buffer.
///
/// Runs under the parent's lock on the progress thread: keep it fast and
/// non-blocking. Child completion order is unconstrained, so the fold must
/// be order-independent.
pub type AggregateFn = Arc<dyn Fn(&[u8], &mut [u8]) + Send + Sync>;

pub(crate) struct CollectiveInfo {
    pub(crate) group: GroupId,
    pub(crate) members: Vec<Rank>,
    /// Sorted, deduplicated; validated against the member list at create.
    pub(crate) excluded: Vec<Rank>,
    pub(crate) child_count: usize,
    pub(crate) ack_count: usize,
    /// First non-success child result.
    pub(crate) aggregate_error: Option<Error>,
    /// In-flight children; each entry holds one reference on the child.
    pub(crate) children: Vec<Arc<RpcObject>>,
    pub(crate) aggregate_fn: Option<AggregateFn>,
}

impl RpcObject {
    /// Members accounted for so far (collective parents only).
    #[must_use]
    pub fn ack_count(&self) -> Option<usize> {
        self.lock().collective.as_ref().map(|co| co.ack_count)
    }

    /// First child error observed so far (collective parents only).
    #[must_use]
    pub fn aggregate_error(&self) -> Option<Error> {
        self.lock()
            .collective
            .as_ref()
            .and_then(|co| co.aggregate_error.clone())
    }
}

impl RpcEngine {
    /// Create a collective RPC object addressed to every member of
    /// `group` except `excluded`.
    ///
    /// The member list is snapshotted here; `excluded` must be a subset of
    /// it. Never partially succeeds.
    pub fn create_collective(
        &self,
        group: &str,
        excluded: &[Rank],
        opcode: Opcode,
        aggregate_fn: Option<AggregateFn>,
    ) -> RpcResult<Arc<RpcObject>> {
        let entry = self.shared.registry.lookup(opcode)?;
        let members = self.shared.membership.members(group)?;

        let mut excluded = excluded.to_vec();
        excluded.sort_unstable();
        excluded.dedup();
        for rank in &excluded {
            if members.binary_search(rank).is_err() {
                return Err(Error::InvalidExclusionSet(*rank));
            }
        }

        let child_count = members.len();
        let info = CollectiveInfo {
            group: group.to_string(),
            members,
            excluded,
            child_count,
            ack_count: 0,
            aggregate_error: None,
            children: Vec::new(),
            aggregate_fn,
        };
        Ok(RpcObject::new(
            opcode,
            None,
            entry.input_size,
            entry.output_size,
            Some(info),
        ))
    }

    /// Fan a collective out to its group.
    ///
    /// Excluded members are accounted for in the same pass, before any
    /// later member is dispatched; if every member is excluded (or the
    /// group is empty) the parent completes synchronously here. On a
    /// synchronous error the parent is destroyed, as with `send`.
    pub fn corpc_send(&self, parent: &Arc<RpcObject>, callback: CompletionCallback) -> RpcResult<()> {
        let rc = self.corpc_fan_out(parent, callback);
        if let Err(err) = &rc {
            log::warn!("opc {}: collective send failed: {}", parent.opcode(), err);
            let _ = parent.dec_ref();
        }
        rc
    }

    fn corpc_fan_out(&self, parent: &Arc<RpcObject>, callback: CompletionCallback) -> RpcResult<()> {
        let (group, members, excluded, input) = {
            let mut inner = parent.lock();
            if inner.state != RpcState::Inited {
                return Err(Error::InvalidState("collective send on non-inited rpc"));
            }
            let Some(co) = inner.collective.as_ref() else {
                return Err(Error::InvalidState("collective send on point-to-point rpc"));
            };
            let snapshot = (
                co.group.clone(),
                co.members.clone(),
                co.excluded.clone(),
                inner.input.clone(),
            );
            inner.completion = Some(callback);
            inner.state = RpcState::Sent;
            snapshot
        };

        log::debug!(
            "opc {}: collective fan-out to group '{}' ({} members, {} excluded)",
            parent.opcode(),
            group,
            members.len(),
            excluded.len()
        );

        let mut crossed = false;
        for (idx, rank) in members.iter().enumerate() {
            if excluded.binary_search(rank).is_ok() {
                crossed = Self::account_members(parent, 1, None);
                continue;
            }

            if let Err(err) = self.spawn_child(parent, &group, *rank, &input) {
                log::warn!(
                    "opc {}: child dispatch to rank {} failed ({}); accounting {} remaining members",
                    parent.opcode(),
                    rank,
                    err,
                    members.len() - idx
                );
                crossed = Self::account_members(parent, members.len() - idx, Some(err));
                break;
            }
        }

        // An empty group has no increments to cross the threshold; it
        // completes synchronously with success.
        if crossed || members.is_empty() {
            self.complete_collective(parent);
        }
        Ok(())
    }

    /// Create, link and send one child RPC.
    ///
    /// Child references after a successful spawn: creation + child list +
    /// tracking. The completion closure additionally holds one reference
    /// on the parent so it can reach it safely from the progress thread.
    fn spawn_child(
        &self,
        parent: &Arc<RpcObject>,
        group: &str,
        rank: Rank,
        input: &[u8],
    ) -> RpcResult<()> {
        let dest = self.shared.membership.resolve(group, rank)?;
        let child = self.create(parent.opcode(), dest)?;
        child.input_mut().copy_from_slice(input);

        child.add_ref()?; // child-list reference
        parent.add_ref()?; // held by the child's completion closure
        if let Some(co) = parent.lock().collective.as_mut() {
            co.children.push(child.clone());
        }

        let engine = self.clone();
        let parent_cb = parent.clone();
        let callback: CompletionCallback = Box::new(move |child_obj, result| {
            engine.corpc_child_complete(child_obj, result, &parent_cb);
        });

        if let Err(err) = self.send(&child, callback) {
            // send() already dropped the creation reference; undo the link.
            Self::unlink_child(parent, &child);
            let _ = child.dec_ref();
            let _ = parent.dec_ref();
            return Err(err);
        }
        Ok(())
    }

    /// Account `count` members under the parent lock, folding `error`
    /// first-error-wins. Returns true when this increment crossed
    /// `child_count`.
    fn account_members(parent: &Arc<RpcObject>, count: usize, error: Option<Error>) -> bool {
        let mut inner = parent.lock();
        let Some(co) = inner.collective.as_mut() else {
            log::error!("opc {}: accounting on non-collective rpc", parent.opcode());
            return false;
        };
        if let Some(err) = error {
            co.aggregate_error.get_or_insert(err);
        }
        let was_complete = co.ack_count == co.child_count;
        co.ack_count += count;
        debug_assert!(co.ack_count <= co.child_count);
        !was_complete && co.ack_count == co.child_count
    }

    fn unlink_child(parent: &Arc<RpcObject>, child: &Arc<RpcObject>) {
        let mut inner = parent.lock();
        if let Some(co) = inner.collective.as_mut() {
            co.children.retain(|entry| !Arc::ptr_eq(entry, child));
        }
    }

    /// Child completion, invoked from the progress thread.
    fn corpc_child_complete(
        &self,
        child: &Arc<RpcObject>,
        result: RpcResult<()>,
        parent: &Arc<RpcObject>,
    ) {
        let crossed = {
            // Child output is cloned out before taking the parent lock so
            // the aggregation fold never holds two object locks at once.
            let child_output = child.output().clone();

            let mut guard = parent.lock();
            let inner = &mut *guard;
            let Some(co) = inner.collective.as_mut() else {
                log::error!(
                    "opc {}: child completion for non-collective parent",
                    parent.opcode()
                );
                return;
            };

            if let Err(err) = &result {
                if co.aggregate_error.is_none() {
                    log::debug!(
                        "opc {}: first child error from rank {}: {}",
                        parent.opcode(),
                        child.destination().map_or(0, |d| d.rank),
                        err
                    );
                    co.aggregate_error = Some(err.clone());
                }
            }

            co.ack_count += 1;
            debug_assert!(co.ack_count <= co.child_count);

            if let Some(aggregate) = co.aggregate_fn.clone() {
                aggregate(&child_output, &mut inner.output);
            }

            co.children.retain(|entry| !Arc::ptr_eq(entry, child));
            co.ack_count == co.child_count
        };

        // Child-list reference, then the creation reference the fan-out
        // loop still owns.
        let _ = child.dec_ref();
        let _ = child.dec_ref();

        if crossed {
            self.complete_collective(parent);
        }

        // The closure's reference on the parent.
        let _ = parent.dec_ref();
    }

    /// Fire the parent's completion with the aggregated result.
    fn complete_collective(&self, parent: &Arc<RpcObject>) {
        let result = match parent.aggregate_error() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        log::debug!(
            "opc {}: collective complete, result {:?}",
            parent.opcode(),
            result
        );
        deliver_completion(parent, result);
    }
}
