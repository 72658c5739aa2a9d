// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-destination in-flight tracking.
//!
//! Each destination gets a bounded in-flight budget; sends beyond the
//! budget are queued in arrival order and dispatched as slots free up at
//! completion time. Tracking an object is paired with one logical
//! reference on it, released when the object is untracked.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::RpcObject;

/// Outcome of tracking one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tracked {
    /// A slot was available; the send goes out now.
    Inflight,
    /// Budget exhausted; queued until a completion frees a slot.
    Queued,
}

#[derive(Default)]
struct DestState {
    inflight: usize,
    waitq: VecDeque<Arc<RpcObject>>,
}

pub(crate) struct Tracker {
    max_inflight: usize,
    dests: Mutex<HashMap<String, DestState>>,
}

impl Tracker {
    pub(crate) fn new(max_inflight: usize) -> Self {
        Self {
            max_inflight: max_inflight.max(1),
            dests: Mutex::new(HashMap::new()),
        }
    }

    /// Claim an in-flight slot for `addr`, or queue the object.
    pub(crate) fn track(&self, obj: &Arc<RpcObject>, addr: &str) -> Tracked {
        let mut dests = self.dests.lock();
        let state = dests.entry(addr.to_string()).or_default();
        if state.inflight < self.max_inflight {
            state.inflight += 1;
            Tracked::Inflight
        } else {
            state.waitq.push_back(obj.clone());
            Tracked::Queued
        }
    }

    /// Free one in-flight slot for `addr` and promote queued objects into
    /// the freed capacity. Returned objects are already counted in-flight;
    /// the caller must dispatch them (or release them again on failure).
    pub(crate) fn release(&self, addr: &str) -> Vec<Arc<RpcObject>> {
        let mut dests = self.dests.lock();
        let Some(state) = dests.get_mut(addr) else {
            log::error!("tracker: release for untracked destination {}", addr);
            return Vec::new();
        };

        debug_assert!(state.inflight > 0);
        state.inflight = state.inflight.saturating_sub(1);

        let mut promoted = Vec::new();
        while state.inflight < self.max_inflight {
            match state.waitq.pop_front() {
                Some(obj) => {
                    state.inflight += 1;
                    promoted.push(obj);
                }
                None => break,
            }
        }

        if state.inflight == 0 && state.waitq.is_empty() {
            dests.remove(addr);
        }
        promoted
    }

    #[cfg(test)]
    pub(crate) fn inflight(&self, addr: &str) -> usize {
        self.dests
            .lock()
            .get(addr)
            .map_or(0, |state| state.inflight)
    }
}
