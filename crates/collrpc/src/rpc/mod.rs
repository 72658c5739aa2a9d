// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC object model and reference-counted lifecycle.
//!
//! Every in-flight call, point-to-point or collective, is one
//! [`RpcObject`]. The `Arc` keeps the memory valid for as long as anyone
//! can name the object; the explicit refcount carries the *logical*
//! lifetime: buffers and collective state are torn down exactly when the
//! count goes 1 -> 0, and a decrement at 0 is an API-misuse error.
//!
//! Reference discipline:
//! - the creator holds one reference from `create`;
//! - the in-flight tracker holds one from track to untrack;
//! - a collective parent's child list holds one per listed child;
//! - each child's completion closure holds one on its parent.
//!
//! All mutable fields live behind the object's own mutex. Completion
//! callbacks are invoked *outside* that mutex, after the state transition
//! and the one-shot callback take happen under it.

mod corpc;
mod send;
mod tracker;
mod wait;


pub use corpc::AggregateFn;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{Error, RpcResult};
use crate::group::{Destination, Membership};
use crate::registry::{Opcode, OpcodeRegistry};
use crate::transport::{Transport, TransportHandle};

use corpc::CollectiveInfo;
use tracker::Tracker;

/// Lifecycle state of one RPC object. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcState {
    /// Created, not yet handed to the transport.
    Inited,
    /// On the wire (or fanned out, for a collective parent).
    Sent,
    /// Terminal; the completion callback has been taken.
    Completed,
}

/// Caller-supplied completion callback, invoked at most once on the
/// transition to `Completed`.
pub type CompletionCallback = Box<dyn FnOnce(&Arc<RpcObject>, RpcResult<()>) + Send>;

pub(crate) struct RpcInner {
    state: RpcState,
    refcount: u32,
    input: Vec<u8>,
    output: Vec<u8>,
    completion: Option<CompletionCallback>,
    result: Option<RpcResult<()>>,
    handle: Option<TransportHandle>,
    collective: Option<CollectiveInfo>,
}

/// One tracked, reference-counted RPC.
pub struct RpcObject {
    opcode: Opcode,
    dest: Option<Destination>,
    xid: AtomicU64,
    // Completion flag read by the wait helper without taking the lock.
    done: AtomicBool,
    inner: Mutex<RpcInner>,
}

impl RpcObject {
    fn new(
        opcode: Opcode,
        dest: Option<Destination>,
        input_size: usize,
        output_size: usize,
        collective: Option<CollectiveInfo>,
    ) -> Arc<Self> {
        Arc::new(Self {
            opcode,
            dest,
            xid: AtomicU64::new(0),
            done: AtomicBool::new(false),
            inner: Mutex::new(RpcInner {
                state: RpcState::Inited,
                refcount: 1,
                input: vec![0u8; input_size],
                output: vec![0u8; output_size],
                completion: None,
                result: None,
                handle: None,
                collective,
            }),
        })
    }

    /// Operation code of this RPC.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Destination, for point-to-point objects.
    #[must_use]
    pub fn destination(&self) -> Option<&Destination> {
        self.dest.as_ref()
    }

    /// Correlation id assigned by the transport (0 before send).
    #[must_use]
    pub fn xid(&self) -> u64 {
        self.xid.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RpcState {
        self.inner.lock().state
    }

    /// Current logical reference count.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.inner.lock().refcount
    }

    /// Whether this object is a collective parent.
    #[must_use]
    pub fn is_collective(&self) -> bool {
        self.inner.lock().collective.is_some()
    }

    /// Whether the completion has fired. Lock-free; safe from any thread.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Result code delivered at completion, if completed.
    #[must_use]
    pub fn result(&self) -> Option<RpcResult<()>> {
        self.inner.lock().result.clone()
    }

    /// Request buffer, read access.
    pub fn input(&self) -> MappedMutexGuard<'_, Vec<u8>> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.input)
    }

    /// Request buffer, write access. Fill before `send`.
    pub fn input_mut(&self) -> MappedMutexGuard<'_, Vec<u8>> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.input)
    }

    /// Reply buffer. Valid after completion.
    pub fn output(&self) -> MappedMutexGuard<'_, Vec<u8>> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.output)
    }

    /// Reply buffer, write access (aggregation targets, handlers in tests).
    pub fn output_mut(&self) -> MappedMutexGuard<'_, Vec<u8>> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.output)
    }

    /// Take one more logical reference.
    ///
    /// Only valid while holding an existing reference; taking a reference
    /// on a destroyed object is `InvalidState`.
    pub fn add_ref(&self) -> RpcResult<()> {
        let mut inner = self.inner.lock();
        if inner.refcount == 0 {
            return Err(Error::InvalidState("add_ref on destroyed rpc"));
        }
        inner.refcount += 1;
        Ok(())
    }

    /// Drop one logical reference; the 1 -> 0 transition destroys the
    /// object (buffers and collective state released). Decrementing past
    /// zero is `InvalidState`.
    pub fn dec_ref(&self) -> RpcResult<()> {
        let mut inner = self.inner.lock();
        if inner.refcount == 0 {
            log::error!("opc {}: dec_ref below zero", self.opcode);
            return Err(Error::InvalidState("dec_ref on destroyed rpc"));
        }
        inner.refcount -= 1;
        if inner.refcount == 0 {
            self.destroy(&mut inner);
        }
        Ok(())
    }

    /// Release buffers and collective state. Called exactly once, under
    /// the object lock, at the 1 -> 0 refcount transition.
    fn destroy(&self, inner: &mut RpcInner) {
        log::debug!("opc {} xid {}: destroying rpc", self.opcode, self.xid());
        inner.input = Vec::new();
        inner.output = Vec::new();
        inner.completion = None;
        if let Some(co) = inner.collective.take() {
            if !co.children.is_empty() {
                log::error!(
                    "opc {}: destroying collective with {} children in flight",
                    self.opcode,
                    co.children.len()
                );
                debug_assert!(co.children.is_empty());
            }
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RpcInner> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for RpcObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RpcObject")
            .field("opcode", &self.opcode)
            .field("dest", &self.dest)
            .field("xid", &self.xid())
            .field("state", &inner.state)
            .field("refcount", &inner.refcount)
            .field("collective", &inner.collective.is_some())
            .finish()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent in-flight requests allowed per destination before sends
    /// are queued.
    pub max_inflight_per_destination: usize,
    /// Deadline used by `wait` when the caller passes a zero timeout.
    pub default_sync_timeout: Duration,
    /// Progress slice used by the wait loop.
    pub progress_slice: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_destination: 64,
            default_sync_timeout: Duration::from_secs(60),
            progress_slice: Duration::from_millis(1),
        }
    }
}

pub(crate) struct EngineShared {
    pub(crate) registry: Arc<OpcodeRegistry>,
    pub(crate) membership: Arc<dyn Membership>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tracker: Tracker,
    pub(crate) config: EngineConfig,
}

/// Request/reply lifecycle and collective-operation engine.
///
/// Cheaply cloneable handle; all clones share the same state. The engine
/// owns no threads: completions run on whichever thread drives
/// [`Transport::progress`].
#[derive(Clone)]
pub struct RpcEngine {
    pub(crate) shared: Arc<EngineShared>,
}

impl RpcEngine {
    /// Build an engine over the given collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<OpcodeRegistry>,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        let tracker = Tracker::new(config.max_inflight_per_destination);
        Self {
            shared: Arc::new(EngineShared {
                registry,
                membership,
                transport,
                tracker,
                config,
            }),
        }
    }

    /// Create a point-to-point RPC object bound to one destination.
    ///
    /// Never partially succeeds: on error the caller receives no object.
    pub fn create(&self, opcode: Opcode, dest: Destination) -> RpcResult<Arc<RpcObject>> {
        let entry = self.shared.registry.lookup(opcode)?;
        Ok(RpcObject::new(
            opcode,
            Some(dest),
            entry.input_size,
            entry.output_size,
            None,
        ))
    }

    /// The opcode registry this engine serves.
    #[must_use]
    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.shared.registry
    }
}
