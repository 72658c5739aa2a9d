// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point-to-point send path and completion delivery.
//!
//! `send` stores the caller's callback, claims an in-flight slot (or
//! queues), marks the object `Sent` and hands the request bytes to the
//! transport. Any synchronous failure rolls the state back, releases the
//! tracking reference and then drops the creation reference: a failed
//! `send` destroys the object, so callers never need a separate cleanup
//! call. After a successful `send`, the only signal is the completion
//! callback, fired from the transport's progress path.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::{Error, RpcResult};
use crate::group::Destination;

use super::tracker::Tracked;
use super::{CompletionCallback, RpcEngine, RpcObject, RpcState};

/// Transition an object to `Completed` and fire its callback exactly once.
///
/// The state change and the callback take happen under the object lock;
/// the callback itself runs outside it. A second completion attempt is a
/// broken invariant: logged and dropped.
pub(crate) fn deliver_completion(obj: &Arc<RpcObject>, result: RpcResult<()>) {
    let callback = {
        let mut inner = obj.lock();
        if inner.state == RpcState::Completed {
            log::error!(
                "opc {} xid {}: duplicate completion suppressed",
                obj.opcode(),
                obj.xid()
            );
            debug_assert!(false, "duplicate rpc completion");
            return;
        }
        inner.state = RpcState::Completed;
        inner.result = Some(result.clone());
        inner.completion.take()
    };

    obj.done.store(true, Ordering::Release);

    if let Some(callback) = callback {
        callback(obj, result);
    }
}

impl RpcEngine {
    /// Send an RPC object, arming `callback` to fire exactly once at
    /// completion.
    ///
    /// Collective objects are routed to the fan-out path. On a synchronous
    /// error the object is destroyed (creation reference released) and
    /// must not be used again.
    pub fn send(&self, obj: &Arc<RpcObject>, callback: CompletionCallback) -> RpcResult<()> {
        if obj.is_collective() {
            return self.corpc_send(obj, callback);
        }

        let rc = self.send_p2p(obj, callback);
        if let Err(err) = &rc {
            log::warn!("opc {}: send failed: {}", obj.opcode(), err);
            // Failed sends destroy the request internally.
            let _ = obj.dec_ref();
        }
        rc
    }

    fn send_p2p(&self, obj: &Arc<RpcObject>, callback: CompletionCallback) -> RpcResult<()> {
        let Some(dest) = obj.destination().cloned() else {
            return Err(Error::invalid_arg("rpc object has no destination"));
        };

        {
            let mut inner = obj.lock();
            if inner.state != RpcState::Inited {
                return Err(Error::InvalidState("send on non-inited rpc"));
            }
            inner.completion = Some(callback);
        }

        // Tracking holds one reference until untrack.
        obj.add_ref()?;
        match self.shared.tracker.track(obj, &dest.addr) {
            Tracked::Queued => {
                log::debug!("opc {}: queued behind in-flight budget for {}", obj.opcode(), dest);
                Ok(())
            }
            Tracked::Inflight => {
                if let Err(err) = self.send_immediately(obj, &dest) {
                    self.release_slot_and_dispatch(&dest);
                    let _ = obj.dec_ref();
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// Hand one tracked request to the transport. Rolls the state back to
    /// `Inited` when the transport refuses it.
    pub(crate) fn send_immediately(&self, obj: &Arc<RpcObject>, dest: &Destination) -> RpcResult<()> {
        let handle = self.shared.transport.create_handle(dest, obj.opcode())?;
        obj.xid.store(handle, Ordering::Relaxed);

        let input = {
            let mut inner = obj.lock();
            inner.state = RpcState::Sent;
            inner.handle = Some(handle);
            inner.input.clone()
        };

        let engine = self.clone();
        let obj_cb = obj.clone();
        let dest_cb = dest.clone();
        let rc = self.shared.transport.send(
            handle,
            &input,
            Box::new(move |reply| {
                let result = match reply.status {
                    Ok(()) => {
                        let mut inner = obj_cb.lock();
                        let len = inner.output.len().min(reply.output.len());
                        inner.output[..len].copy_from_slice(&reply.output[..len]);
                        Ok(())
                    }
                    Err(code) => Err(Error::Transport(code)),
                };
                engine.on_transport_reply(&obj_cb, &dest_cb, result);
            }),
        );

        if let Err(err) = rc {
            let mut inner = obj.lock();
            inner.state = RpcState::Inited;
            inner.handle = None;
            drop(inner);
            self.shared.transport.destroy_handle(handle);
            return Err(err);
        }
        Ok(())
    }

    /// Runs on the progress thread once the transport resolved a request.
    fn on_transport_reply(&self, obj: &Arc<RpcObject>, dest: &Destination, result: RpcResult<()>) {
        if let Err(err) = &result {
            log::debug!("opc {} xid {}: completed with {}", obj.opcode(), obj.xid(), err);
        }
        deliver_completion(obj, result);

        if let Some(handle) = obj.lock().handle.take() {
            self.shared.transport.destroy_handle(handle);
        }

        self.release_slot_and_dispatch(dest);
        // Tracking reference.
        let _ = obj.dec_ref();
    }

    /// Free the in-flight slot for `dest` and dispatch requests promoted
    /// from the wait queue. A promoted request that the transport refuses
    /// completes with that error here; its caller already saw `send`
    /// succeed, so the callback is the only remaining signal.
    fn release_slot_and_dispatch(&self, dest: &Destination) {
        let mut pending = self.shared.tracker.release(&dest.addr);
        while let Some(obj) = pending.pop() {
            let obj_dest = obj.destination().cloned().unwrap_or_else(|| dest.clone());
            match self.send_immediately(&obj, &obj_dest) {
                Ok(()) => {}
                Err(err) => {
                    log::warn!(
                        "opc {}: queued dispatch to {} failed: {}",
                        obj.opcode(),
                        obj_dest,
                        err
                    );
                    deliver_completion(&obj, Err(err));
                    pending.extend(self.shared.tracker.release(&obj_dest.addr));
                    let _ = obj.dec_ref();
                }
            }
        }
    }
}
