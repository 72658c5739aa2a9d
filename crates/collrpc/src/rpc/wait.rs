// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synchronous wait over the transport's progress primitive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, RpcResult};

use super::{RpcEngine, RpcObject};

impl RpcEngine {
    /// Block until `obj` completes or `timeout` elapses, driving the
    /// transport's progress primitive in short slices.
    ///
    /// A zero `timeout` selects the engine's default sync deadline, not an
    /// infinite wait. `Timeout` does not cancel the RPC: it may still
    /// complete later and will still run its completion callback.
    pub fn wait(&self, obj: &Arc<RpcObject>, timeout: Duration) -> RpcResult<()> {
        let timeout = if timeout.is_zero() {
            self.shared.config.default_sync_timeout
        } else {
            timeout
        };
        // A timeout too large to represent as an instant never expires.
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if obj.is_completed() {
                return obj.result().unwrap_or(Ok(()));
            }

            self.shared
                .transport
                .progress(self.shared.config.progress_slice)?;

            if obj.is_completed() {
                return obj.result().unwrap_or(Ok(()));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                log::debug!("opc {} xid {}: wait timed out", obj.opcode(), obj.xid());
                return Err(Error::Timeout);
            }
        }
    }

    /// Send and wait in one call.
    ///
    /// The completion signal is the object's own done flag, so no caller
    /// callback is needed; the result code is returned synchronously. On a
    /// failed send the object is destroyed, exactly as with `send`.
    pub fn send_sync(&self, obj: &Arc<RpcObject>, timeout: Duration) -> RpcResult<()> {
        self.send(obj, Box::new(|_, _| {}))?;
        self.wait(obj, timeout)
    }
}
