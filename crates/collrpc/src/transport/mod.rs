// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport interface consumed by the RPC engine.
//!
//! The engine never touches the wire. It asks the transport for a handle,
//! hands it the request bytes together with a completion closure, and
//! drives [`Transport::progress`] (directly from `wait`, or from dedicated
//! progress threads). The transport invokes the completion closure from
//! inside `progress` once the reply (or failure) for that handle is known.
//!
//! [`LoopbackTransport`](loopback::LoopbackTransport) is the in-process
//! implementation used by tests and single-process deployments.

pub mod loopback;

use std::time::Duration;

use crate::error::RpcResult;
use crate::group::Destination;
use crate::registry::Opcode;

/// Correlation id assigned by the transport when a handle is created.
///
/// Doubles as the opaque handle token: one outstanding request per id.
pub type TransportHandle = u64;

/// Outcome of one send, delivered through the completion closure.
#[derive(Debug)]
pub struct TransportReply {
    /// `Ok` when the remote handler ran and replied; `Err` carries the
    /// transport's numeric error code (network or remote-handler failure).
    pub status: Result<(), i32>,
    /// Reply bytes. Empty on failure.
    pub output: Vec<u8>,
}

/// Completion closure invoked by the transport on a progress thread.
pub type SendCompletion = Box<dyn FnOnce(TransportReply) + Send>;

/// Wire transport and progress engine.
pub trait Transport: Send + Sync {
    /// Allocate a handle for one request to `dest`.
    fn create_handle(&self, dest: &Destination, opcode: Opcode) -> RpcResult<TransportHandle>;

    /// Submit the request bytes for a handle.
    ///
    /// A synchronous error means nothing was put on the wire and
    /// `on_complete` will never be invoked. After `Ok`, the outcome is
    /// delivered exactly once through `on_complete`.
    fn send(
        &self,
        handle: TransportHandle,
        input: &[u8],
        on_complete: SendCompletion,
    ) -> RpcResult<()>;

    /// Drive one round of I/O, invoking any completion closures that are
    /// ready. Blocks at most `slice` when nothing is ready.
    fn progress(&self, slice: Duration) -> RpcResult<()>;

    /// Release a handle once its completion has been processed.
    fn destroy_handle(&self, handle: TransportHandle);
}
