// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! Sends are queued and served during [`Transport::progress`]: the
//! registered handler for the opcode runs against a fresh reply buffer and
//! the completion closure fires on the progress thread, exactly like a
//! wire transport would deliver a remote reply.
//!
//! Fault injection hooks let tests exercise the failure paths:
//! - [`fail_destination`](LoopbackTransport::fail_destination): requests
//!   reach the transport but complete with the given error code.
//! - [`refuse_destination`](LoopbackTransport::refuse_destination): the
//!   send call itself fails synchronously.
//! - [`drop_destination`](LoopbackTransport::drop_destination): requests
//!   are accepted and never complete (for timeout tests).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::error::{Error, RpcResult};
use crate::group::Destination;
use crate::registry::{Opcode, OpcodeRegistry};
use crate::transport::{SendCompletion, Transport, TransportHandle, TransportReply};

/// Error code completed for opcodes registered without a handler.
pub const NO_HANDLER_RC: i32 = -2003;

struct HandleInfo {
    dest: Destination,
    opcode: Opcode,
}

struct QueuedSend {
    handle: TransportHandle,
    input: Vec<u8>,
    on_complete: SendCompletion,
}

/// Loopback transport serving handlers from an [`OpcodeRegistry`].
pub struct LoopbackTransport {
    registry: Arc<OpcodeRegistry>,
    next_handle: AtomicU64,
    handles: DashMap<TransportHandle, HandleInfo>,
    ready: SegQueue<QueuedSend>,
    // addr -> injected error code
    faults: DashMap<String, i32>,
    refused: DashMap<String, i32>,
    dropped: DashMap<String, ()>,
}

impl LoopbackTransport {
    /// Create a loopback transport serving the given registry's handlers.
    #[must_use]
    pub fn new(registry: Arc<OpcodeRegistry>) -> Self {
        Self {
            registry,
            next_handle: AtomicU64::new(1),
            handles: DashMap::new(),
            ready: SegQueue::new(),
            faults: DashMap::new(),
            refused: DashMap::new(),
            dropped: DashMap::new(),
        }
    }

    /// Complete every request to `addr` with `code` instead of running the
    /// handler.
    pub fn fail_destination(&self, addr: impl Into<String>, code: i32) {
        self.faults.insert(addr.into(), code);
    }

    /// Make `send` to `addr` fail synchronously with `code`.
    pub fn refuse_destination(&self, addr: impl Into<String>, code: i32) {
        self.refused.insert(addr.into(), code);
    }

    /// Accept requests to `addr` and never complete them.
    pub fn drop_destination(&self, addr: impl Into<String>) {
        self.dropped.insert(addr.into(), ());
    }

    /// Clear all injected faults.
    pub fn clear_faults(&self) {
        self.faults.clear();
        self.refused.clear();
        self.dropped.clear();
    }

    #[cfg(test)]
    fn handle_count(&self) -> usize {
        self.handles.len()
    }

    fn serve(&self, queued: QueuedSend) {
        // Clone out of the handle table before invoking the completion:
        // the closure may call back into destroy_handle.
        let (dest, opcode) = match self.handles.get(&queued.handle) {
            Some(info) => (info.dest.clone(), info.opcode),
            None => {
                log::error!("loopback: completion for unknown handle {}", queued.handle);
                return;
            }
        };

        if let Some(code) = self.faults.get(&dest.addr).map(|c| *c) {
            log::debug!(
                "loopback: injected failure {} for {} (handle {})",
                code,
                dest,
                queued.handle
            );
            (queued.on_complete)(TransportReply {
                status: Err(code),
                output: Vec::new(),
            });
            return;
        }

        let reply = match self.registry.lookup(opcode) {
            Ok(entry) => {
                let mut output = vec![0u8; entry.output_size];
                match entry.handler {
                    Some(handler) => match handler(&queued.input, &mut output) {
                        Ok(()) => TransportReply {
                            status: Ok(()),
                            output,
                        },
                        Err(code) => TransportReply {
                            status: Err(code),
                            output: Vec::new(),
                        },
                    },
                    None => TransportReply {
                        status: Err(NO_HANDLER_RC),
                        output: Vec::new(),
                    },
                }
            }
            Err(_) => TransportReply {
                status: Err(NO_HANDLER_RC),
                output: Vec::new(),
            },
        };

        (queued.on_complete)(reply);
    }
}

impl Transport for LoopbackTransport {
    fn create_handle(&self, dest: &Destination, opcode: Opcode) -> RpcResult<TransportHandle> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            handle,
            HandleInfo {
                dest: dest.clone(),
                opcode,
            },
        );
        Ok(handle)
    }

    fn send(
        &self,
        handle: TransportHandle,
        input: &[u8],
        on_complete: SendCompletion,
    ) -> RpcResult<()> {
        let Some(info) = self.handles.get(&handle) else {
            return Err(Error::InvalidState("send on unknown transport handle"));
        };

        if let Some(code) = self.refused.get(&info.dest.addr) {
            return Err(Error::Transport(*code));
        }
        if self.dropped.contains_key(&info.dest.addr) {
            log::debug!("loopback: dropping request to {}", info.dest);
            drop(info);
            // No completion will ever reference this handle again.
            self.handles.remove(&handle);
            return Ok(());
        }
        drop(info);

        self.ready.push(QueuedSend {
            handle,
            input: input.to_vec(),
            on_complete,
        });
        Ok(())
    }

    fn progress(&self, slice: Duration) -> RpcResult<()> {
        let mut served = 0usize;
        // Drain only what is queued at entry; completions may enqueue
        // follow-up sends, which belong to the next round.
        let batch = self.ready.len();
        while served < batch {
            let Some(queued) = self.ready.pop() else { break };
            self.serve(queued);
            served += 1;
        }

        if served == 0 && !slice.is_zero() {
            std::thread::sleep(slice);
        }
        Ok(())
    }

    fn destroy_handle(&self, handle: TransportHandle) {
        self.handles.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OpcodeEntry;
    use std::sync::atomic::AtomicBool;

    fn registry_with_echo(opc: Opcode) -> Arc<OpcodeRegistry> {
        let registry = OpcodeRegistry::new();
        registry
            .register(
                opc,
                OpcodeEntry {
                    input_size: 4,
                    output_size: 4,
                    handler: Some(Arc::new(|input, output| {
                        output.copy_from_slice(input);
                        Ok(())
                    })),
                },
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_serve_handler_on_progress() {
        let opc = Opcode(0x30);
        let transport = LoopbackTransport::new(registry_with_echo(opc));
        let dest = Destination::direct("node0");
        let handle = transport.create_handle(&dest, opc).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_cl = fired.clone();
        transport
            .send(
                handle,
                &[1, 2, 3, 4],
                Box::new(move |reply| {
                    assert_eq!(reply.status, Ok(()));
                    assert_eq!(reply.output, vec![1, 2, 3, 4]);
                    fired_cl.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(!fired.load(Ordering::SeqCst));
        transport.progress(Duration::ZERO).unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_injected_fault() {
        let opc = Opcode(0x31);
        let transport = LoopbackTransport::new(registry_with_echo(opc));
        let dest = Destination::direct("bad");
        transport.fail_destination("bad", 7);

        let handle = transport.create_handle(&dest, opc).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_cl = fired.clone();
        transport
            .send(
                handle,
                &[0, 0, 0, 0],
                Box::new(move |reply| {
                    assert_eq!(reply.status, Err(7));
                    fired_cl.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();
        transport.progress(Duration::ZERO).unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_send_releases_handle() {
        let opc = Opcode(0x33);
        let transport = LoopbackTransport::new(registry_with_echo(opc));
        transport.drop_destination("hole");

        let dest = Destination::direct("hole");
        let handle = transport.create_handle(&dest, opc).unwrap();
        assert_eq!(transport.handle_count(), 1);

        transport
            .send(
                handle,
                &[0, 0, 0, 0],
                Box::new(|_| panic!("dropped request must not complete")),
            )
            .unwrap();
        assert_eq!(transport.handle_count(), 0);

        transport.progress(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_refused_send() {
        let opc = Opcode(0x32);
        let transport = LoopbackTransport::new(registry_with_echo(opc));
        transport.refuse_destination("gone", 13);

        let dest = Destination::direct("gone");
        let handle = transport.create_handle(&dest, opc).unwrap();
        let rc = transport.send(handle, &[0, 0, 0, 0], Box::new(|_| {}));
        assert_eq!(rc, Err(Error::Transport(13)));
    }
}
