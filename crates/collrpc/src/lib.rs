// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # collrpc - RPC lifecycle and collective-operation engine
//!
//! The request/reply core of an RPC runtime for distributed storage
//! clusters: it owns every in-flight RPC object from creation to
//! completion, multiplexes point-to-point calls, and implements a
//! collective RPC that fans one logical call out to every member of a
//! process group and aggregates the replies into a single completion.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use collrpc::{
//!     Destination, EngineConfig, GroupTable, LoopbackTransport, Opcode,
//!     OpcodeEntry, OpcodeRegistry, RpcEngine,
//! };
//!
//! fn main() -> collrpc::RpcResult<()> {
//!     let registry = Arc::new(OpcodeRegistry::new());
//!     registry.register(
//!         Opcode(0x01),
//!         OpcodeEntry {
//!             input_size: 8,
//!             output_size: 8,
//!             handler: Some(Arc::new(|input, output| {
//!                 output.copy_from_slice(input);
//!                 Ok(())
//!             })),
//!         },
//!     )?;
//!
//!     let groups = GroupTable::new().into_shared();
//!     let transport = Arc::new(LoopbackTransport::new(registry.clone()));
//!     let engine = RpcEngine::new(registry, groups, transport, EngineConfig::default());
//!
//!     let rpc = engine.create(Opcode(0x01), Destination::direct("node0"))?;
//!     rpc.input_mut().copy_from_slice(&42u64.to_le_bytes());
//!     engine.send_sync(&rpc, Duration::from_secs(5))?;
//!     assert_eq!(&*rpc.output(), &42u64.to_le_bytes());
//!     rpc.dec_ref()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            Callers                                 |
//! |   create / create_collective -> send / corpc_send -> callback      |
//! +--------------------------------------------------------------------+
//! |                           RpcEngine                                |
//! |   RPC objects (refcounted) | in-flight tracker | collective fan-out|
//! +--------------------------------------------------------------------+
//! |                     External collaborators                         |
//! |   OpcodeRegistry | Membership | Transport (progress + completions) |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Completions run on whichever thread drives [`Transport::progress`];
//! the engine owns no threads of its own. Each RPC object carries its own
//! lock, an explicit reference count, and a one-shot completion callback
//! that fires exactly once no matter how completions interleave.

/// Error taxonomy and result alias.
pub mod error;
/// Group membership interface and in-memory table.
pub mod group;
/// Opcode registry (injected typed table).
pub mod registry;
/// RPC object model, send paths, collective engine, wait helper.
pub mod rpc;
/// Transport interface and the in-process loopback implementation.
pub mod transport;

pub use error::{Error, RpcResult};
pub use group::{Destination, GroupId, GroupTable, Membership, Rank};
pub use registry::{Opcode, OpcodeEntry, OpcodeRegistry, RpcHandler};
pub use rpc::{AggregateFn, CompletionCallback, EngineConfig, RpcEngine, RpcObject, RpcState};
pub use transport::loopback::LoopbackTransport;
pub use transport::{SendCompletion, Transport, TransportHandle, TransportReply};
