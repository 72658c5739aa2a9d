// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Opcode registry: maps an operation code to fixed-size input/output
//! buffer layouts and an optional server-side handler.
//!
//! The registry is an explicit value handed to the engine at construction
//! time, not a process-wide singleton. Callers build it once, register
//! every opcode their protocol uses, and share it via `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, RpcResult};

/// Operation code identifying one RPC type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u32);

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Server-side handler: consumes the request bytes, fills the reply bytes.
///
/// Runs on a progress thread; must not block.
pub type RpcHandler = Arc<dyn Fn(&[u8], &mut [u8]) -> Result<(), i32> + Send + Sync>;

/// Upper bound on a registered input buffer size.
pub const MAX_INPUT_SIZE: usize = 1 << 26;
/// Upper bound on a registered output buffer size.
pub const MAX_OUTPUT_SIZE: usize = 1 << 26;

/// Buffer layout and handler for one opcode.
#[derive(Clone)]
pub struct OpcodeEntry {
    /// Request buffer size in bytes (0 = no request payload).
    pub input_size: usize,
    /// Reply buffer size in bytes (0 = no reply payload).
    pub output_size: usize,
    /// Server-side handler, if this process serves the opcode.
    pub handler: Option<RpcHandler>,
}

impl std::fmt::Debug for OpcodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcodeEntry")
            .field("input_size", &self.input_size)
            .field("output_size", &self.output_size)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Thread-safe opcode table.
#[derive(Default)]
pub struct OpcodeRegistry {
    entries: RwLock<HashMap<Opcode, OpcodeEntry>>,
}

impl OpcodeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opcode. Re-registering replaces the previous entry.
    ///
    /// Fails with `OutOfMemory` when a buffer size exceeds the hard cap,
    /// so that `create` never has to size an unreasonable allocation.
    pub fn register(&self, opcode: Opcode, entry: OpcodeEntry) -> RpcResult<()> {
        if entry.input_size > MAX_INPUT_SIZE || entry.output_size > MAX_OUTPUT_SIZE {
            log::error!(
                "opc {}: buffer sizes {}/{} exceed cap",
                opcode,
                entry.input_size,
                entry.output_size
            );
            return Err(Error::OutOfMemory);
        }
        self.entries.write().insert(opcode, entry);
        Ok(())
    }

    /// Look up the entry for an opcode.
    pub fn lookup(&self, opcode: Opcode) -> RpcResult<OpcodeEntry> {
        self.entries
            .read()
            .get(&opcode)
            .cloned()
            .ok_or(Error::UnknownOpcode(opcode.0))
    }

    /// All registered opcodes, sorted.
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut opcodes: Vec<Opcode> = self.entries.read().keys().copied().collect();
        opcodes.sort_unstable();
        opcodes
    }
}
