// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the RPC engine.

use std::fmt;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, Error>;

/// Errors that can occur during RPC operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null/out-of-range parameter (empty group, rank outside group, ...)
    InvalidArgument(String),

    /// Opcode has no registry entry
    UnknownOpcode(u32),

    /// Object or buffer allocation refused (registry size cap exceeded)
    OutOfMemory,

    /// Group is not known to the membership service
    GroupNotFound(String),

    /// Exclusion set references a rank outside the group
    InvalidExclusionSet(u32),

    /// Opaque passthrough from the transport (network or remote handler)
    Transport(i32),

    /// Synchronous wait deadline elapsed; the RPC itself is not cancelled
    Timeout,

    /// API misuse: double dec-ref, send on a non-inited object, ...
    InvalidState(&'static str),
}

impl Error {
    /// Create an `InvalidArgument` error from any message.
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Numeric code carried by a transport error, if any.
    #[must_use]
    pub fn transport_code(&self) -> Option<i32> {
        match self {
            Self::Transport(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::UnknownOpcode(opc) => write!(f, "unknown opcode {:#x}", opc),
            Self::OutOfMemory => write!(f, "allocation refused"),
            Self::GroupNotFound(name) => write!(f, "group not found: {}", name),
            Self::InvalidExclusionSet(rank) => {
                write!(f, "excluded rank {} is not a group member", rank)
            }
            Self::Transport(code) => write!(f, "transport error {}", code),
            Self::Timeout => write!(f, "wait timed out"),
            Self::InvalidState(msg) => write!(f, "invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
