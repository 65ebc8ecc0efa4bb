// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Wire-format support for the memcache protocols. The `binary` module
//! covers the fixed-header binary encoding: magic values, the opcode and
//! status tables, and request/response header framing. The `text` module
//! parses the line-oriented replies an ASCII server produces.
//!
//! This crate is transport-agnostic: it deals in byte slices and
//! [`bytes::BufMut`] sinks, never in sockets.

pub mod binary;
pub mod text;

pub use binary::{MagicValue, Opcode, RequestHeader, ResponseHeader, ResponseStatus};
pub use text::ReplyLine;

pub const CRLF: &[u8] = b"\r\n";

/// Number of bytes in a binary protocol header.
pub const HDR_LEN: usize = 24;

/// Largest value payload accepted in a single request.
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;
