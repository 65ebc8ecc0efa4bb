// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The fixed-header parts of the memcache binary protocol: magic values,
//! the opcode and status tables, and the 24-byte request and response
//! header layouts.

use core::fmt;

mod request;
mod response;

pub use request::RequestHeader;
pub use response::{ResponseHeader, ResponseStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicValue {
    Unknown(u8),
    Request,
    Response,
}

impl MagicValue {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x80 => MagicValue::Request,
            0x81 => MagicValue::Response,
            other => MagicValue::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MagicValue::Unknown(other) => other,
            MagicValue::Request => 0x80,
            MagicValue::Response => 0x81,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Unknown(u8),
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Increment,
    Decrement,
    Quit,
    Flush,
    Getq,
    Noop,
    Version,
    Getk,
    Getkq,
    Append,
    Prepend,
    Stat,
    Setq,
    Addq,
    Replaceq,
    Deleteq,
    Incrementq,
    Decrementq,
    Quitq,
    Flushq,
    Appendq,
    Prependq,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x03 => Opcode::Replace,
            0x04 => Opcode::Delete,
            0x05 => Opcode::Increment,
            0x06 => Opcode::Decrement,
            0x07 => Opcode::Quit,
            0x08 => Opcode::Flush,
            0x09 => Opcode::Getq,
            0x0a => Opcode::Noop,
            0x0b => Opcode::Version,
            0x0c => Opcode::Getk,
            0x0d => Opcode::Getkq,
            0x0e => Opcode::Append,
            0x0f => Opcode::Prepend,
            0x10 => Opcode::Stat,
            0x11 => Opcode::Setq,
            0x12 => Opcode::Addq,
            0x13 => Opcode::Replaceq,
            0x14 => Opcode::Deleteq,
            0x15 => Opcode::Incrementq,
            0x16 => Opcode::Decrementq,
            0x17 => Opcode::Quitq,
            0x18 => Opcode::Flushq,
            0x19 => Opcode::Appendq,
            0x1a => Opcode::Prependq,
            other => Opcode::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Opcode::Unknown(other) => other,
            Opcode::Get => 0x00,
            Opcode::Set => 0x01,
            Opcode::Add => 0x02,
            Opcode::Replace => 0x03,
            Opcode::Delete => 0x04,
            Opcode::Increment => 0x05,
            Opcode::Decrement => 0x06,
            Opcode::Quit => 0x07,
            Opcode::Flush => 0x08,
            Opcode::Getq => 0x09,
            Opcode::Noop => 0x0a,
            Opcode::Version => 0x0b,
            Opcode::Getk => 0x0c,
            Opcode::Getkq => 0x0d,
            Opcode::Append => 0x0e,
            Opcode::Prepend => 0x0f,
            Opcode::Stat => 0x10,
            Opcode::Setq => 0x11,
            Opcode::Addq => 0x12,
            Opcode::Replaceq => 0x13,
            Opcode::Deleteq => 0x14,
            Opcode::Incrementq => 0x15,
            Opcode::Decrementq => 0x16,
            Opcode::Quitq => 0x17,
            Opcode::Flushq => 0x18,
            Opcode::Appendq => 0x19,
            Opcode::Prependq => 0x1a,
        }
    }

    /// Returns true for the "quiet" variants which suppress the reply on
    /// success.
    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            Opcode::Getq
                | Opcode::Getkq
                | Opcode::Setq
                | Opcode::Addq
                | Opcode::Replaceq
                | Opcode::Deleteq
                | Opcode::Incrementq
                | Opcode::Decrementq
                | Opcode::Quitq
                | Opcode::Flushq
                | Opcode::Appendq
                | Opcode::Prependq
        )
    }

    pub fn is_retrieval(self) -> bool {
        matches!(
            self,
            Opcode::Get | Opcode::Getq | Opcode::Getk | Opcode::Getkq
        )
    }

    pub fn is_storage(self) -> bool {
        matches!(
            self,
            Opcode::Set | Opcode::Setq | Opcode::Add | Opcode::Addq
        )
    }

    pub fn is_deletion(self) -> bool {
        matches!(self, Opcode::Delete | Opcode::Deleteq)
    }

    /// The ASCII command verb this opcode translates to, or `None` if the
    /// opcode has no text-protocol counterpart. Quiet variants map to
    /// their non-quiet cousins since the text server always replies.
    pub fn text_command(self) -> Option<&'static str> {
        match self {
            Opcode::Get | Opcode::Getq | Opcode::Getk | Opcode::Getkq => Some("get"),
            Opcode::Set | Opcode::Setq => Some("set"),
            Opcode::Add | Opcode::Addq => Some("add"),
            Opcode::Delete | Opcode::Deleteq => Some("delete"),
            _ => None,
        }
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Opcode::Unknown(_) => None,
            Opcode::Get => Some("GET"),
            Opcode::Set => Some("SET"),
            Opcode::Add => Some("ADD"),
            Opcode::Replace => Some("REPLACE"),
            Opcode::Delete => Some("DELETE"),
            Opcode::Increment => Some("INCREMENT"),
            Opcode::Decrement => Some("DECREMENT"),
            Opcode::Quit => Some("QUIT"),
            Opcode::Flush => Some("FLUSH"),
            Opcode::Getq => Some("GETQ"),
            Opcode::Noop => Some("NOOP"),
            Opcode::Version => Some("VERSION"),
            Opcode::Getk => Some("GETK"),
            Opcode::Getkq => Some("GETKQ"),
            Opcode::Append => Some("APPEND"),
            Opcode::Prepend => Some("PREPEND"),
            Opcode::Stat => Some("STAT"),
            Opcode::Setq => Some("SETQ"),
            Opcode::Addq => Some("ADDQ"),
            Opcode::Replaceq => Some("REPLACEQ"),
            Opcode::Deleteq => Some("DELETEQ"),
            Opcode::Incrementq => Some("INCREMENTQ"),
            Opcode::Decrementq => Some("DECREMENTQ"),
            Opcode::Quitq => Some("QUITQ"),
            Opcode::Flushq => Some("FLUSHQ"),
            Opcode::Appendq => Some("APPENDQ"),
            Opcode::Prependq => Some("PREPENDQ"),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:02x}", self.to_u8()),
        }
    }
}
