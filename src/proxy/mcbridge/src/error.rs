// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use protocol_memcache::Opcode;
use thiserror::Error;

pub type ProxyResult<T = ()> = Result<T, ProxyError>;

/// Faults that terminate a client bridge. Protocol-level outcomes from
/// the upstream (miss, not-stored, and the error reply lines) are not
/// errors: they are translated into binary statuses and returned to the
/// client while the bridge keeps running.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("deadline exceeded: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("connect timeout to {addr}")]
    ConnectTimeout { addr: String },
    #[error("no servers configured or available")]
    NoServers,
    #[error("bad magic: 0x{0:02x}")]
    BadMagic(u8),
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(Opcode),
    #[error("extras length {0} invalid for storage command")]
    BadExtras(u8),
    #[error("malformed request header")]
    MalformedHeader,
    #[error("body length {0} is too big")]
    OversizedBody(u64),
    #[error("unexpected reply: {0:?}")]
    MalformedReply(String),
}
