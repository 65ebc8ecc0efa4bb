// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Mcbridge is a protocol-translating cache proxy. Clients speak the
//! memcache binary protocol to the proxy; each request is reframed as the
//! matching ASCII command and forwarded to an upstream server, and the
//! text reply is translated back into a binary response. Many client
//! connections are multiplexed onto a small pool of persistent upstream
//! connections.
//!
//! Only the retrieval, storage, and deletion families are translated
//! (`get/getq/getk/getkq`, `set/setq/add/addq`, `delete/deleteq`); any
//! other opcode terminates the client connection.

pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod listener;
pub mod net;
pub mod session;
pub mod trace;

pub use config::Config;
pub use error::{ProxyError, ProxyResult};
pub use listener::Mcbridge;
