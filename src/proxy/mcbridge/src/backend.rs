// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The upstream side: server selection and a small pool of persistent
//! connections. Each address keeps a bounded idle list; a connection goes
//! back on the list only when its bridge ended cleanly, since any
//! transport or framing fault leaves the socket in an unknown state.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{ProxyError, ProxyResult};
use crate::net::{ServerAddr, Stream};
use crate::session::{SessionReader, SessionWriter, READ_BUFFER_SIZE, WRITE_BUFFER_SIZE};

const MAX_IDLE_CONNS_PER_ADDR: usize = 2;

/// An ordered set of upstream addresses. Selection is uniformly random;
/// the key is accepted for interface compatibility but not consulted.
#[derive(Default)]
pub struct ServerList {
    addrs: Mutex<Vec<ServerAddr>>,
}

impl ServerList {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_servers(&self, servers: &[String]) -> std::io::Result<()> {
        let mut resolved = Vec::with_capacity(servers.len());
        for server in servers {
            resolved.push(ServerAddr::parse(server)?);
        }

        *self.addrs.lock() = resolved;
        Ok(())
    }

    pub fn pick_server(&self, _key: &str) -> ProxyResult<ServerAddr> {
        let addrs = self.addrs.lock();
        if addrs.is_empty() {
            return Err(ProxyError::NoServers);
        }

        Ok(addrs[rand::thread_rng().gen_range(0..addrs.len())].clone())
    }
}

/// One pooled upstream connection: buffered halves over the raw stream.
/// The buffers stay attached across checkouts so no bytes are lost when
/// the connection is recycled.
pub struct BackendConn {
    reader: BackendReader,
    writer: BackendWriter,
}

impl std::fmt::Debug for BackendConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConn").finish_non_exhaustive()
    }
}

impl BackendConn {
    fn new(stream: Stream, addr: String, deadline: Duration) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: BackendReader {
                addr,
                inner: SessionReader::new(rd, vec![0; READ_BUFFER_SIZE]),
                deadline,
            },
            writer: BackendWriter {
                inner: SessionWriter::new(wr, vec![0; WRITE_BUFFER_SIZE]),
                deadline,
            },
        }
    }

    fn addr(&self) -> &str {
        &self.reader.addr
    }

    pub fn split(self) -> (BackendReader, BackendWriter) {
        (self.reader, self.writer)
    }

    pub fn reunite(reader: BackendReader, writer: BackendWriter) -> Self {
        Self { reader, writer }
    }
}

/// Read half of an upstream connection. Every operation runs under a
/// fresh deadline, the async equivalent of sliding the socket deadline
/// forward on each touch.
pub struct BackendReader {
    addr: String,
    inner: SessionReader<ReadHalf<Stream>>,
    deadline: Duration,
}

impl BackendReader {
    pub async fn read_line(&mut self, line: &mut Vec<u8>) -> ProxyResult<()> {
        timeout(self.deadline, self.inner.read_line(line)).await??;
        trace!("reply line: {:?}", String::from_utf8_lossy(line));
        Ok(())
    }

    pub async fn read_exact(&mut self, dst: &mut [u8]) -> ProxyResult<()> {
        timeout(self.deadline, self.inner.read_exact(dst)).await??;
        Ok(())
    }
}

/// Write half of an upstream connection, same deadline discipline.
pub struct BackendWriter {
    inner: SessionWriter<WriteHalf<Stream>>,
    deadline: Duration,
}

impl BackendWriter {
    pub async fn write_all(&mut self, src: &[u8]) -> ProxyResult<()> {
        timeout(self.deadline, self.inner.write_all(src)).await??;
        Ok(())
    }

    pub async fn flush(&mut self) -> ProxyResult<()> {
        timeout(self.deadline, self.inner.flush()).await??;
        Ok(())
    }
}

/// Hands out upstream connections, preferring the idle list over a fresh
/// dial.
pub struct BackendClient {
    selector: ServerList,
    deadline: Duration,
    trace: bool,
    free: Mutex<HashMap<String, Vec<BackendConn>>>,
}

impl BackendClient {
    pub fn new(selector: ServerList, deadline: Duration, trace: bool) -> Self {
        Self {
            selector,
            deadline,
            trace,
            free: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pick_conn(&self, key: &str) -> ProxyResult<BackendConn> {
        let addr = self.selector.pick_server(key)?;
        if let Some(conn) = self.get_free_conn(&addr) {
            return Ok(conn);
        }
        self.dial(&addr).await
    }

    fn get_free_conn(&self, addr: &ServerAddr) -> Option<BackendConn> {
        let mut free = self.free.lock();
        let conn = free.get_mut(&addr.to_string())?.pop();
        if conn.is_some() {
            debug!("reusing idle connection to {addr}");
        }
        conn
    }

    fn put_free_conn(&self, conn: BackendConn) {
        let mut free = self.free.lock();
        let list = free.entry(conn.addr().to_string()).or_default();
        if list.len() >= MAX_IDLE_CONNS_PER_ADDR {
            // dropping the connection closes it
            return;
        }
        list.push(conn);
    }

    async fn dial(&self, addr: &ServerAddr) -> ProxyResult<BackendConn> {
        match timeout(self.deadline, Stream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!("connected to {addr}");
                let stream = if self.trace {
                    stream.traced("backend")
                } else {
                    stream
                };
                Ok(BackendConn::new(stream, addr.to_string(), self.deadline))
            }
            Ok(Err(e)) => Err(e.into()),
            // dropping the connect future aborts the in-flight dial, so a
            // late success cannot leak a socket
            Err(_) => Err(ProxyError::ConnectTimeout {
                addr: addr.to_string(),
            }),
        }
    }

    /// Recycle the connection if the bridge over it ended cleanly;
    /// any fault means the socket may have half a conversation in flight,
    /// so it is closed instead.
    pub fn cond_release(&self, conn: BackendConn, result: &ProxyResult<()>) {
        match result {
            Ok(()) => self.put_free_conn(conn),
            Err(e) => {
                debug!("closing connection to {}: {e}", conn.addr());
            }
        }
    }
}
