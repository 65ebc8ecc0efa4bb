// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The accept frame: binds the local address, accepts client connections
//! with backoff on transient failures, and hands each one to the bridge
//! with buffered session I/O drawn from the process-wide pools.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::backend::{BackendClient, ServerList};
use crate::config::Config;
use crate::frontend;
use crate::net::{Listener, ServerAddr, Stream};
use crate::session::{SessionReader, SessionWriter, READ_BUFFER_POOL, WRITE_BUFFER_POOL};

/// This structure represents a running `Mcbridge` process.
pub struct Mcbridge {
    runtime: Runtime,
    local_addr: Option<SocketAddr>,
}

impl Mcbridge {
    /// Creates a new [Mcbridge] process from the given [Config]. The
    /// listener is bound before this returns, so a caller that bound port
    /// zero can immediately read the address back.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        // level 0 attaches the byte-tracing decorators to both directions
        let trace = config.verbose() == 0;

        let selector = ServerList::new();
        selector.set_servers(config.endpoints())?;

        let client = Arc::new(BackendClient::new(selector, config.timeout(), trace));

        let runtime = Builder::new_multi_thread().enable_all().build()?;

        let listen = ServerAddr::parse(config.listen())?;
        let listener = runtime.block_on(Listener::bind(&listen))?;
        let local_addr = listener.local_addr();

        info!("listening on {listen}");
        runtime.spawn(serve(listener, client, trace));

        Ok(Self {
            runtime,
            local_addr,
        })
    }

    /// The bound TCP address, when listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Block until the process is interrupted.
    pub fn wait(self) {
        self.runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("got interrupt signal");
            }
        });
        self.runtime.shutdown_timeout(Duration::from_millis(100));
    }

    /// Tear the process down without waiting for connections to drain.
    /// This is more likely to be used for running integration tests.
    pub fn shutdown(self) {
        self.runtime.shutdown_timeout(Duration::from_millis(100));
    }
}

async fn serve(listener: Listener, client: Arc<BackendClient>, trace: bool) {
    let mut delay = Duration::ZERO;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                delay = Duration::ZERO;
                debug!("accept connection from {peer}");

                let client = client.clone();
                tokio::spawn(async move {
                    // an inner task isolates a panicking bridge from the
                    // accept loop and lets it be logged
                    let session =
                        tokio::spawn(handle_session(stream, peer.clone(), client, trace));
                    if let Err(e) = session.await {
                        if e.is_panic() {
                            error!("panic serving {peer}: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                // accept failures are treated as transient, with backoff
                delay = if delay.is_zero() {
                    Duration::from_millis(5)
                } else {
                    (delay * 2).min(Duration::from_secs(1))
                };
                error!("accept error: {e}; retrying in {delay:?}");
                sleep(delay).await;
            }
        }
    }
}

async fn handle_session(stream: Stream, peer: String, client: Arc<BackendClient>, trace: bool) {
    let stream = if trace {
        stream.traced("client")
    } else {
        stream
    };

    let (rd, wr) = tokio::io::split(stream);
    let client_rd = SessionReader::new(rd, READ_BUFFER_POOL.get());
    let client_wr = SessionWriter::new(wr, WRITE_BUFFER_POOL.get());

    let (result, session) = frontend::bridge(client_rd, client_wr, &client).await;

    match &result {
        Ok(()) => debug!("close connection from {peer}"),
        Err(e) => debug!("connection from {peer} closed: {e}"),
    }

    if let Some((rd, mut wr)) = session {
        // final flush, then recycle the session buffers
        let _ = wr.flush().await;
        let (_, buf) = rd.into_parts();
        READ_BUFFER_POOL.put(buf);
        let (_, buf) = wr.into_parts();
        WRITE_BUFFER_POOL.put(buf);
    }
}
