// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The per-connection bridge. Two cooperating tasks serve one client: the
//! request task parses binary requests and reframes them as text
//! commands, the response task parses text replies and composes binary
//! responses. They share a bounded FIFO of opcodes - the text protocol
//! carries no correlation id, so the channel head is by construction the
//! opcode of the oldest unanswered reply, and responses stay strictly
//! pipelined.

use bytes::{BufMut, BytesMut};
use protocol_memcache::{
    Opcode, ReplyLine, RequestHeader, ResponseHeader, ResponseStatus, CRLF, HDR_LEN,
    MAX_VALUE_SIZE,
};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::backend::{BackendClient, BackendConn, BackendReader, BackendWriter};
use crate::error::{ProxyError, ProxyResult};
use crate::net::Stream;
use crate::session::{SessionReader, SessionWriter};

/// Requests in flight per client connection before the request side
/// blocks, backpressuring the client against a slow upstream.
const PIPELINE_DEPTH: usize = 256;

const BODY_CHUNK_SIZE: usize = 4096;

pub type ClientReader = SessionReader<ReadHalf<Stream>>;
pub type ClientWriter = SessionWriter<WriteHalf<Stream>>;

enum Pending {
    Op(Opcode),
    Quit,
}

/// Run the bridge for one client connection. Returns the exit status and,
/// when both pipelines wound down normally, the client session halves so
/// the caller can recycle their buffers.
pub async fn bridge(
    client_rd: ClientReader,
    client_wr: ClientWriter,
    backend: &BackendClient,
) -> (ProxyResult<()>, Option<(ClientReader, ClientWriter)>) {
    let conn = match backend.pick_conn("").await {
        Ok(conn) => conn,
        Err(e) => return (Err(e), Some((client_rd, client_wr))),
    };
    let (backend_rd, backend_wr) = conn.split();

    let (tx, rx) = mpsc::channel(PIPELINE_DEPTH);

    let mut request = tokio::spawn(request_task(client_rd, backend_wr, tx));
    let mut response = tokio::spawn(response_task(backend_rd, client_wr, rx));

    let (req_join, rsp_join, request_first) = tokio::select! {
        req = &mut request => {
            // normal path: the request side saw the client hang up or
            // failed; the response side drains whatever is pending and
            // exits on the quit sentinel
            let rsp = (&mut response).await;
            (req, rsp, true)
        }
        rsp = &mut response => {
            // the response side died first and the request task may be
            // parked on a client read, so cancel it
            request.abort();
            let req = (&mut request).await;
            (req, rsp, false)
        }
    };

    let (client_rd, backend_wr, req_result) = match req_join {
        Ok((rd, wr, result)) => (Some(rd), Some(wr), Some(result)),
        Err(e) => {
            if e.is_panic() {
                error!("request task panicked: {e}");
            }
            (None, None, None)
        }
    };
    let (backend_rd, client_wr, rsp_result) = match rsp_join {
        Ok((rd, wr, result)) => (Some(rd), Some(wr), Some(result)),
        Err(e) => {
            if e.is_panic() {
                error!("response task panicked: {e}");
            }
            (None, None, None)
        }
    };

    // the bridge's exit status is the first failure delivered
    let (first, second) = if request_first {
        (req_result, rsp_result)
    } else {
        (rsp_result, req_result)
    };
    let result = match (first, second) {
        (Some(Err(e)), _) => Err(e),
        (_, Some(Err(e))) => Err(e),
        _ => Ok(()),
    };

    if let (Some(rd), Some(wr)) = (backend_rd, backend_wr) {
        backend.cond_release(BackendConn::reunite(rd, wr), &result);
    }
    // a cancelled task dropped its half, which closed the socket

    (result, client_rd.zip(client_wr))
}

async fn request_task(
    mut client: ClientReader,
    mut backend: BackendWriter,
    tx: mpsc::Sender<Pending>,
) -> (ClientReader, BackendWriter, ProxyResult<()>) {
    let result = request_loop(&mut client, &mut backend, &tx).await;
    if let Err(e) = &result {
        debug!("request pipeline ended: {e}");
    }
    // always deliver the quit sentinel so the response side unblocks
    let _ = tx.send(Pending::Quit).await;
    (client, backend, result)
}

async fn request_loop(
    client: &mut ClientReader,
    backend: &mut BackendWriter,
    tx: &mpsc::Sender<Pending>,
) -> ProxyResult<()> {
    // header storage is reused across requests
    let mut hdr = [0u8; HDR_LEN];

    loop {
        // a hangup between requests is a clean exit
        if !client.read_exact_or_eof(&mut hdr).await? {
            return Ok(());
        }

        let header = match RequestHeader::parse(&hdr) {
            Ok((_, header)) => header,
            Err(_) => return Err(ProxyError::BadMagic(hdr[0])),
        };

        let value_len = header.value_len().ok_or(ProxyError::MalformedHeader)?;
        if value_len > MAX_VALUE_SIZE {
            return Err(ProxyError::OversizedBody(header.total_body_len as u64));
        }

        let verb = header
            .opcode
            .text_command()
            .ok_or(ProxyError::UnsupportedOpcode(header.opcode))?;

        if header.opcode.is_storage() {
            write_storage(client, backend, verb, &header, value_len).await?;
        } else {
            write_keyed(client, backend, verb, &header, value_len).await?;
        }

        // the upstream must see the complete command before the opcode is
        // queued, so the channel head is always the opcode of the oldest
        // unanswered reply
        backend.flush().await?;

        if tx.send(Pending::Op(header.opcode)).await.is_err() {
            // response side is gone; the bridge is tearing down
            return Ok(());
        }
    }
}

/// Emit `<verb> <key>\r\n` for the retrieval and deletion families.
async fn write_keyed(
    client: &mut ClientReader,
    backend: &mut BackendWriter,
    verb: &str,
    header: &RequestHeader,
    value_len: usize,
) -> ProxyResult<()> {
    // these requests carry the key and nothing else; residual body bytes
    // would desynchronize the client stream
    if header.extras_len != 0 || value_len != 0 {
        return Err(ProxyError::MalformedHeader);
    }

    backend.write_all(verb.as_bytes()).await?;
    backend.write_all(b" ").await?;
    copy_body(client, backend, header.key_len as usize).await?;
    backend.write_all(CRLF).await?;
    Ok(())
}

/// Emit `<verb> <key> <flags> <expiry> <len>\r\n<value>\r\n` for the
/// storage family.
async fn write_storage(
    client: &mut ClientReader,
    backend: &mut BackendWriter,
    verb: &str,
    header: &RequestHeader,
    value_len: usize,
) -> ProxyResult<()> {
    // storage extras are 4 bytes of flags and 4 bytes of expiry
    if header.extras_len != 8 {
        return Err(ProxyError::BadExtras(header.extras_len));
    }

    let mut extras = [0u8; 4];
    client.read_exact(&mut extras).await?;
    let flags = u32::from_be_bytes(extras);
    client.read_exact(&mut extras).await?;
    let expiry = u32::from_be_bytes(extras);

    backend.write_all(verb.as_bytes()).await?;
    backend.write_all(b" ").await?;
    copy_body(client, backend, header.key_len as usize).await?;
    backend
        .write_all(format!(" {flags} {expiry} {value_len}\r\n").as_bytes())
        .await?;
    copy_body(client, backend, value_len).await?;
    backend.write_all(CRLF).await?;
    Ok(())
}

/// Stream exactly `n` body bytes from the client to the upstream in
/// bounded chunks; a large value never sits in memory whole.
async fn copy_body(
    client: &mut ClientReader,
    backend: &mut BackendWriter,
    mut n: usize,
) -> ProxyResult<()> {
    let mut chunk = [0u8; BODY_CHUNK_SIZE];
    while n > 0 {
        let want = chunk.len().min(n);
        client.read_exact(&mut chunk[..want]).await?;
        backend.write_all(&chunk[..want]).await?;
        n -= want;
    }
    Ok(())
}

async fn response_task(
    mut backend: BackendReader,
    mut client: ClientWriter,
    mut rx: mpsc::Receiver<Pending>,
) -> (BackendReader, ClientWriter, ProxyResult<()>) {
    let result = response_loop(&mut backend, &mut client, &mut rx).await;
    if let Err(e) = &result {
        debug!("response pipeline ended: {e}");
    }
    (backend, client, result)
}

async fn response_loop(
    backend: &mut BackendReader,
    client: &mut ClientWriter,
    rx: &mut mpsc::Receiver<Pending>,
) -> ProxyResult<()> {
    // line and header storage are reused across replies
    let mut line = Vec::new();
    let mut header_buf = BytesMut::with_capacity(HDR_LEN + 4);

    loop {
        let opcode = match rx.recv().await {
            // a dropped sender means the request side is gone
            None | Some(Pending::Quit) => return Ok(()),
            Some(Pending::Op(opcode)) => opcode,
        };

        backend.read_line(&mut line).await?;

        let reply = ReplyLine::parse(&line).ok_or_else(|| malformed(&line))?;

        let status = match reply {
            // the error replies are opcode-independent and zero-body
            ReplyLine::ClientError => Some(ResponseStatus::InvalidArguments),
            ReplyLine::ServerError => Some(ResponseStatus::InternalError),
            ReplyLine::Error => Some(ResponseStatus::UnknownCommand),
            reply if opcode.is_retrieval() => match reply {
                ReplyLine::End => Some(ResponseStatus::KeyNotFound),
                ReplyLine::Value { key, flags, len } => {
                    write_retrieval_hit(backend, client, &mut header_buf, opcode, &key, flags, len)
                        .await?;
                    // the data block trailer, then the terminating END
                    // line, keeping the stream framed for the next
                    // pipelined reply
                    let mut trailer = [0u8; 2];
                    backend.read_exact(&mut trailer).await?;
                    if trailer != *b"\r\n" {
                        return Err(malformed(&trailer));
                    }
                    backend.read_line(&mut line).await?;
                    if line != b"END\r\n" {
                        return Err(malformed(&line));
                    }
                    None
                }
                _ => return Err(malformed(&line)),
            },
            reply if opcode.is_storage() => match reply {
                ReplyLine::Stored => Some(ResponseStatus::NoError),
                ReplyLine::NotStored => Some(ResponseStatus::ItemNotStored),
                ReplyLine::Exists => Some(ResponseStatus::KeyExists),
                ReplyLine::NotFound => Some(ResponseStatus::KeyNotFound),
                _ => return Err(malformed(&line)),
            },
            reply if opcode.is_deletion() => match reply {
                ReplyLine::Deleted => Some(ResponseStatus::NoError),
                ReplyLine::NotFound => Some(ResponseStatus::KeyNotFound),
                _ => return Err(malformed(&line)),
            },
            // the request side only queues translatable opcodes
            _ => return Err(ProxyError::UnsupportedOpcode(opcode)),
        };

        if let Some(status) = status {
            header_buf.clear();
            status.as_empty_response(opcode).write_to(&mut header_buf);
            client.write_all(&header_buf[..]).await?;
        }

        client.flush().await?;
    }
}

/// Header, flags extras, optional key echo, then the value streamed in
/// bounded chunks.
async fn write_retrieval_hit(
    backend: &mut BackendReader,
    client: &mut ClientWriter,
    header_buf: &mut BytesMut,
    opcode: Opcode,
    key: &[u8],
    flags: u32,
    len: u32,
) -> ProxyResult<()> {
    // only the GETK variants echo the key back to the client
    let with_key = matches!(opcode, Opcode::Getk | Opcode::Getkq);
    let key_len = if with_key { key.len() as u16 } else { 0 };

    header_buf.clear();
    ResponseHeader::retrieval_hit(opcode, key_len, len).write_to(header_buf);
    header_buf.put_u32(flags);
    client.write_all(&header_buf[..]).await?;

    if with_key {
        client.write_all(key).await?;
    }

    let mut remaining = len as usize;
    let mut chunk = [0u8; BODY_CHUNK_SIZE];
    while remaining > 0 {
        let want = chunk.len().min(remaining);
        backend.read_exact(&mut chunk[..want]).await?;
        client.write_all(&chunk[..want]).await?;
        remaining -= want;
    }
    Ok(())
}

fn malformed(line: &[u8]) -> ProxyError {
    ProxyError::MalformedReply(String::from_utf8_lossy(line).into_owned())
}
