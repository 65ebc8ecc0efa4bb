// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Buffered session I/O over owned storage. The buffers come from a
//! small process-wide pool so short-lived client connections do not churn
//! the allocator; over-capacity returns are dropped silently.

use std::io;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Matches the default size of the upstream-facing read buffers.
pub const READ_BUFFER_SIZE: usize = 4096;
pub const WRITE_BUFFER_SIZE: usize = 4096;

const POOLED_BUFFERS_PER_CLASS: usize = 4;

pub static READ_BUFFER_POOL: BufferPool = BufferPool::new(READ_BUFFER_SIZE);
pub static WRITE_BUFFER_POOL: BufferPool = BufferPool::new(WRITE_BUFFER_SIZE);

pub struct BufferPool {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> Vec<u8> {
        let recycled = self.free.lock().pop();
        match recycled {
            Some(mut buf) => {
                buf.resize(self.size, 0);
                buf
            }
            None => vec![0; self.size],
        }
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < POOLED_BUFFERS_PER_CLASS {
            free.push(buf);
        }
    }
}

/// A buffered reader over owned storage. Reads drain the buffer first and
/// refill it from the underlying stream as needed.
pub struct SessionReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    end: usize,
}

impl<R: AsyncRead + Unpin> SessionReader<R> {
    pub fn new(inner: R, buf: Vec<u8>) -> Self {
        Self {
            inner,
            buf,
            pos: 0,
            end: 0,
        }
    }

    pub fn into_parts(self) -> (R, Vec<u8>) {
        (self.inner, self.buf)
    }

    fn buffered(&self) -> usize {
        self.end - self.pos
    }

    /// Refill the (empty) buffer. Returns the number of bytes read; zero
    /// means the stream hit EOF.
    async fn fill(&mut self) -> io::Result<usize> {
        self.pos = 0;
        self.end = 0;
        let n = self.inner.read(&mut self.buf).await?;
        self.end = n;
        Ok(n)
    }

    /// Read exactly `dst.len()` bytes, or fail with `UnexpectedEof`.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> io::Result<()> {
        if self.read_exact_or_eof(dst).await? {
            Ok(())
        } else {
            Err(io::ErrorKind::UnexpectedEof.into())
        }
    }

    /// Like [`read_exact`](Self::read_exact), except an EOF before the
    /// first byte returns `Ok(false)`. This is how the request pipeline
    /// tells a clean hangup between requests from a truncated one.
    pub async fn read_exact_or_eof(&mut self, dst: &mut [u8]) -> io::Result<bool> {
        let mut off = 0;
        while off < dst.len() {
            if self.buffered() == 0 && self.fill().await? == 0 {
                if off == 0 {
                    return Ok(false);
                }
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let n = (dst.len() - off).min(self.buffered());
            dst[off..off + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            off += n;
        }
        Ok(true)
    }

    /// Read one line, up to and including the `\n` terminator, into
    /// `line` (which is cleared first). A line longer than the session
    /// buffer is an error, bounding memory against a garbage peer.
    pub async fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<()> {
        line.clear();
        loop {
            if self.buffered() == 0 && self.fill().await? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            if let Some(i) = self.buf[self.pos..self.end].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&self.buf[self.pos..self.pos + i + 1]);
                self.pos += i + 1;
                if line.len() > self.buf.len() {
                    break;
                }
                return Ok(());
            }
            line.extend_from_slice(&self.buf[self.pos..self.end]);
            self.pos = self.end;
            if line.len() >= self.buf.len() {
                break;
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "line exceeds session buffer",
        ))
    }
}

/// A buffered writer over owned storage. Small writes are staged in the
/// buffer; writes at least as large as the buffer bypass it once the
/// staged bytes have been flushed, so streaming a large value performs no
/// extra copy.
pub struct SessionWriter<W> {
    inner: W,
    buf: Vec<u8>,
    cap: usize,
}

impl<W: AsyncWrite + Unpin> SessionWriter<W> {
    pub fn new(inner: W, mut buf: Vec<u8>) -> Self {
        let cap = buf.len().max(buf.capacity());
        buf.clear();
        Self { inner, buf, cap }
    }

    pub fn into_parts(self) -> (W, Vec<u8>) {
        (self.inner, self.buf)
    }

    pub async fn write_all(&mut self, src: &[u8]) -> io::Result<()> {
        if self.buf.len() + src.len() > self.cap {
            self.flush_buf().await?;
            if src.len() >= self.cap {
                return self.inner.write_all(src).await;
            }
        }
        self.buf.extend_from_slice(src);
        Ok(())
    }

    async fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.flush_buf().await?;
        self.inner.flush().await
    }
}
