// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Parsing for the reply lines of the memcache text protocol. A reply
//! line is one CRLF-terminated line as produced by an ASCII server; for
//! `VALUE` lines the data block that follows is not part of the line and
//! is left on the stream for the caller to consume.

use nom::bytes::complete::{tag, take_while1};
use nom::combinator::map_res;
use nom::IResult;

/// One parsed reply line. The error variants discard the server's message
/// text; callers that want it log the raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyLine {
    /// `VALUE <key> <flags> <bytes>` - `len` bytes of data plus a CRLF
    /// trailer follow on the stream.
    Value { key: Vec<u8>, flags: u32, len: u32 },
    End,
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    ClientError,
    ServerError,
    Error,
}

impl ReplyLine {
    /// Parse one complete reply line, CRLF terminator included. Returns
    /// `None` for anything that is not a well-formed reply.
    pub fn parse(line: &[u8]) -> Option<Self> {
        if line.starts_with(b"CLIENT_ERROR ") && line.ends_with(b"\r\n") {
            return Some(ReplyLine::ClientError);
        }
        if line.starts_with(b"SERVER_ERROR ") && line.ends_with(b"\r\n") {
            return Some(ReplyLine::ServerError);
        }

        match line {
            b"ERROR\r\n" => Some(ReplyLine::Error),
            b"END\r\n" => Some(ReplyLine::End),
            b"STORED\r\n" => Some(ReplyLine::Stored),
            b"NOT_STORED\r\n" => Some(ReplyLine::NotStored),
            b"EXISTS\r\n" => Some(ReplyLine::Exists),
            b"NOT_FOUND\r\n" => Some(ReplyLine::NotFound),
            b"DELETED\r\n" => Some(ReplyLine::Deleted),
            _ => match value_line(line) {
                Ok((remaining, reply)) if remaining.is_empty() => Some(reply),
                _ => None,
            },
        }
    }
}

fn value_line(input: &[u8]) -> IResult<&[u8], ReplyLine> {
    let (input, _) = tag("VALUE ")(input)?;
    let (input, key) = take_while1(|b| b != b' ' && b != b'\r')(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, flags) = u32_digits(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, len) = u32_digits(input)?;
    let (input, _) = tag("\r\n")(input)?;

    Ok((
        input,
        ReplyLine::Value {
            key: key.to_vec(),
            flags,
            len,
        },
    ))
}

fn u32_digits(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(
        take_while1(|b: u8| b.is_ascii_digit()),
        |digits: &[u8]| {
            digits.iter().try_fold(0u32, |acc, d| {
                acc.checked_mul(10)
                    .and_then(|acc| acc.checked_add((d - b'0') as u32))
                    .ok_or(())
            })
        },
    )(input)
}
