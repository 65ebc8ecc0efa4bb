// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::binary::MagicValue;
use crate::binary::Opcode;
use bytes::BufMut;
use nom::{bytes::streaming::take, IResult};

/// The 24-byte request header. The reserved field carries no meaning on
/// requests but is decoded so it can be logged.
pub struct RequestHeader {
    pub magic: MagicValue,
    pub opcode: Opcode,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub reserved: u16,
    pub total_body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, h) = take(24usize)(input)?;

        let header = Self {
            magic: MagicValue::from_u8(h[0]),
            opcode: Opcode::from_u8(h[1]),
            key_len: u16::from_be_bytes([h[2], h[3]]),
            extras_len: h[4],
            data_type: h[5],
            reserved: u16::from_be_bytes([h[6], h[7]]),
            total_body_len: u32::from_be_bytes([h[8], h[9], h[10], h[11]]),
            opaque: u32::from_be_bytes([h[12], h[13], h[14], h[15]]),
            cas: u64::from_be_bytes([h[16], h[17], h[18], h[19], h[20], h[21], h[22], h[23]]),
        };

        if header.magic != MagicValue::Request {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }

        Ok((remaining, header))
    }

    /// Writes 24 bytes to the buffer
    pub fn write_to(&self, buffer: &mut dyn BufMut) {
        buffer.put_u8(self.magic.to_u8());
        buffer.put_u8(self.opcode.to_u8());
        buffer.put_u16(self.key_len);
        buffer.put_u8(self.extras_len);
        buffer.put_u8(self.data_type);
        buffer.put_u16(self.reserved);
        buffer.put_u32(self.total_body_len);
        buffer.put_u32(self.opaque);
        buffer.put_u64(self.cas);
    }

    /// Length of the value portion of the body, or `None` if the header
    /// claims a body shorter than its own key and extras.
    pub fn value_len(&self) -> Option<usize> {
        (self.total_body_len as usize)
            .checked_sub(self.key_len as usize + self.extras_len as usize)
    }
}
