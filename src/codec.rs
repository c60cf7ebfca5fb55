//! Length-delimited framing for protocol messages.
//!
//! ```text
//! [len: u32 BE][version: u8][payload: bincode]
//! ```
//!
//! `len` counts the version byte plus the payload. Readers accumulate exactly
//! `len` bytes before decoding, so a frame split across several socket reads
//! is reassembled rather than decoded short.

use std::io::{self, Read, Write};

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

use crate::error::{BridgeError, CodecError, Result};
use crate::messages::PROTOCOL_VERSION;

/// Default cap on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const VERSION_LEN: usize = 1;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encoder/decoder for one connection.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_len: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: u32) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }

    /// Serialize `message` into a complete frame, prefix included.
    pub fn encode<M: Serialize>(&self, message: &M) -> Result<Vec<u8>, CodecError> {
        let payload = wire_options().serialize(message)?;
        let frame_len = payload.len() + VERSION_LEN;
        let len = match u32::try_from(frame_len) {
            Ok(len) if len <= self.max_frame_len => len,
            _ => {
                return Err(CodecError::InvalidLength {
                    len: u32::try_from(frame_len).unwrap_or(u32::MAX),
                    max: self.max_frame_len,
                })
            }
        };

        let mut frame = Vec::with_capacity(LEN_PREFIX + len as usize);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(PROTOCOL_VERSION);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a complete frame produced by [`FrameCodec::encode`].
    pub fn decode<M: DeserializeOwned>(&self, frame: &[u8]) -> Result<M, CodecError> {
        if frame.len() < LEN_PREFIX {
            return Err(CodecError::Truncated { expected: LEN_PREFIX });
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&frame[..LEN_PREFIX]);
        let len = self.check_len(u32::from_be_bytes(prefix))?;
        let body = &frame[LEN_PREFIX..];
        if body.len() < len {
            return Err(CodecError::Truncated { expected: len });
        }
        if body.len() > len {
            return Err(CodecError::TrailingBytes(body.len() - len));
        }
        self.decode_body(body)
    }

    /// Write one framed message and flush.
    pub fn write<W: Write, M: Serialize>(&self, writer: &mut W, message: &M) -> Result<()> {
        let frame = self.encode(message)?;
        trace!(len = frame.len(), "writing frame");
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Read exactly one framed message, looping until the whole frame has arrived.
    ///
    /// EOF before the first prefix byte is a connection error (peer hung up);
    /// EOF anywhere later is a truncated frame.
    pub fn read<R: Read, M: DeserializeOwned>(&self, reader: &mut R) -> Result<M> {
        let mut prefix = [0u8; LEN_PREFIX];
        read_prefix(reader, &mut prefix)?;
        let len = self.check_len(u32::from_be_bytes(prefix))?;

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => BridgeError::Codec(CodecError::Truncated { expected: len }),
            _ => BridgeError::Connection(e),
        })?;
        trace!(len, "read frame");
        Ok(self.decode_body(&body)?)
    }

    fn check_len(&self, len: u32) -> Result<usize, CodecError> {
        if len < VERSION_LEN as u32 || len > self.max_frame_len {
            return Err(CodecError::InvalidLength { len, max: self.max_frame_len });
        }
        Ok(len as usize)
    }

    fn decode_body<M: DeserializeOwned>(&self, body: &[u8]) -> Result<M, CodecError> {
        let (version, payload) = body.split_first().ok_or(CodecError::Truncated { expected: VERSION_LEN })?;
        if *version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(*version));
        }
        Ok(wire_options().deserialize(payload)?)
    }
}

fn read_prefix<R: Read>(reader: &mut R, prefix: &mut [u8; LEN_PREFIX]) -> Result<()> {
    let mut filled = 0;
    while filled < LEN_PREFIX {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "engine closed the connection").into())
            }
            Ok(0) => return Err(CodecError::Truncated { expected: LEN_PREFIX }.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AccountData, CallResult, ClientMessage, QueryResponse, VmQuery};
    use revm::primitives::{Address, Bytes, B256, U256};
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn frame_layout() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&VmQuery::GetBlockhash(5)).unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(frame[4], PROTOCOL_VERSION);
    }

    #[test]
    fn reassembles_frame_split_across_reads() {
        let codec = FrameCodec::default();
        let msg = ClientMessage::Response(QueryResponse::Account(AccountData {
            exists: true,
            balance: U256::from(1_000_000u64),
            nonce: 3,
            code_empty: false,
            code_hash: B256::repeat_byte(0x11),
        }));
        let frame = codec.encode(&msg).unwrap();
        let mut reader = Trickle { data: &frame, chunk: 3 };
        let decoded: ClientMessage = codec.read(&mut reader).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn reads_consecutive_frames() {
        let codec = FrameCodec::default();
        let mut stream = codec.encode(&VmQuery::GetCode(Address::repeat_byte(1))).unwrap();
        stream.extend(codec.encode(&VmQuery::CallResult(CallResult::default())).unwrap());
        let mut cursor = Cursor::new(stream);
        let first: VmQuery = codec.read(&mut cursor).unwrap();
        let second: VmQuery = codec.read(&mut cursor).unwrap();
        assert_eq!(first.kind(), "get_code");
        assert_eq!(second.kind(), "call_result");
    }

    #[test]
    fn truncated_body_is_codec_error() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&QueryResponse::Code(Bytes::from_static(&[1, 2, 3, 4]))).unwrap();
        let mut cursor = Cursor::new(&frame[..frame.len() - 2]);
        let err = codec.read::<_, QueryResponse>(&mut cursor).unwrap_err();
        assert!(matches!(err, BridgeError::Codec(CodecError::Truncated { .. })));
    }

    #[test]
    fn eof_before_frame_is_connection_error() {
        let codec = FrameCodec::default();
        let err = codec.read::<_, VmQuery>(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, BridgeError::Connection(_)));
    }

    #[test]
    fn oversized_prefix_is_rejected_before_allocating() {
        let codec = FrameCodec::new(64);
        let mut frame = 1_000u32.to_be_bytes().to_vec();
        frame.push(PROTOCOL_VERSION);
        let err = codec.read::<_, VmQuery>(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, BridgeError::Codec(CodecError::InvalidLength { len: 1_000, max: 64 })));
    }

    #[test]
    fn zero_length_prefix_is_rejected() {
        let codec = FrameCodec::default();
        let err = codec.decode::<VmQuery>(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidLength { len: 0, .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let codec = FrameCodec::default();
        let mut frame = codec.encode(&VmQuery::GetBlockhash(1)).unwrap();
        frame[4] = PROTOCOL_VERSION + 1;
        let err = codec.decode::<VmQuery>(&frame).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(v) if v == PROTOCOL_VERSION + 1));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let codec = FrameCodec::default();
        let mut frame = codec.encode(&VmQuery::GetBlockhash(1)).unwrap();
        // variant index is the first (little-endian u32) field of the payload
        frame[5] = 0x7f;
        let err = codec.decode::<VmQuery>(&frame).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn trailing_payload_bytes_are_rejected() {
        let codec = FrameCodec::default();
        let mut frame = codec.encode(&VmQuery::GetBlockhash(1)).unwrap();
        frame.push(0);
        let len = (frame.len() - 4) as u32;
        frame[..4].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(codec.decode::<VmQuery>(&frame), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn encoding_over_the_cap_fails() {
        let codec = FrameCodec::new(16);
        let big = QueryResponse::Code(Bytes::from(vec![0u8; 64]));
        assert!(matches!(codec.encode(&big), Err(CodecError::InvalidLength { .. })));
    }
}
