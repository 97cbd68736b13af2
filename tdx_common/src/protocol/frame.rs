//! Envelope layout, frame encoding and stream deframing.
//!
//! Requests and responses use different headers:
//!
//! ```text
//! request:  0C | id:u32 | 01 | len:u16 | len:u16 | type:u16 | payload       (len = payload + 2)
//! response: B1 CB 74 00 | ctrl:u8 | id:u32 | ?:u8 | type:u16 | zip:u16 | len:u16 | body
//! ```
//!
//! A response body is zlib-compressed whenever `zip != len`.
use std::fmt::Write as _;
use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::warn;

use super::MessageType;
use crate::error::TdxError;
use crate::result::Result;

/// First byte of every request frame.
pub const REQUEST_PREFIX: u8 = 0x0C;
/// Control byte written by the client.
pub const REQUEST_CONTROL: u8 = 0x01;
/// Request header length including the type tag.
pub const REQUEST_HEADER_LEN: usize = 12;
/// Magic that opens every response frame.
pub const RESPONSE_PREFIX: [u8; 4] = [0xB1, 0xCB, 0x74, 0x00];
/// Response header length.
pub const RESPONSE_HEADER_LEN: usize = 16;
/// Control byte written by the server.
pub const RESPONSE_CONTROL: u8 = 0x0C;
/// Largest payload either header can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - 2;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// One logical message: id echoed by the server, type tag and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation id; responses echo the request's id.
    pub id: u32,
    /// Raw type tag.
    pub msg_type: u16,
    /// Uncompressed payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Builds an envelope from its parts.
    pub fn new(id: u32, msg_type: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            msg_type,
            payload: payload.into(),
        }
    }

    /// The typed message kind, `None` when the tag is not recognised.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u16(self.msg_type)
    }
}

/// Appends the request frame for `envelope` to `dst`.
pub fn encode_request(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(envelope.payload.len())? + 2;
    dst.reserve(REQUEST_HEADER_LEN + envelope.payload.len());
    dst.put_u8(REQUEST_PREFIX);
    dst.put_u32_le(envelope.id);
    dst.put_u8(REQUEST_CONTROL);
    dst.put_u16_le(len);
    dst.put_u16_le(len);
    dst.put_u16_le(envelope.msg_type);
    dst.put_slice(&envelope.payload);
    Ok(())
}

/// Splits one request frame off the front of `buf`.
///
/// Returns `Ok(None)` until a whole frame is buffered.
pub fn decode_request(buf: &mut BytesMut) -> Result<Option<Envelope>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != REQUEST_PREFIX {
        return Err(TdxError::Framing(format!(
            "request frame starts with 0x{:02X}",
            buf[0]
        )));
    }
    if buf.len() < REQUEST_HEADER_LEN {
        return Ok(None);
    }
    let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if len < 2 {
        return Err(TdxError::Framing(format!("request length {} too short", len)));
    }
    let total = REQUEST_HEADER_LEN + len - 2;
    if buf.len() < total {
        return Ok(None);
    }

    let mut header = buf.split_to(REQUEST_HEADER_LEN);
    header.advance(1);
    let id = header.get_u32_le();
    header.advance(5);
    let msg_type = header.get_u16_le();
    let payload = buf.split_to(len - 2).freeze();
    Ok(Some(Envelope { id, msg_type, payload }))
}

/// Appends the response frame for `envelope` to `dst`, zlib-compressing the
/// body when `compress` is set.
pub fn encode_response(envelope: &Envelope, compress: bool, dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(envelope.payload.len())?;
    let body = if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&envelope.payload)?;
        Bytes::from(encoder.finish()?)
    } else {
        envelope.payload.clone()
    };
    let zip_len = checked_len(body.len())?;

    dst.reserve(RESPONSE_HEADER_LEN + body.len());
    dst.put_slice(&RESPONSE_PREFIX);
    dst.put_u8(RESPONSE_CONTROL);
    dst.put_u32_le(envelope.id);
    dst.put_u8(0x00);
    dst.put_u16_le(envelope.msg_type);
    dst.put_u16_le(zip_len);
    dst.put_u16_le(len);
    dst.put_slice(&body);
    Ok(())
}

/// Splits one response frame off the front of `buf`, inflating its body.
///
/// Leading garbage is discarded up to the next response prefix. A body that
/// fails to inflate is consumed and reported as [`TdxError::Decode`], so the
/// stream stays aligned for the next frame.
pub fn decode_response(buf: &mut BytesMut) -> Result<Option<Envelope>> {
    if !resync(buf) || buf.len() < RESPONSE_HEADER_LEN {
        return Ok(None);
    }
    let zip_len = u16::from_le_bytes([buf[12], buf[13]]) as usize;
    let len = u16::from_le_bytes([buf[14], buf[15]]) as usize;
    if buf.len() < RESPONSE_HEADER_LEN + zip_len {
        return Ok(None);
    }

    let mut header = buf.split_to(RESPONSE_HEADER_LEN);
    header.advance(5);
    let id = header.get_u32_le();
    header.advance(1);
    let msg_type = header.get_u16_le();
    let body = buf.split_to(zip_len).freeze();

    let payload = if zip_len == len {
        body
    } else {
        inflate(&body, len).map_err(|e| {
            TdxError::decode(format!("frame {} (type 0x{:04X}): {}", id, msg_type, e))
        })?
    };
    Ok(Some(Envelope { id, msg_type, payload }))
}

fn inflate(body: &[u8], len: usize) -> Result<Bytes> {
    let mut out = Vec::with_capacity(len);
    ZlibDecoder::new(body).take(len as u64 + 1).read_to_end(&mut out)?;
    if out.len() > len {
        return Err(TdxError::decode(format!(
            "body inflates past the announced {} bytes",
            len
        )));
    }
    if out.len() != len {
        return Err(TdxError::decode(format!(
            "inflated {} bytes, header announced {}",
            out.len(),
            len
        )));
    }
    Ok(Bytes::from(out))
}

/// Drops bytes until `buf` starts with [`RESPONSE_PREFIX`]. Returns `false`
/// when the prefix is not (yet) fully present.
fn resync(buf: &mut BytesMut) -> bool {
    if buf.starts_with(&RESPONSE_PREFIX) {
        return true;
    }
    let skip = match buf
        .windows(RESPONSE_PREFIX.len())
        .position(|w| w == RESPONSE_PREFIX)
    {
        Some(pos) => pos,
        // keep a possible partial prefix at the tail
        None => buf.len().saturating_sub(RESPONSE_PREFIX.len() - 1),
    };
    if skip > 0 {
        warn!("Discarding {} bytes preceding a response prefix", skip);
        buf.advance(skip);
    }
    buf.starts_with(&RESPONSE_PREFIX)
}

fn checked_len(payload_len: usize) -> Result<u16> {
    if payload_len > MAX_PAYLOAD {
        return Err(TdxError::Framing(format!(
            "payload of {} bytes exceeds {}",
            payload_len, MAX_PAYLOAD
        )));
    }
    Ok(payload_len as u16)
}

/// Reads complete envelopes from any `Read` stream.
///
/// Handles partial reads internally, callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    decode: fn(&mut BytesMut) -> Result<Option<Envelope>>,
}

impl<T: Read> FrameReader<T> {
    /// Reader for the client side of a connection (server responses).
    pub fn responses(inner: T) -> Self {
        Self::with_decoder(inner, decode_response)
    }

    /// Reader for the server side of a connection (client requests).
    pub fn requests(inner: T) -> Self {
        Self::with_decoder(inner, decode_request)
    }

    fn with_decoder(inner: T, decode: fn(&mut BytesMut) -> Result<Option<Envelope>>) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decode,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(TdxError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Envelope> {
        loop {
            if let Some(envelope) = (self.decode)(&mut self.buf)? {
                return Ok(envelope);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TdxError::Io(err)),
            };

            if read == 0 {
                return Err(TdxError::ConnectionClosed("end of stream".to_string()));
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Space-separated upper-case hex, used when frame dumps are enabled.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn response_bytes(envelope: &Envelope, compress: bool) -> Vec<u8> {
        let mut wire = BytesMut::new();
        encode_response(envelope, compress, &mut wire).unwrap();
        wire.to_vec()
    }

    #[test]
    fn request_layout_matches_the_server_expectation() {
        let mut wire = BytesMut::new();
        let connect = Envelope::new(0, MessageType::Connect.as_u16(), vec![0x01]);
        encode_request(&connect, &mut wire).unwrap();
        assert_eq!(
            wire.as_ref(),
            &[0x0C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x03, 0x00, 0x03, 0x00, 0x0D, 0x00, 0x01]
        );
    }

    #[test]
    fn request_frames_split_from_a_stream() {
        let mut wire = BytesMut::new();
        encode_request(&Envelope::new(7, 0x044E, vec![1, 2, 3]), &mut wire).unwrap();
        encode_request(&Envelope::new(8, 0x0004, Vec::new()), &mut wire).unwrap();

        let first = decode_request(&mut wire).unwrap().unwrap();
        let second = decode_request(&mut wire).unwrap().unwrap();
        assert_eq!((first.id, first.msg_type, first.payload.as_ref()), (7, 0x044E, &[1u8, 2, 3][..]));
        assert_eq!((second.id, second.msg_type, second.payload.len()), (8, 0x0004, 0));
        assert!(decode_request(&mut wire).unwrap().is_none());
    }

    #[test]
    fn request_with_bad_prefix_is_a_framing_error() {
        let mut wire = BytesMut::from(&[0x0D, 0, 0][..]);
        assert!(matches!(decode_request(&mut wire), Err(TdxError::Framing(_))));
    }

    #[test]
    fn compressed_and_plain_responses_decode_to_the_same_envelope() {
        let envelope = Envelope::new(42, 0x052D, vec![9u8; 600]);
        for compress in [false, true] {
            let mut wire = BytesMut::from(&response_bytes(&envelope, compress)[..]);
            let decoded = decode_response(&mut wire).unwrap().unwrap();
            assert_eq!(decoded, envelope);
            assert!(wire.is_empty());
        }
    }

    #[test]
    fn partial_response_waits_for_more_bytes() {
        let bytes = response_bytes(&Envelope::new(1, 0x044E, vec![5, 0]), false);
        let mut wire = BytesMut::from(&bytes[..10]);
        assert!(decode_response(&mut wire).unwrap().is_none());
        wire.extend_from_slice(&bytes[10..]);
        assert_eq!(decode_response(&mut wire).unwrap().unwrap().id, 1);
    }

    #[test]
    fn garbage_before_a_response_is_skipped() {
        let mut wire = BytesMut::from(&[0xAA, 0xBB, 0xB1][..]);
        wire.extend_from_slice(&response_bytes(&Envelope::new(3, 0x0004, Vec::new()), false));
        let decoded = decode_response(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.id, 3);
    }

    #[test]
    fn corrupt_body_is_consumed_and_reported() {
        let mut bytes = response_bytes(&Envelope::new(5, 0x0450, vec![1u8; 64]), true);
        let last = bytes.len() - 1;
        bytes[RESPONSE_HEADER_LEN] ^= 0xFF;
        bytes[last] ^= 0xFF;
        bytes.extend_from_slice(&response_bytes(&Envelope::new(6, 0x0004, Vec::new()), false));

        let mut wire = BytesMut::from(&bytes[..]);
        assert!(matches!(decode_response(&mut wire), Err(TdxError::Decode(_))));
        assert_eq!(decode_response(&mut wire).unwrap().unwrap().id, 6);
    }

    #[test]
    fn inflation_stops_at_the_announced_length() {
        let mut bytes = response_bytes(&Envelope::new(9, 0x0FC5, vec![0u8; 60_000]), true);
        bytes[14..16].copy_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&response_bytes(&Envelope::new(10, 0x0004, Vec::new()), false));

        let mut wire = BytesMut::from(&bytes[..]);
        match decode_response(&mut wire) {
            Err(TdxError::Decode(msg)) => assert!(msg.contains("past the announced 8"), "{msg}"),
            other => panic!("expected a decode error, got {:?}", other),
        }
        assert_eq!(decode_response(&mut wire).unwrap().unwrap().id, 10);
    }

    #[test]
    fn reader_yields_frames_then_reports_end_of_stream() {
        let mut bytes = response_bytes(&Envelope::new(1, 0x044E, vec![1, 0]), false);
        bytes.extend(response_bytes(&Envelope::new(2, 0x044E, vec![2, 0]), true));

        let mut reader = FrameReader::responses(Cursor::new(bytes));
        assert_eq!(reader.read_frame().unwrap().id, 1);
        assert_eq!(reader.read_frame().unwrap().id, 2);
        assert!(matches!(reader.read_frame(), Err(TdxError::ConnectionClosed(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut wire = BytesMut::new();
        let envelope = Envelope::new(1, 0x0450, vec![0u8; MAX_PAYLOAD + 1]);
        assert!(matches!(encode_request(&envelope, &mut wire), Err(TdxError::Framing(_))));
    }

    #[test]
    fn hex_dump_format() {
        assert_eq!(hex(&[0x0C, 0x01, 0xFF]), "0C 01 FF");
        assert_eq!(hex(&[]), "");
    }
}
