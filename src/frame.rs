//! Audio wire framing for the mesh datagram link.
//!
//! Three encodings share the ~250-byte radio payload ceiling:
//! - compact text header (`P:` + 8 decimal fields + payload) for 16-bit PCM,
//! - fixed binary header (`WM` magic) for legacy 8-bit PCM,
//! - raw marker (`R:` + payload) for bare legacy 8-bit PCM.
//!
//! Anything that carries none of the audio prefixes is a control document
//! and is handed to the JSON parser in `comm`.

use core::fmt::Write;

/// Hard per-datagram payload ceiling of the radio transport.
pub const RADIO_MTU: usize = 250;

/// Chunk payload size — sized so header + payload stays under [`RADIO_MTU`].
pub const CHUNK_SIZE: usize = 200;

/// Stream parameters announced in every compact header.
pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const BITS_PER_SAMPLE: u32 = 16;

/// Magic prefix of the fixed binary framing.
pub const BINARY_MAGIC: [u8; 2] = *b"WM";

/// Binary frame type tag for legacy 8-bit PCM.
const BINARY_TYPE_PCM8: u8 = 0;

/// Fixed binary header: magic (2) + type (1) + seq (2) + len (2).
const BINARY_HEADER_LEN: usize = 7;

/// Per-chunk metadata carried by the compact text header.
///
/// `min_sample`/`max_sample` are advisory byte-level statistics; receivers
/// never branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u32,
    pub chunk_index: u32,
    pub chunk_count: u32,
    /// Device uptime when the chunk was cut, not wall-clock.
    pub capture_time_ms: u32,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u32,
    pub min_sample: u32,
    pub max_sample: u32,
}

/// A decoded audio frame borrowing the received datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Compact text header + 16-bit PCM payload.
    Pcm16 {
        header: FrameHeader,
        payload: &'a [u8],
    },
    /// Fixed binary header + legacy 8-bit PCM payload.
    Legacy8 { sequence: u16, payload: &'a [u8] },
    /// Raw marker + legacy 8-bit PCM payload.
    Raw8 { payload: &'a [u8] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Compact header malformed: non-digit byte or fewer than 8 fields.
    BadCompactHeader,
    /// Binary header truncated or unknown type tag.
    BadBinaryHeader,
    /// Declared payload length exceeds the received message.
    LengthMismatch,
    /// Header parsed but no payload bytes followed.
    EmptyPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Output buffer cannot hold even the header.
    BufferTooSmall,
}

/// Routing decision for a received datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Classified<'a> {
    Audio(Frame<'a>),
    /// Not an audio frame — candidate control document for the JSON parser.
    Control(&'a [u8]),
}

/// Route a received datagram by its leading bytes.
///
/// A message that announces an audio prefix but fails to parse is an error
/// (the frame is dropped by the caller); it is never retried as JSON.
pub fn classify(msg: &[u8]) -> Result<Classified<'_>, DecodeError> {
    if msg.len() > 2 && msg[0] == b'P' && msg[1] == b':' {
        return decode_compact(msg).map(Classified::Audio);
    }
    if msg.len() >= 2 && msg[0] == BINARY_MAGIC[0] && msg[1] == BINARY_MAGIC[1] {
        return decode_binary(msg).map(Classified::Audio);
    }
    if msg.len() >= 2 && msg[0] == b'R' && msg[1] == b':' {
        let payload = &msg[2..];
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }
        return Ok(Classified::Audio(Frame::Raw8 { payload }));
    }
    Ok(Classified::Control(msg))
}

/// Decode a compact text frame: `P:` + 8 colon-terminated decimal fields,
/// then raw payload to the end of the message.
///
/// Payload bytes are uninterpreted — they may contain `:` or `P`.
pub fn decode_compact(msg: &[u8]) -> Result<Frame<'_>, DecodeError> {
    if msg.len() < 5 || msg[0] != b'P' || msg[1] != b':' {
        return Err(DecodeError::BadCompactHeader);
    }

    let mut fields = [0u32; 8];
    let mut field = 0;
    let mut current: u32 = 0;
    let mut idx = 2;
    while idx < msg.len() && field < 8 {
        let b = msg[idx];
        idx += 1;
        match b {
            b':' => {
                fields[field] = current;
                field += 1;
                current = 0;
            }
            b'0'..=b'9' => {
                current = current.wrapping_mul(10).wrapping_add(u32::from(b - b'0'));
            }
            _ => return Err(DecodeError::BadCompactHeader),
        }
    }

    if field != 8 {
        return Err(DecodeError::BadCompactHeader);
    }
    if idx >= msg.len() {
        return Err(DecodeError::EmptyPayload);
    }

    Ok(Frame::Pcm16 {
        header: FrameHeader {
            sequence: fields[0],
            chunk_index: fields[1],
            chunk_count: fields[2],
            capture_time_ms: fields[3],
            sample_rate_hz: fields[4],
            bits_per_sample: fields[5],
            min_sample: fields[6],
            max_sample: fields[7],
        },
        payload: &msg[idx..],
    })
}

/// Decode a fixed binary frame: `WM` + type + le16 seq + le16 len + payload.
pub fn decode_binary(msg: &[u8]) -> Result<Frame<'_>, DecodeError> {
    if msg.len() < BINARY_HEADER_LEN
        || msg[0] != BINARY_MAGIC[0]
        || msg[1] != BINARY_MAGIC[1]
        || msg[2] != BINARY_TYPE_PCM8
    {
        return Err(DecodeError::BadBinaryHeader);
    }
    let sequence = u16::from_le_bytes([msg[3], msg[4]]);
    let len = u16::from_le_bytes([msg[5], msg[6]]) as usize;
    if len == 0 {
        return Err(DecodeError::EmptyPayload);
    }
    if BINARY_HEADER_LEN + len > msg.len() {
        return Err(DecodeError::LengthMismatch);
    }
    Ok(Frame::Legacy8 {
        sequence,
        payload: &msg[BINARY_HEADER_LEN..BINARY_HEADER_LEN + len],
    })
}

/// Encode a compact text frame into `out`, returning the encoded length.
///
/// The total frame never exceeds [`RADIO_MTU`]: an oversized payload is
/// truncated to fit (header fields unchanged). Callers size chunks at
/// [`CHUNK_SIZE`] so truncation is rarely exercised.
pub fn encode_compact(
    header: &FrameHeader,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, EncodeError> {
    let mut text: heapless::String<96> = heapless::String::new();
    write!(
        text,
        "P:{}:{}:{}:{}:{}:{}:{}:{}:",
        header.sequence,
        header.chunk_index,
        header.chunk_count,
        header.capture_time_ms,
        header.sample_rate_hz,
        header.bits_per_sample,
        header.min_sample,
        header.max_sample,
    )
    .map_err(|_| EncodeError::BufferTooSmall)?;

    let head = text.as_bytes();
    let ceiling = out.len().min(RADIO_MTU);
    if head.len() > ceiling {
        return Err(EncodeError::BufferTooSmall);
    }
    out[..head.len()].copy_from_slice(head);

    let take = payload.len().min(ceiling - head.len());
    out[head.len()..head.len() + take].copy_from_slice(&payload[..take]);
    Ok(head.len() + take)
}

/// Encode a fixed binary legacy-PCM frame into `out`.
pub fn encode_binary(sequence: u16, payload: &[u8], out: &mut [u8]) -> Result<usize, EncodeError> {
    let ceiling = out.len().min(RADIO_MTU);
    if ceiling < BINARY_HEADER_LEN {
        return Err(EncodeError::BufferTooSmall);
    }
    let take = payload.len().min(ceiling - BINARY_HEADER_LEN).min(u16::MAX as usize);
    out[0] = BINARY_MAGIC[0];
    out[1] = BINARY_MAGIC[1];
    out[2] = BINARY_TYPE_PCM8;
    out[3..5].copy_from_slice(&sequence.to_le_bytes());
    out[5..7].copy_from_slice(&(take as u16).to_le_bytes());
    out[BINARY_HEADER_LEN..BINARY_HEADER_LEN + take].copy_from_slice(&payload[..take]);
    Ok(BINARY_HEADER_LEN + take)
}

/// Encode a raw-marker legacy-PCM frame into `out`.
pub fn encode_raw(payload: &[u8], out: &mut [u8]) -> Result<usize, EncodeError> {
    let ceiling = out.len().min(RADIO_MTU);
    if ceiling < 2 {
        return Err(EncodeError::BufferTooSmall);
    }
    let take = payload.len().min(ceiling - 2);
    out[0] = b'R';
    out[1] = b':';
    out[2..2 + take].copy_from_slice(&payload[..take]);
    Ok(2 + take)
}
