//! Variable-to-fixed audio chunking on the sending side.
//!
//! The paired phone writes arbitrary-length PCM blobs; the radio wants
//! fixed 200-byte chunks under a 250-byte ceiling. This buffer absorbs the
//! mismatch: whole chunks are framed and emitted as soon as they exist,
//! and when the buffer would overflow the oldest audio is evicted first.

use crate::frame::{self, FrameHeader, BITS_PER_SAMPLE, CHUNK_SIZE, RADIO_MTU, SAMPLE_RATE_HZ};

/// Chunk buffer capacity — five whole chunks plus slack.
pub const BUFFER_CAPACITY: usize = 1024;

/// Receives each emitted chunk: the framed radio message for mesh fan-out
/// and the bare PCM for the local peripheral notification.
pub trait ChunkSink {
    fn emit(&mut self, wire: &[u8], pcm: &[u8]);
}

/// Fixed-capacity audio staging buffer with a write cursor.
///
/// Invariant: `cursor <= BUFFER_CAPACITY` at all times.
pub struct AudioChunker {
    buf: [u8; BUFFER_CAPACITY],
    cursor: usize,
    sequence: u32,
}

impl AudioChunker {
    pub const fn new() -> Self {
        Self {
            buf: [0; BUFFER_CAPACITY],
            cursor: 0,
            sequence: 0,
        }
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Next chunk sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Append audio bytes and emit any whole chunks that result.
    ///
    /// When the write does not fit, whole chunks are force-flushed first;
    /// if space is still short, the oldest bytes are evicted by left-shift
    /// compaction (FIFO loss — newest audio always survives).
    pub fn append(&mut self, bytes: &[u8], now_ms: u32, sink: &mut impl ChunkSink) {
        if bytes.is_empty() {
            return;
        }

        if self.cursor + bytes.len() > BUFFER_CAPACITY {
            if self.cursor >= CHUNK_SIZE {
                self.flush(now_ms, sink);
            }
            if self.cursor + bytes.len() > BUFFER_CAPACITY {
                let overflow = self.cursor + bytes.len() - BUFFER_CAPACITY;
                let evict = overflow.min(self.cursor);
                if evict > 0 {
                    self.buf.copy_within(evict..self.cursor, 0);
                    self.cursor -= evict;
                    log::warn!("audio buffer overflow, dropped {} oldest bytes", evict);
                }
            }
        }

        // A single write larger than the whole buffer keeps only its tail.
        let bytes = if bytes.len() > BUFFER_CAPACITY - self.cursor {
            &bytes[bytes.len() - (BUFFER_CAPACITY - self.cursor)..]
        } else {
            bytes
        };

        self.buf[self.cursor..self.cursor + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();

        if self.cursor >= CHUNK_SIZE {
            self.flush(now_ms, sink);
        }
    }

    /// Frame and emit every whole chunk in the buffer, in order, then move
    /// the partial remainder to the front and zero the tail. Returns the
    /// number of chunks emitted.
    ///
    /// The zeroing after compaction is the only point where previously
    /// buffered bytes are cleared, so stale data never leaks into a later
    /// chunk.
    pub fn flush(&mut self, now_ms: u32, sink: &mut impl ChunkSink) -> usize {
        let chunk_count = self.cursor / CHUNK_SIZE;
        if chunk_count == 0 {
            return 0;
        }

        let mut wire = [0u8; RADIO_MTU];
        let mut pcm = [0u8; CHUNK_SIZE];
        for i in 0..chunk_count {
            pcm.copy_from_slice(&self.buf[i * CHUNK_SIZE..(i + 1) * CHUNK_SIZE]);
            let (min, max) = byte_extents(&pcm);
            let header = FrameHeader {
                sequence: self.sequence,
                chunk_index: i as u32,
                chunk_count: chunk_count as u32,
                capture_time_ms: now_ms,
                sample_rate_hz: SAMPLE_RATE_HZ,
                bits_per_sample: BITS_PER_SAMPLE,
                min_sample: u32::from(min),
                max_sample: u32::from(max),
            };
            self.sequence = self.sequence.wrapping_add(1);

            match frame::encode_compact(&header, &pcm, &mut wire) {
                Ok(n) => sink.emit(&wire[..n], &pcm),
                Err(_) => log::warn!("chunk framing failed, skipping chunk"),
            }
        }

        let consumed = chunk_count * CHUNK_SIZE;
        let remainder = self.cursor - consumed;
        self.buf.copy_within(consumed..self.cursor, 0);
        self.buf[remainder..].fill(0);
        self.cursor = remainder;
        chunk_count
    }

    /// Drop all buffered audio and restart the sequence (stream stop).
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.cursor = 0;
        self.sequence = 0;
    }
}

impl Default for AudioChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Advisory per-chunk byte statistics carried in the frame header.
fn byte_extents(chunk: &[u8]) -> (u8, u8) {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for &b in chunk {
        if b < min {
            min = b;
        }
        if b > max {
            max = b;
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_compact, Frame};

    /// Records every emitted chunk (decoded header + both byte views).
    #[derive(Default)]
    struct RecordingSink {
        wires: std::vec::Vec<std::vec::Vec<u8>>,
        chunks: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl ChunkSink for RecordingSink {
        fn emit(&mut self, wire: &[u8], pcm: &[u8]) {
            self.wires.push(wire.to_vec());
            self.chunks.push(pcm.to_vec());
        }
    }

    fn ramp(len: usize, start: u8) -> std::vec::Vec<u8> {
        (0..len).map(|i| start.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn short_write_stays_buffered() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();
        chunker.append(&ramp(150, 0), 0, &mut sink);
        assert_eq!(chunker.len(), 150);
        assert!(sink.chunks.is_empty());
    }

    #[test]
    fn exactly_250_bytes_emits_one_chunk_and_keeps_50() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();
        let input = ramp(250, 0);
        chunker.append(&input, 1234, &mut sink);

        assert_eq!(sink.chunks.len(), 1);
        assert_eq!(sink.chunks[0], input[..CHUNK_SIZE]);
        assert_eq!(chunker.len(), 50);

        match decode_compact(&sink.wires[0]).unwrap() {
            Frame::Pcm16 { header, payload } => {
                assert_eq!(header.sequence, 0);
                assert_eq!(header.chunk_index, 0);
                assert_eq!(header.chunk_count, 1);
                assert_eq!(header.capture_time_ms, 1234);
                assert_eq!(payload, &input[..CHUNK_SIZE]);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // The remaining 50 bytes complete the next chunk later.
        chunker.append(&ramp(150, 250), 2000, &mut sink);
        assert_eq!(sink.chunks.len(), 2);
        assert_eq!(&sink.chunks[1][..50], &input[200..]);
        assert_eq!(chunker.len(), 0);
    }

    #[test]
    fn multi_chunk_write_emits_in_order_with_rising_sequence() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();
        chunker.append(&ramp(3 * CHUNK_SIZE, 0), 0, &mut sink);

        assert_eq!(sink.chunks.len(), 3);
        for (i, wire) in sink.wires.iter().enumerate() {
            match decode_compact(wire).unwrap() {
                Frame::Pcm16 { header, .. } => {
                    assert_eq!(header.sequence, i as u32);
                    assert_eq!(header.chunk_index, i as u32);
                    assert_eq!(header.chunk_count, 3);
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }
        assert_eq!(chunker.sequence(), 3);
    }

    #[test]
    fn forced_flush_frees_space_before_eviction() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();

        chunker.append(&ramp(150, 0), 0, &mut sink);
        assert_eq!(chunker.len(), 150);

        // 150 + 900 > 1024, but no whole chunk is available to flush
        // (150 < CHUNK_SIZE), so 26 oldest bytes are evicted, then the
        // append completes and everything flushes as 5 chunks.
        let second = ramp(900, 100);
        chunker.append(&second, 0, &mut sink);

        assert_eq!(sink.chunks.len(), 5);
        // First emitted chunk starts at old byte 26 (the first 26 evicted).
        assert_eq!(sink.chunks[0][0], 26);
        // The newest bytes all survived: last emitted byte is the 850th of
        // the second write, and the remainder holds its tail.
        assert_eq!(chunker.len(), (150 - 26 + 900) % CHUNK_SIZE);
    }

    #[test]
    fn eviction_keeps_exactly_the_newest_bytes() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();

        // Fill to 1000 buffered bytes; the flush drains them all.
        chunker.append(&ramp(1000, 0), 0, &mut sink);
        assert_eq!(chunker.len(), 0);
        assert_eq!(sink.chunks.len(), 5);

        // Appending 100 fresh bytes lands them at the front.
        let fresh = ramp(100, 77);
        chunker.append(&fresh, 0, &mut sink);
        assert_eq!(chunker.len(), fresh.len());
        assert_eq!(sink.chunks.len(), 5);

        // Topping up to a whole chunk shows the fresh bytes at its head —
        // nothing stale leaked in front of them.
        chunker.append(&ramp(100, 200), 0, &mut sink);
        assert_eq!(sink.chunks.len(), 6);
        assert_eq!(&sink.chunks[5][..100], &fresh[..]);
    }

    #[test]
    fn oversized_single_write_keeps_its_tail() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();

        let huge = ramp(BUFFER_CAPACITY + 100, 0);
        chunker.append(&huge, 0, &mut sink);

        // Whole buffer's worth emitted as chunks; content is the tail of
        // the write (the oldest 100 bytes were never accepted).
        assert_eq!(sink.chunks.len(), BUFFER_CAPACITY / CHUNK_SIZE);
        assert_eq!(sink.chunks[0][0], huge[100]);
        assert_eq!(chunker.len(), BUFFER_CAPACITY % CHUNK_SIZE);
    }

    #[test]
    fn clear_resets_sequence_and_contents() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();
        chunker.append(&ramp(CHUNK_SIZE + 10, 0), 0, &mut sink);
        assert_eq!(chunker.sequence(), 1);
        assert_eq!(chunker.len(), 10);

        chunker.clear();
        assert_eq!(chunker.sequence(), 0);
        assert!(chunker.is_empty());
    }

    #[test]
    fn header_carries_real_byte_extents() {
        let mut chunker = AudioChunker::new();
        let mut sink = RecordingSink::default();
        let mut input = [128u8; CHUNK_SIZE];
        input[3] = 7;
        input[100] = 201;
        chunker.append(&input, 0, &mut sink);

        match decode_compact(&sink.wires[0]).unwrap() {
            Frame::Pcm16 { header, .. } => {
                assert_eq!(header.min_sample, 7);
                assert_eq!(header.max_sample, 201);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
