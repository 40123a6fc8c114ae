//! Fixed-cadence notification coalescing on the receiving side.
//!
//! Inbound mesh audio lands in a ring queue in 200-byte chunks; the
//! peripheral stack wants small notifications at a steady rate. The
//! coalescer drains the queue on a periodic tick, upsamples legacy 8-bit
//! payloads, and flushes the result as notifications capped per call and
//! per cycle. Two thresholds bound both latency (low water / flush
//! timeout) and peripheral-stack burst size (high water).

use crate::ring::{PayloadKind, RingQueue, Slot};

/// Coalescing buffer capacity.
pub const COALESCE_CAPACITY: usize = 1536;

/// Flush as soon as this much is buffered.
pub const LOW_WATER: usize = 200;

/// At most this many bytes leave per flush cycle.
pub const HIGH_WATER: usize = 1280;

/// Per-notification payload cap.
pub const MAX_NOTIFY_LEN: usize = 160;

/// Queue items ingested per tick.
pub const INGEST_BATCH: usize = 8;

/// Coalescer tick cadence — one clock for ingest and flush.
pub const TICK_PERIOD_MS: u32 = 10;

/// A below-low-water tail still flushes after this long.
pub const FLUSH_TIMEOUT_MS: u32 = 25;

/// Peripheral notification primitive, as consumed by the coalescer.
pub trait NotifySink {
    fn notify(&mut self, payload: &[u8]);
}

/// Upsample a legacy 8-bit sample to 16-bit: zero-centered and scaled.
#[inline]
pub fn upsample8(sample: u8) -> i16 {
    (i16::from(sample) - 128) << 8
}

/// Accumulates inbound audio between flushes.
pub struct NotifyCoalescer {
    buf: [u8; COALESCE_CAPACITY],
    len: usize,
    last_flush_ms: u32,
}

impl NotifyCoalescer {
    pub const fn new() -> Self {
        Self {
            buf: [0; COALESCE_CAPACITY],
            len: 0,
            last_flush_ms: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the low-water mark has been reached.
    pub fn ready(&self) -> bool {
        self.len >= LOW_WATER
    }

    /// Drain up to [`INGEST_BATCH`] items from the queue into the buffer,
    /// upsampling legacy payloads. Bytes past the buffer capacity are
    /// dropped. Returns the number of items ingested.
    pub fn ingest<const N: usize, const CAP: usize>(
        &mut self,
        queue: &RingQueue<N, CAP>,
    ) -> usize {
        let mut slot: Slot<CAP> = Slot::empty();
        let mut ingested = 0;
        while ingested < INGEST_BATCH && queue.try_pop(&mut slot) {
            match slot.kind {
                PayloadKind::Legacy8 => self.push_upsampled(slot.bytes()),
                PayloadKind::Raw16 => self.push_raw(slot.bytes()),
            }
            ingested += 1;
        }
        ingested
    }

    fn push_raw(&mut self, payload: &[u8]) {
        let take = payload.len().min(COALESCE_CAPACITY - self.len);
        if take < payload.len() {
            log::warn!("coalesce buffer full, dropped {} bytes", payload.len() - take);
        }
        self.buf[self.len..self.len + take].copy_from_slice(&payload[..take]);
        self.len += take;
    }

    fn push_upsampled(&mut self, payload: &[u8]) {
        for &s in payload {
            if self.len + 2 > COALESCE_CAPACITY {
                log::warn!("coalesce buffer full, dropping upsampled tail");
                break;
            }
            let s16 = upsample8(s).to_le_bytes();
            self.buf[self.len] = s16[0];
            self.buf[self.len + 1] = s16[1];
            self.len += 2;
        }
    }

    /// Emit up to [`HIGH_WATER`] buffered bytes as notifications of at most
    /// [`MAX_NOTIFY_LEN`] each, then compact the remainder to the front.
    /// Returns the number of bytes sent.
    pub fn flush(&mut self, sink: &mut impl NotifySink) -> usize {
        let to_send = self.len.min(HIGH_WATER);
        if to_send == 0 {
            return 0;
        }

        let mut sent = 0;
        while sent < to_send {
            let n = MAX_NOTIFY_LEN.min(to_send - sent);
            sink.notify(&self.buf[sent..sent + n]);
            sent += n;
        }

        self.buf.copy_within(to_send..self.len, 0);
        self.len -= to_send;
        sent
    }

    /// One scheduler tick: ingest, then flush when the low-water mark is
    /// reached or the flush timeout has elapsed.
    pub fn tick<const N: usize, const CAP: usize>(
        &mut self,
        now_ms: u32,
        queue: &RingQueue<N, CAP>,
        sink: &mut impl NotifySink,
    ) -> usize {
        self.ingest(queue);

        if self.len == 0 {
            self.last_flush_ms = now_ms;
            return 0;
        }
        if self.ready() || now_ms.wrapping_sub(self.last_flush_ms) >= FLUSH_TIMEOUT_MS {
            self.last_flush_ms = now_ms;
            return self.flush(sink);
        }
        0
    }
}

impl Default for NotifyCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
