//! WaveMesh library — portable mesh audio relay core.
//!
//! Two node roles share this crate: the **hub** bridges a paired phone's
//! audio into an ESP-NOW-style mesh, the **relay** joins the mesh and
//! forwards received audio to a second phone over BLE GATT. Everything
//! that moves or frames bytes lives here with no platform dependencies,
//! testable on any host with `cargo test`. The firmware binary
//! (`src/main.rs`, feature-gated) is a thin consumer that provides radio
//! and GATT access.
//!
//! Data flow: phone → GATT write → [`ring`] → [`chunker`] → [`frame`] →
//! radio fan-out via [`mesh`] → radio receive → [`frame`] → [`ring`] →
//! [`notify`] → GATT notify → phone.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod chunker;
pub mod comm;
pub mod frame;
pub mod mesh;
pub mod notify;
pub mod protocol;
pub mod ring;

#[cfg(test)]
mod tests {
    //! Hub-to-relay pipeline, end to end on the host: chunk, frame,
    //! decode, queue, coalesce.

    use crate::chunker::{AudioChunker, ChunkSink};
    use crate::frame::{classify, Classified, Frame, CHUNK_SIZE};
    use crate::notify::{NotifyCoalescer, NotifySink, MAX_NOTIFY_LEN};
    use crate::ring::{NotifyQueue, PayloadKind};

    struct WireCapture {
        frames: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl ChunkSink for WireCapture {
        fn emit(&mut self, wire: &[u8], _pcm: &[u8]) {
            self.frames.push(wire.to_vec());
        }
    }

    struct PhoneCapture {
        notifies: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl NotifySink for PhoneCapture {
        fn notify(&mut self, payload: &[u8]) {
            self.notifies.push(payload.to_vec());
        }
    }

    #[test]
    fn hub_to_relay_audio_path() {
        // Hub side: a 250-byte phone write yields one 200-byte chunk and
        // leaves 50 bytes staged.
        let input: std::vec::Vec<u8> = (0..250).map(|i| (i * 7 % 256) as u8).collect();
        let mut chunker = AudioChunker::new();
        let mut wire = WireCapture {
            frames: std::vec::Vec::new(),
        };
        chunker.append(&input, 42, &mut wire);
        assert_eq!(wire.frames.len(), 1);
        assert_eq!(chunker.len(), 50);

        // Radio: the framed chunk crosses the mesh and the relay decodes
        // byte-identical payload.
        let datagram = &wire.frames[0];
        let queue = NotifyQueue::new();
        match classify(datagram).unwrap() {
            Classified::Audio(Frame::Pcm16 { header, payload }) => {
                assert_eq!(header.sequence, 0);
                assert_eq!(header.chunk_count, 1);
                assert_eq!(payload, &input[..CHUNK_SIZE]);
                assert!(queue.try_push(PayloadKind::Raw16, payload));
            }
            other => panic!("unexpected classification: {:?}", other),
        }

        // Relay side: once the 200-byte low-water mark is reached, the
        // coalescer emits two notifications of at most 160 bytes.
        let mut coalescer = NotifyCoalescer::new();
        let mut phone = PhoneCapture {
            notifies: std::vec::Vec::new(),
        };
        coalescer.tick(10, &queue, &mut phone);

        assert_eq!(phone.notifies.len(), 2);
        assert_eq!(phone.notifies[0].len(), MAX_NOTIFY_LEN);
        assert_eq!(phone.notifies[1].len(), CHUNK_SIZE - MAX_NOTIFY_LEN);
        let rebuilt: std::vec::Vec<u8> = phone.notifies.concat();
        assert_eq!(rebuilt, input[..CHUNK_SIZE]);
    }
}
