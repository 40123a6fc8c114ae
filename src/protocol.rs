/// JSON control-message vocabulary for the mesh link.
///
/// Join/ack/ready/heartbeat/status/leave plus the audio/test side channels.
/// All messages are single JSON documents with a `type` tag, small enough
/// for the ~250-byte radio payload ceiling.
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

/// Maximum length for MAC address strings ("AA:BB:CC:DD:EE:FF")
pub type MacString = String<18>;

/// Maximum length for device name / type strings
pub type NameString = String<33>;

/// Maximum length for hex data previews (64 bytes → 128 chars)
pub type PreviewString = String<128>;

/// Maximum length for status / data-type words
pub type WordString = String<16>;

/// Most device summaries a `mesh_status` document carries — bounded so the
/// serialized form always fits the radio ceiling.
pub const MAX_STATUS_PEERS: usize = 2;

/// Outcome field of a `mesh_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Joined,
    Failed,
}

/// One device entry inside a `mesh_status` document.
///
/// Serialized with short keys to save space; the parser accepts both the
/// short and the long spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSummary {
    #[serde(rename = "m", alias = "mac", default)]
    pub mac: MacString,
    #[serde(rename = "n", alias = "name", default)]
    pub name: NameString,
    #[serde(rename = "t", alias = "type", default)]
    pub kind: NameString,
    /// Last-seen uptime in seconds, not milliseconds.
    #[serde(rename = "s", alias = "last_seen", default)]
    pub last_seen_s: u32,
    #[serde(rename = "q", alias = "quality", default)]
    pub quality: u8,
}

/// Control messages sent to the mesh.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ControlOut<'a> {
    /// Request to join the mesh (relay → hub).
    #[serde(rename = "mesh_join")]
    Join {
        source: &'a str,
        device_name: &'a str,
        device_type: &'a str,
        mac: &'a MacString,
        /// Uptime in milliseconds when sent
        timestamp: u32,
    },
    /// Join outcome (hub → relay).
    #[serde(rename = "mesh_ack")]
    Ack {
        source: &'a str,
        status: AckStatus,
        timestamp: u32,
        mesh_device_count: u8,
    },
    /// Handshake completion: the peer is set up and reachable (relay → hub).
    #[serde(rename = "mesh_ready")]
    Ready { source: &'a str, timestamp: u32 },
    /// Liveness beacon carrying the hub's device count.
    #[serde(rename = "mesh_heartbeat")]
    Heartbeat {
        source: &'a str,
        timestamp: u32,
        devices: u8,
    },
    /// Membership snapshot with short-key device summaries.
    #[serde(rename = "mesh_status")]
    Status {
        source: &'a str,
        timestamp: u32,
        total_devices: u8,
        devices: &'a Vec<PeerSummary, MAX_STATUS_PEERS>,
    },
    /// Graceful departure.
    #[serde(rename = "mesh_leave")]
    Leave { source: &'a str, timestamp: u32 },
    /// Audio relay announcement with a bounded hex preview of the payload.
    #[serde(rename = "audio_data")]
    AudioData {
        source: &'a str,
        timestamp: u32,
        data_length: u16,
        data_preview: &'a PreviewString,
    },
    /// Informational receipt for an audio frame. Never triggers retransmission.
    #[serde(rename = "audio_ack")]
    AudioAck {
        source: &'a str,
        status: &'static str,
        timestamp: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chunk: Option<u32>,
    },
    /// Checksummed test payload announcement.
    #[serde(rename = "test_audio")]
    TestAudio {
        source: &'a str,
        timestamp: u32,
        test_id: u32,
        data_size: u16,
        data_type: &'a str,
        /// 16-bit additive checksum over the payload bytes
        checksum: u32,
    },
    /// Test outcome receipt — only sent when the checksum verified.
    #[serde(rename = "test_ack")]
    TestAck {
        source: &'a str,
        test_id: u32,
        status: &'a str,
        timestamp: u32,
    },
}

/// Control messages received from the mesh, reduced to the fields the
/// node acts on. Missing fields take defaults; unknown keys are ignored.
///
/// Deserialized via the flat `Raw*` structs in this module because
/// `serde_json_core` does not support internally tagged enums
/// (`deserialize_any`). See `comm::parse_control()`.
#[derive(Debug, PartialEq)]
pub enum ControlIn {
    Join {
        device_name: NameString,
        device_type: NameString,
    },
    Ack {
        status: AckStatus,
    },
    Ready,
    Heartbeat {
        devices: u8,
    },
    Status {
        total_devices: u8,
        devices: Vec<PeerSummary, 4>,
    },
    Leave,
    AudioData {
        source: NameString,
    },
    AudioAck {
        sequence: Option<u32>,
    },
    TestAudio {
        test_id: u32,
        data_size: u16,
        checksum: u32,
    },
    TestAck {
        test_id: u32,
        status: WordString,
    },
}

// ── Wire formats for inbound parsing ───────────────────────────────────
//
// A first pass reads only the `type` tag, then a per-type flat struct is
// deserialized from the same bytes. Kept per-type because `devices` is a
// count in heartbeats but an array in status documents.

#[derive(Deserialize)]
pub(crate) struct TypeProbe {
    #[serde(rename = "type")]
    pub kind: WordString,
}

#[derive(Deserialize)]
pub(crate) struct RawJoin {
    #[serde(default)]
    pub device_name: Option<NameString>,
    #[serde(default)]
    pub device_type: Option<NameString>,
}

#[derive(Deserialize)]
pub(crate) struct RawAck {
    #[serde(default)]
    pub status: Option<WordString>,
}

#[derive(Deserialize)]
pub(crate) struct RawHeartbeat {
    #[serde(default)]
    pub devices: Option<u8>,
}

#[derive(Deserialize)]
pub(crate) struct RawStatus {
    #[serde(default)]
    pub total_devices: Option<u8>,
    #[serde(default)]
    pub devices: Vec<PeerSummary, 4>,
}

#[derive(Deserialize)]
pub(crate) struct RawAudioData {
    #[serde(default)]
    pub source: Option<NameString>,
}

#[derive(Deserialize)]
pub(crate) struct RawAudioAck {
    #[serde(default)]
    pub sequence: Option<u32>,
}

#[derive(Deserialize)]
pub(crate) struct RawTestAudio {
    #[serde(default)]
    pub test_id: Option<u32>,
    #[serde(default)]
    pub data_size: Option<u16>,
    #[serde(default)]
    pub checksum: Option<u32>,
}

#[derive(Deserialize)]
pub(crate) struct RawTestAck {
    #[serde(default)]
    pub test_id: Option<u32>,
    #[serde(default)]
    pub status: Option<WordString>,
}

/// 16-bit additive checksum used by the `test_audio` validation path.
pub fn test_checksum(data: &[u8]) -> u32 {
    data.iter().map(|&b| u32::from(b)).sum::<u32>() & 0xFFFF
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized control document — the radio ceiling.
pub const MAX_CTRL_LEN: usize = 250;

/// Buffer type for serialized control documents
pub type CtrlBuffer = Vec<u8, MAX_CTRL_LEN>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_join_message() {
        let mac = MacString::try_from("AA:BB:CC:DD:EE:FF").unwrap();
        let msg = ControlOut::Join {
            source: "WaveMesh-Relay",
            device_name: "WaveMesh-Relay",
            device_type: "audio_relay",
            mac: &mac,
            timestamp: 1000,
        };
        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"mesh_join""#));
        assert!(json.contains(r#""device_name":"WaveMesh-Relay""#));
        assert!(json.contains(r#""mac":"AA:BB:CC:DD:EE:FF""#));
    }

    #[test]
    fn serialize_ack_statuses() {
        let mut buf = [0u8; 256];
        let msg = ControlOut::Ack {
            source: "WaveMesh-Hub",
            status: AckStatus::Joined,
            timestamp: 5,
            mesh_device_count: 1,
        };
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""status":"joined""#));

        let msg = ControlOut::Ack {
            source: "WaveMesh-Hub",
            status: AckStatus::Failed,
            timestamp: 5,
            mesh_device_count: 4,
        };
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""status":"failed""#));
    }

    #[test]
    fn serialize_status_uses_short_keys() {
        let mut devices: Vec<PeerSummary, MAX_STATUS_PEERS> = Vec::new();
        devices
            .push(PeerSummary {
                mac: MacString::try_from("101122334455").unwrap(),
                name: NameString::try_from("WaveMesh-Relay").unwrap(),
                kind: NameString::try_from("audio_relay").unwrap(),
                last_seen_s: 12,
                quality: 100,
            })
            .unwrap();

        let msg = ControlOut::Status {
            source: "WaveMesh-Hub",
            timestamp: 9000,
            total_devices: 1,
            devices: &devices,
        };
        let mut buf = [0u8; MAX_CTRL_LEN];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"mesh_status""#));
        assert!(json.contains(r#""n":"WaveMesh-Relay""#));
        assert!(json.contains(r#""q":100"#));
        // Bounded summaries always fit the radio ceiling.
        assert!(len <= MAX_CTRL_LEN);
    }

    #[test]
    fn serialize_audio_ack_omits_missing_sequence() {
        let msg = ControlOut::AudioAck {
            source: "WaveMesh-Hub",
            status: "received",
            timestamp: 1,
            sequence: None,
            chunk: None,
        };
        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(!json.contains("sequence"));
        assert!(!json.contains("chunk"));
    }

    #[test]
    fn test_checksum_is_16_bit_additive() {
        assert_eq!(test_checksum(&[]), 0);
        assert_eq!(test_checksum(&[1, 2, 3]), 6);
        // Sum wraps into 16 bits.
        let data = [0xFFu8; 300];
        assert_eq!(test_checksum(&data), (300 * 0xFF) & 0xFFFF);
    }

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION should be semver (major.minor.patch)");
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
