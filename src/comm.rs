/// Communication helpers — GATT identifiers and the control-document codec.
///
/// Both node roles expose the same audio service so a phone pairs with a hub
/// and a relay interchangeably. Control documents travel as single JSON
/// datagrams on the mesh link.

use crate::protocol::{
    AckStatus, ControlIn, ControlOut, RawAck, RawAudioAck, RawAudioData, RawHeartbeat, RawJoin,
    RawStatus, RawTestAck, RawTestAudio, TypeProbe,
};

/// BLE GATT identifiers for the audio service.
///
/// These duplicate the string literals in the `#[gatt_service]` and
/// `#[characteristic]` proc macro attributes in the firmware — Rust proc
/// macros require string literals, so we can't reference these constants
/// there. Kept here as the canonical source of truth.
#[allow(dead_code)]
pub mod ble_uuids {
    /// Audio service UUID (matches the companion phone app)
    pub const SERVICE: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";
    /// Audio characteristic — phone writes PCM in, node notifies PCM out
    pub const AUDIO_CHAR: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";
    /// Client characteristic configuration descriptor
    pub const CCCD: &str = "00002902-0000-1000-8000-00805f9b34fb";
}

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a control message to JSON bytes in the output buffer.
/// Returns the number of bytes written, or None if serialization failed
/// (document would exceed the buffer).
pub fn serialize_control(msg: &ControlOut, buf: &mut [u8]) -> Option<usize> {
    serde_json_core::to_slice(msg, buf).ok()
}

/// Parse a control document received from the mesh.
///
/// Permissive by design: unknown keys are skipped, missing fields take
/// defaults. Returns None (message dropped, nothing mutated) for documents
/// with no recognizable `type` or with fields of the wrong shape.
pub fn parse_control(data: &[u8]) -> Option<ControlIn> {
    let (probe, _) = serde_json_core::from_slice::<TypeProbe>(data).ok()?;

    match probe.kind.as_str() {
        "mesh_join" => {
            let (raw, _) = serde_json_core::from_slice::<RawJoin>(data).ok()?;
            Some(ControlIn::Join {
                device_name: raw.device_name.unwrap_or_default(),
                device_type: raw.device_type.unwrap_or_default(),
            })
        }
        "mesh_ack" => {
            let (raw, _) = serde_json_core::from_slice::<RawAck>(data).ok()?;
            let status = match raw.status.as_deref() {
                Some("joined") => AckStatus::Joined,
                Some("failed") => AckStatus::Failed,
                other => {
                    log::warn!("mesh_ack with unrecognized status {:?}", other);
                    return None;
                }
            };
            Some(ControlIn::Ack { status })
        }
        "mesh_ready" => Some(ControlIn::Ready),
        "mesh_heartbeat" => {
            let (raw, _) = serde_json_core::from_slice::<RawHeartbeat>(data).ok()?;
            Some(ControlIn::Heartbeat {
                devices: raw.devices.unwrap_or(0),
            })
        }
        "mesh_status" => {
            let (raw, _) = serde_json_core::from_slice::<RawStatus>(data).ok()?;
            Some(ControlIn::Status {
                total_devices: raw.total_devices.unwrap_or(raw.devices.len() as u8),
                devices: raw.devices,
            })
        }
        "mesh_leave" => Some(ControlIn::Leave),
        "audio_data" => {
            let (raw, _) = serde_json_core::from_slice::<RawAudioData>(data).ok()?;
            Some(ControlIn::AudioData {
                source: raw.source.unwrap_or_default(),
            })
        }
        "audio_ack" => {
            let (raw, _) = serde_json_core::from_slice::<RawAudioAck>(data).ok()?;
            Some(ControlIn::AudioAck {
                sequence: raw.sequence,
            })
        }
        "test_audio" => {
            let (raw, _) = serde_json_core::from_slice::<RawTestAudio>(data).ok()?;
            Some(ControlIn::TestAudio {
                test_id: raw.test_id.unwrap_or(0),
                data_size: raw.data_size.unwrap_or(0),
                checksum: raw.checksum.unwrap_or(0),
            })
        }
        "test_ack" => {
            let (raw, _) = serde_json_core::from_slice::<RawTestAck>(data).ok()?;
            Some(ControlIn::TestAck {
                test_id: raw.test_id.unwrap_or(0),
                status: raw.status.unwrap_or_default(),
            })
        }
        other => {
            log::warn!("unknown control message type '{}'", other);
            None
        }
    }
}
