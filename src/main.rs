//! WaveMesh — ESP32 mesh audio relay firmware
//!
//! A hub node bridges a paired phone's audio writes into an ESP-NOW mesh;
//! a relay node joins the mesh and forwards received audio to a second
//! phone as GATT notifications. The role is fixed at build time
//! (`--features hub` / `--features relay`).
//!
//! All queueing, framing, membership, and pacing logic lives in the
//! `wavemesh` library; this binary wires it to esp-radio (ESP-NOW + BLE
//! via trouble-host) and Embassy.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::esp_now::{EspNow, EspNowError, PeerInfo};
use static_cell::StaticCell;

use trouble_host::prelude::*;

use wavemesh::board;
use wavemesh::comm;
use wavemesh::frame::{self, Classified};
use wavemesh::mesh::{self, PeerAddr, RadioLink, SendError};
use wavemesh::protocol::{AckStatus, ControlIn, ControlOut, VERSION};
use wavemesh::ring::{InboundQueue, NotifyQueue, PayloadKind};

#[cfg(feature = "role-hub")]
use wavemesh::chunker::{AudioChunker, ChunkSink};
#[cfg(feature = "role-hub")]
use wavemesh::mesh::JoinOutcome;
#[cfg(feature = "role-hub")]
use wavemesh::ring::Slot;
#[cfg(feature = "role-relay")]
use wavemesh::frame::Frame;
#[cfg(feature = "role-relay")]
use wavemesh::mesh::{CoordinatorLink, LinkAction};
#[cfg(feature = "role-relay")]
use wavemesh::notify::{NotifyCoalescer, NotifySink, TICK_PERIOD_MS};

/// ESP-NOW channel shared by all mesh nodes.
const MESH_CHANNEL: u8 = 1;

/// Largest GATT notification/write payload we exchange (bounded by the
/// 255-byte packet pool MTU).
const GATT_PAYLOAD_MAX: usize = 240;

type NotifyBuf = heapless::Vec<u8, GATT_PAYLOAD_MAX>;

// ── BLE GATT server definition ──────────────────────────────────────
//
// The UUID constants in comm::ble_uuids are the canonical source; proc
// macros require string literals.

#[gatt_service(uuid = "4fafc201-1fb5-459e-8fcc-c5c9c331914b")]
struct AudioGattService {
    /// Audio characteristic — the phone writes PCM in, the node notifies
    /// PCM out. Variable-length payloads up to GATT_PAYLOAD_MAX.
    #[characteristic(uuid = "beb5483e-36e1-4688-b7f5-ea07361b26a8", write, notify)]
    audio: heapless::Vec<u8, 240>,
}

/// Top-level WaveMesh GATT server.
#[gatt_server]
struct WaveMeshServer {
    audio_service: AudioGattService,
}

// ── Static queues and shared state ───────────────────────────────────

/// Decoded mesh audio awaiting peripheral notification (relay side).
static NOTIFY_QUEUE: NotifyQueue = NotifyQueue::new();

/// Raw peripheral writes awaiting chunking (hub side).
static INBOUND_QUEUE: InboundQueue = InboundQueue::new();

/// Outbound GATT notifications — mesh/coalescer tasks produce, the GATT
/// connection handler consumes.
static BLE_NOTIFY_CHANNEL: Channel<CriticalSectionRawMutex, NotifyBuf, 8> = Channel::new();

/// Whether a phone is currently connected. Written by the GATT task only.
static BLE_CONNECTED: AtomicBool = AtomicBool::new(false);

/// Whether the hub's audio stream is running (started lazily on the first
/// peripheral write).
static STREAMING: AtomicBool = AtomicBool::new(false);

/// Uptime in milliseconds, truncated to the wire's 32-bit field.
fn uptime_ms() -> u32 {
    (Instant::now().as_millis() & 0xFFFF_FFFF) as u32
}

// ── ESP-NOW transport adapter ────────────────────────────────────────

/// The mesh datagram link over ESP-NOW.
struct EspNowLink<'d> {
    inner: EspNow<'d>,
}

fn map_espnow_err(e: EspNowError) -> SendError {
    use esp_radio::esp_now::Error as RawError;
    match e {
        EspNowError::Error(RawError::NotFound) => SendError::UnknownPeer,
        _ => SendError::Link,
    }
}

impl RadioLink for EspNowLink<'_> {
    fn register_peer(&mut self, addr: &PeerAddr) -> Result<(), SendError> {
        self.inner
            .add_peer(PeerInfo {
                peer_address: *addr,
                lmk: None,
                channel: Some(MESH_CHANNEL),
                encrypt: false,
            })
            .map_err(map_espnow_err)
    }

    fn unregister_peer(&mut self, addr: &PeerAddr) {
        let _ = self.inner.remove_peer(addr);
    }

    fn send(&mut self, addr: &PeerAddr, frame: &[u8]) -> Result<(), SendError> {
        // Fire-and-forget: dropping the waiter skips the delivery report.
        self.inner
            .send(addr, frame)
            .map(|_| ())
            .map_err(map_espnow_err)
    }
}

/// Serialize and send one control message; send failures are the
/// membership layer's problem, not ours.
fn send_control(link: &mut impl RadioLink, addr: &PeerAddr, msg: &ControlOut) {
    let mut buf = [0u8; wavemesh::protocol::MAX_CTRL_LEN];
    match comm::serialize_control(msg, &mut buf) {
        Some(len) => {
            let _ = link.send(addr, &buf[..len]);
        }
        None => log::warn!("control message too large, not sent"),
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Set up heap allocator (needed for BLE + WiFi coex stacks).
    #[cfg(feature = "esp32")]
    {
        esp_alloc::heap_allocator!(size: 64 * 1024);
    }
    #[cfg(not(feature = "esp32"))]
    {
        esp_alloc::heap_allocator!(size: 128 * 1024);
    }

    // Start the RTOS — requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("WaveMesh v{} starting as {}", VERSION, board::ROLE_NAME);

    // Relay: the coalescer runs on its own periodic task, touching only
    // static state.
    #[cfg(feature = "role-relay")]
    spawner.spawn(coalescer_task()).unwrap();

    // ── BLE radio initialization ───────────────────────────────────────
    // BLE must be initialized BEFORE WiFi for coexistence to work
    // (especially on ESP32-S3).

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");

    log::info!("BLE connector initialized");

    // ── ESP-NOW initialization ──────────────────────────────────────────

    let (_wifi_controller, wifi_interfaces) =
        esp_radio::wifi::new(peripherals.WIFI, Default::default()).expect("WiFi init failed");

    let esp_now = wifi_interfaces.esp_now;
    log::info!("ESP-NOW initialized on channel {}", MESH_CHANNEL);

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x9e, 0x0b, 0x17, 0xc2, 0x5a]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    // Create GATT server
    let server = WaveMeshServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: board::DEVICE_NAME,
        appearance: &appearance::UNKNOWN,
    }))
    .expect("GATT server init failed");

    // ── Orchestration ──────────────────────────────────────────────────
    //
    // Three concurrent futures via join3:
    //   1. BLE stack runner (drives HCI)
    //   2. GATT server (advertise, accept connections, notify)
    //   3. Mesh loop (role-specific: hub registry or relay link)

    let _ = embassy_futures::join::join3(
        // ── Runner: drives the BLE stack ────────────────────────────────
        async {
            loop {
                if let Err(e) = runner.run().await {
                    log::error!("BLE runner error: {:?}", e);
                    embassy_time::Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        // ── GATT server: advertise, connect, notify ─────────────────────
        async {
            loop {
                // Build advertisement data
                let mut adv_data = [0u8; 31];
                let adv_len = match AdStructure::encode_slice(
                    &[
                        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                        AdStructure::CompleteLocalName(board::DEVICE_NAME.as_bytes()),
                    ],
                    &mut adv_data[..],
                ) {
                    Ok(len) => len,
                    Err(e) => {
                        log::error!("Ad encode error: {:?}", e);
                        embassy_time::Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                // Start advertising
                let advertiser = match peripheral
                    .advertise(
                        &Default::default(),
                        Advertisement::ConnectableScannableUndirected {
                            adv_data: &adv_data[..adv_len],
                            scan_data: &[],
                        },
                    )
                    .await
                {
                    Ok(adv) => adv,
                    Err(e) => {
                        log::error!("BLE advertise error: {:?}", e);
                        embassy_time::Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                log::info!("BLE advertising as '{}'", board::DEVICE_NAME);

                // Wait for a phone to connect
                let conn = match advertiser.accept().await {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("BLE accept error: {:?}", e);
                        continue;
                    }
                };

                let gatt_conn = match conn.with_attribute_server(&server) {
                    Ok(gc) => gc,
                    Err(e) => {
                        log::error!("GATT setup error: {:?}", e);
                        continue;
                    }
                };

                log::info!("phone connected");
                BLE_CONNECTED.store(true, Ordering::Relaxed);

                handle_gatt_connection(&gatt_conn, &server).await;

                BLE_CONNECTED.store(false, Ordering::Relaxed);
                log::info!("phone disconnected, re-advertising");
            }
        },
        // ── Mesh loop: role-specific ────────────────────────────────────
        async {
            let link = EspNowLink { inner: esp_now };
            #[cfg(feature = "role-hub")]
            hub_mesh_loop(link).await;
            #[cfg(feature = "role-relay")]
            relay_mesh_loop(link).await;
            #[cfg(not(any(feature = "role-hub", feature = "role-relay")))]
            {
                let _ = link;
                core::future::pending::<()>().await
            }
        },
    )
    .await;
}

/// Handle a GATT connection: forward queued notifications to the phone
/// and push incoming audio writes into the inbound ring queue.
async fn handle_gatt_connection<'s, P: PacketPool>(
    conn: &GattConnection<'_, 's, P>,
    server: &'s WaveMeshServer<'_>,
) {
    let notify_rx = BLE_NOTIFY_CHANNEL.receiver();

    loop {
        match select(notify_rx.receive(), conn.next()).await {
            Either::First(payload) => {
                if server
                    .audio_service
                    .audio
                    .notify(conn, &payload)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Either::Second(event) => {
                match event {
                    GattConnectionEvent::Disconnected { .. } => return,
                    GattConnectionEvent::Gatt { event } => {
                        if let GattEvent::Write(ref write_event) = event {
                            if write_event.handle() == server.audio_service.audio.handle {
                                on_peripheral_write(write_event.data());
                            }
                        }
                        // Must accept/reply to all GATT events
                        match event.accept() {
                            Ok(reply) => reply.send().await,
                            Err(_) => {}
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Peripheral write callback path. Runs on the GATT task — the only
/// allowed action is a non-blocking queue push.
fn on_peripheral_write(data: &[u8]) {
    if data.is_empty() {
        return;
    }

    #[cfg(feature = "role-hub")]
    {
        if !STREAMING.swap(true, Ordering::Relaxed) {
            log::info!("audio streaming started");
        }
        if !INBOUND_QUEUE.try_push(PayloadKind::Raw16, data) {
            log::warn!("inbound audio queue full, write dropped");
        }
    }

    #[cfg(not(feature = "role-hub"))]
    {
        // The relay's phone is a listener; writes are unexpected.
        log::debug!("ignoring {}-byte write from phone", data.len());
    }
}

// ── Hub ──────────────────────────────────────────────────────────────

/// Fans each emitted chunk out to active peers and echoes the bare PCM to
/// the hub's own phone.
#[cfg(feature = "role-hub")]
struct HubChunkSink<'a, 'd> {
    registry: &'a mut mesh::PeerRegistry,
    link: &'a mut EspNowLink<'d>,
}

#[cfg(feature = "role-hub")]
impl ChunkSink for HubChunkSink<'_, '_> {
    fn emit(&mut self, wire: &[u8], pcm: &[u8]) {
        self.registry.fan_out(wire, self.link);
        if BLE_CONNECTED.load(Ordering::Relaxed) {
            let mut buf = NotifyBuf::new();
            let _ = buf.extend_from_slice(pcm);
            if BLE_NOTIFY_CHANNEL.try_send(buf).is_err() {
                log::warn!("notify channel full, local echo dropped");
            }
        }
    }
}

/// Hub mesh loop: drains phone audio into the chunker, serves join
/// handshakes, and keeps membership fresh with heartbeat/status/sweep.
#[cfg(feature = "role-hub")]
async fn hub_mesh_loop(mut link: EspNowLink<'_>) -> ! {
    let mut registry = mesh::PeerRegistry::new();
    let mut chunker = AudioChunker::new();

    // Audio drain cadence; matches the phone's write rate with headroom.
    let mut drain = Ticker::every(Duration::from_millis(6));
    let mut housekeeping = Ticker::every(Duration::from_secs(1));

    let mut last_heartbeat = 0u32;
    let mut last_status = 0u32;
    let mut last_sweep = 0u32;
    let mut was_connected = false;

    loop {
        let event = select3(link.inner.receive_async(), drain.next(), housekeeping.next()).await;
        match event {
            Either3::First(rx) => {
                let src: PeerAddr = rx.info.src_address;
                hub_handle_datagram(&src, rx.data(), &mut registry, &mut link);
            }
            Either3::Second(_) => {
                if !STREAMING.load(Ordering::Relaxed) {
                    continue;
                }
                let now = uptime_ms();
                let mut slot: Slot<256> = Slot::empty();
                let mut processed = 0;
                while processed < 8 && INBOUND_QUEUE.try_pop(&mut slot) {
                    let mut sink = HubChunkSink {
                        registry: &mut registry,
                        link: &mut link,
                    };
                    chunker.append(slot.bytes(), now, &mut sink);
                    processed += 1;
                }
            }
            Either3::Third(_) => {
                let now = uptime_ms();

                // Stream stop on phone disconnect clears staged audio.
                let connected = BLE_CONNECTED.load(Ordering::Relaxed);
                if was_connected && !connected {
                    chunker.clear();
                    STREAMING.store(false, Ordering::Relaxed);
                    log::info!("audio streaming stopped, buffer cleared");
                }
                was_connected = connected;

                if registry.active_count() > 0
                    && now.wrapping_sub(last_heartbeat) >= mesh::HEARTBEAT_INTERVAL_MS
                {
                    hub_send_heartbeat(&mut registry, &mut link, now);
                    last_heartbeat = now;
                }
                if registry.active_count() > 0
                    && now.wrapping_sub(last_status) >= mesh::STATUS_INTERVAL_MS
                {
                    hub_send_status(&mut registry, &mut link, now);
                    last_status = now;
                }
                if now.wrapping_sub(last_sweep) >= mesh::PEER_TIMEOUT_MS {
                    registry.sweep(now, &mut link);
                    last_sweep = now;
                }
            }
        }
    }
}

#[cfg(feature = "role-hub")]
fn hub_handle_datagram(
    src: &PeerAddr,
    data: &[u8],
    registry: &mut mesh::PeerRegistry,
    link: &mut EspNowLink<'_>,
) {
    let now = uptime_ms();

    let doc = match frame::classify(data) {
        Ok(Classified::Control(doc)) => doc,
        Ok(Classified::Audio(_)) => {
            // The hub is the audio source; mesh audio frames back at it
            // are unexpected.
            log::debug!("ignoring audio frame from peer");
            return;
        }
        Err(e) => {
            log::warn!("dropping malformed frame: {:?}", e);
            return;
        }
    };

    let Some(msg) = comm::parse_control(doc) else {
        log::warn!("dropping unparseable control message");
        return;
    };

    match msg {
        ControlIn::Join {
            device_name,
            device_type,
        } => {
            let outcome = registry.join(src, &device_name, &device_type, now, link);
            let status = match outcome {
                JoinOutcome::Added | JoinOutcome::Refreshed => AckStatus::Joined,
                JoinOutcome::Full | JoinOutcome::Rejected => AckStatus::Failed,
            };
            send_control(
                link,
                src,
                &ControlOut::Ack {
                    source: board::DEVICE_NAME,
                    status,
                    timestamp: now,
                    mesh_device_count: registry.len() as u8,
                },
            );
        }
        ControlIn::Ready => {
            registry.mark_ready(src, now);
        }
        ControlIn::Heartbeat { .. } => {
            registry.heartbeat(src, now);
        }
        ControlIn::Leave => {
            registry.remove(src, link);
        }
        ControlIn::AudioData { source } => {
            // Mesh relay: re-fan the document to the other peers, then
            // acknowledge the sender.
            log::debug!("relaying audio_data from {}", source);
            registry.fan_out_except(doc, src, link);
            send_control(
                link,
                src,
                &ControlOut::AudioAck {
                    source: board::DEVICE_NAME,
                    status: "received",
                    timestamp: now,
                    sequence: None,
                    chunk: None,
                },
            );
        }
        ControlIn::AudioAck { sequence } => {
            log::debug!("audio ack (seq {:?})", sequence);
        }
        ControlIn::TestAck { test_id, status } => {
            log::info!("test {} acked: {}", test_id, status);
        }
        ControlIn::Ack { .. } | ControlIn::Status { .. } | ControlIn::TestAudio { .. } => {
            log::debug!("ignoring coordinator-bound message from peer");
        }
    }
}

#[cfg(feature = "role-hub")]
fn hub_send_heartbeat(registry: &mut mesh::PeerRegistry, link: &mut EspNowLink<'_>, now: u32) {
    let msg = ControlOut::Heartbeat {
        source: board::DEVICE_NAME,
        timestamp: now,
        devices: registry.len() as u8,
    };
    let mut buf = [0u8; wavemesh::protocol::MAX_CTRL_LEN];
    if let Some(len) = comm::serialize_control(&msg, &mut buf) {
        registry.fan_out(&buf[..len], link);
    }
}

#[cfg(feature = "role-hub")]
fn hub_send_status(registry: &mut mesh::PeerRegistry, link: &mut EspNowLink<'_>, now: u32) {
    let devices = registry.summaries();
    let msg = ControlOut::Status {
        source: board::DEVICE_NAME,
        timestamp: now,
        total_devices: registry.len() as u8,
        devices: &devices,
    };
    let mut buf = [0u8; wavemesh::protocol::MAX_CTRL_LEN];
    if let Some(len) = comm::serialize_control(&msg, &mut buf) {
        registry.fan_out(&buf[..len], link);
    }
}

// ── Relay ────────────────────────────────────────────────────────────

/// Forwards coalesced audio to the GATT task for notification.
#[cfg(feature = "role-relay")]
struct ChannelNotifySink;

#[cfg(feature = "role-relay")]
impl NotifySink for ChannelNotifySink {
    fn notify(&mut self, payload: &[u8]) {
        let mut buf = NotifyBuf::new();
        let _ = buf.extend_from_slice(payload);
        if BLE_NOTIFY_CHANNEL.try_send(buf).is_err() {
            log::warn!("notify channel full, audio dropped");
        }
    }
}

/// One coalescer, one clock: drains the notify queue and paces GATT
/// notifications.
#[cfg(feature = "role-relay")]
#[embassy_executor::task]
async fn coalescer_task() {
    let mut ticker = Ticker::every(Duration::from_millis(TICK_PERIOD_MS as u64));
    let mut coalescer = NotifyCoalescer::new();
    let mut sink = ChannelNotifySink;

    log::info!("coalescer task started");
    loop {
        ticker.next().await;
        if !BLE_CONNECTED.load(Ordering::Relaxed) {
            continue;
        }
        coalescer.tick(uptime_ms(), &NOTIFY_QUEUE, &mut sink);
    }
}

/// Relay mesh loop: maintains the coordinator link and pushes received
/// audio into the notify queue.
#[cfg(feature = "role-relay")]
async fn relay_mesh_loop(mut link: EspNowLink<'_>) -> ! {
    let mut coord = CoordinatorLink::new();
    let mut retry = Ticker::every(Duration::from_secs(1));

    // Join requests go out as broadcasts until a coordinator answers.
    if link.register_peer(&mesh::BROADCAST_ADDR).is_err() {
        log::error!("failed to register broadcast peer");
    }

    loop {
        let event = select(link.inner.receive_async(), retry.next()).await;
        match event {
            Either::First(rx) => {
                let src: PeerAddr = rx.info.src_address;
                relay_handle_datagram(&src, rx.data(), &mut coord, &mut link);
            }
            Either::Second(_) => {
                match coord.tick(uptime_ms(), &mut link) {
                    Some(LinkAction::SendJoin) => relay_send_join(&mut link),
                    Some(LinkAction::Dropped) => {
                        // Binding cleared; the next tick starts a join round.
                    }
                    None => {}
                }
            }
        }
    }
}

#[cfg(feature = "role-relay")]
fn relay_send_join(link: &mut EspNowLink<'_>) {
    let mac_bytes = esp_hal::efuse::Efuse::mac_address();
    let mut mac = wavemesh::protocol::MacString::new();
    mesh::format_mac(&mac_bytes, &mut mac);

    let msg = ControlOut::Join {
        source: board::DEVICE_NAME,
        device_name: board::DEVICE_NAME,
        device_type: board::DEVICE_KIND,
        mac: &mac,
        timestamp: uptime_ms(),
    };
    send_control(link, &mesh::BROADCAST_ADDR, &msg);
}

#[cfg(feature = "role-relay")]
fn relay_handle_datagram(
    src: &PeerAddr,
    data: &[u8],
    coord: &mut CoordinatorLink,
    link: &mut EspNowLink<'_>,
) {
    let now = uptime_ms();

    let doc = match frame::classify(data) {
        Ok(Classified::Audio(audio)) => {
            relay_handle_audio(src, audio, coord, link, now);
            return;
        }
        Ok(Classified::Control(doc)) => doc,
        Err(e) => {
            log::warn!("dropping malformed frame: {:?}", e);
            return;
        }
    };

    let Some(msg) = comm::parse_control(doc) else {
        log::warn!("dropping unparseable control message");
        return;
    };

    match msg {
        ControlIn::Ack { status } => {
            if coord.on_ack(status, src, now, link) {
                // Complete the handshake: we are set up and reachable.
                send_control(
                    link,
                    src,
                    &ControlOut::Ready {
                        source: board::DEVICE_NAME,
                        timestamp: now,
                    },
                );
            }
        }
        ControlIn::Heartbeat { devices } => {
            coord.on_heartbeat(src, now);
            log::debug!("heartbeat from coordinator ({} devices)", devices);
        }
        ControlIn::Status {
            total_devices,
            devices,
        } => {
            log::info!(
                "mesh status: {} devices, {} summarized",
                total_devices,
                devices.len()
            );
        }
        ControlIn::AudioData { source } => {
            log::debug!("audio_data announcement from {}", source);
            send_control(
                link,
                src,
                &ControlOut::AudioAck {
                    source: board::DEVICE_NAME,
                    status: "received",
                    timestamp: now,
                    sequence: None,
                    chunk: None,
                },
            );
        }
        ControlIn::TestAudio {
            test_id,
            data_size,
            checksum,
        } => {
            relay_handle_test_audio(src, doc, test_id, data_size, checksum, link, now);
        }
        ControlIn::TestAck { test_id, status } => {
            log::info!("test {} acked: {}", test_id, status);
        }
        ControlIn::Join { .. } | ControlIn::Ready | ControlIn::Leave | ControlIn::AudioAck { .. } => {
            log::debug!("ignoring hub-bound message");
        }
    }
}

#[cfg(feature = "role-relay")]
fn relay_handle_audio(
    src: &PeerAddr,
    audio: Frame<'_>,
    coord: &mut CoordinatorLink,
    link: &mut EspNowLink<'_>,
    now: u32,
) {
    if !BLE_CONNECTED.load(Ordering::Relaxed) {
        // No listener — drop silently to keep the mesh path cheap.
        return;
    }

    match audio {
        Frame::Pcm16 { header, payload } => {
            if !NOTIFY_QUEUE.try_push(PayloadKind::Raw16, payload) {
                log::warn!("notify queue full, chunk {} dropped", header.sequence);
            }
            if coord.coordinator().as_ref() == Some(src) {
                send_control(
                    link,
                    src,
                    &ControlOut::AudioAck {
                        source: board::DEVICE_NAME,
                        status: "received",
                        timestamp: now,
                        sequence: Some(header.sequence),
                        chunk: Some(header.chunk_index),
                    },
                );
            }
        }
        Frame::Legacy8 { payload, .. } | Frame::Raw8 { payload } => {
            if !NOTIFY_QUEUE.try_push(PayloadKind::Legacy8, payload) {
                log::warn!("notify queue full, legacy payload dropped");
            }
        }
    }
}

/// Validate a checksummed test datagram; the ack is withheld on mismatch
/// and nothing is ever retransmitted.
#[cfg(feature = "role-relay")]
fn relay_handle_test_audio(
    src: &PeerAddr,
    doc: &[u8],
    test_id: u32,
    data_size: u16,
    expected: u32,
    link: &mut EspNowLink<'_>,
    now: u32,
) {
    let actual = wavemesh::protocol::test_checksum(doc);
    if actual != expected {
        log::warn!(
            "test {} checksum mismatch: expected {:#06x}, got {:#06x}",
            test_id,
            expected,
            actual
        );
        return;
    }

    log::info!("test {} verified ({} bytes)", test_id, data_size);
    send_control(
        link,
        src,
        &ControlOut::TestAck {
            source: board::DEVICE_NAME,
            test_id,
            status: "received",
            timestamp: now,
        },
    );
}
