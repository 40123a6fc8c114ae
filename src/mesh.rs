//! Mesh membership: the hub's peer registry and the relay's coordinator link.
//!
//! The radio transport is consumed through the [`RadioLink`] seam; the
//! firmware implements it over ESP-NOW, tests use a recording fake.
//! Membership is self-healing: a send the transport rejects as unknown
//! removes that peer on the spot.

use core::fmt::Write;

use heapless::Vec;

use crate::protocol::{AckStatus, MacString, NameString, PeerSummary, MAX_STATUS_PEERS};

/// Physical radio address of a node.
pub type PeerAddr = [u8; 6];

/// Join requests go here when no coordinator address is known yet.
pub const BROADCAST_ADDR: PeerAddr = [0xFF; 6];

/// Registry capacity. Insertion beyond this fails explicitly, never evicts.
pub const MAX_PEERS: usize = 4;

/// Liveness beacon cadence (hub → peers).
pub const HEARTBEAT_INTERVAL_MS: u32 = 5_000;

/// Membership snapshot cadence (hub → peers).
pub const STATUS_INTERVAL_MS: u32 = 5_000;

/// Heartbeat silence after which a peer (or the coordinator) is presumed gone.
pub const PEER_TIMEOUT_MS: u32 = 30_000;

/// Relay join retry cadence.
pub const JOIN_RETRY_MS: u32 = 15_000;

/// Join rounds before the relay gives up for good.
pub const MAX_JOIN_ATTEMPTS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The transport does not know this peer — membership is stale.
    UnknownPeer,
    /// Any other transport failure.
    Link,
}

/// Datagram radio transport, as consumed by the membership layer.
pub trait RadioLink {
    fn register_peer(&mut self, addr: &PeerAddr) -> Result<(), SendError>;
    fn unregister_peer(&mut self, addr: &PeerAddr);
    fn send(&mut self, addr: &PeerAddr, frame: &[u8]) -> Result<(), SendError>;
}

/// A mesh member known to the hub.
#[derive(Debug, Clone)]
pub struct MeshPeer {
    pub addr: PeerAddr,
    pub name: NameString,
    pub kind: NameString,
    /// Uptime stamp of the last join/ready/heartbeat from this peer.
    pub last_seen_ms: u32,
    /// False until the peer confirms `mesh_ready` — no traffic before that.
    pub active: bool,
    pub is_coordinator: bool,
    /// Advisory link quality, 0–100.
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New peer inserted (inactive until ready).
    Added,
    /// Already known — last-seen refreshed, active state untouched.
    Refreshed,
    /// Registry at capacity; nothing inserted.
    Full,
    /// Transport refused to register the address; nothing inserted.
    Rejected,
}

/// Bounded set of mesh peers with a two-phase join lifecycle. Owned by the hub.
pub struct PeerRegistry {
    peers: Vec<MeshPeer, MAX_PEERS>,
}

impl PeerRegistry {
    pub const fn new() -> Self {
        Self { peers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn find(&self, addr: &PeerAddr) -> Option<&MeshPeer> {
        self.peers.iter().find(|p| &p.addr == addr)
    }

    /// Number of peers that completed the ready handshake.
    pub fn active_count(&self) -> usize {
        self.peers.iter().filter(|p| p.active).count()
    }

    /// Handle a `mesh_join`. A known address is refreshed; a new one is
    /// registered with the transport and inserted inactive. The caller acks
    /// `joined` for Added/Refreshed and `failed` for Full/Rejected.
    pub fn join(
        &mut self,
        addr: &PeerAddr,
        name: &str,
        kind: &str,
        now_ms: u32,
        link: &mut impl RadioLink,
    ) -> JoinOutcome {
        if let Some(peer) = self.peers.iter_mut().find(|p| &p.addr == addr) {
            // Re-join of a known device: refresh, but keep it inactive
            // until it confirms ready again.
            peer.last_seen_ms = now_ms;
            log::info!("peer {} re-joined", peer.name);
            return JoinOutcome::Refreshed;
        }

        if self.peers.is_full() {
            log::warn!("registry full, rejecting join from {}", name);
            return JoinOutcome::Full;
        }

        if link.register_peer(addr).is_err() {
            log::warn!("transport rejected peer registration for {}", name);
            return JoinOutcome::Rejected;
        }

        let mut peer = MeshPeer {
            addr: *addr,
            name: NameString::new(),
            kind: NameString::new(),
            last_seen_ms: now_ms,
            active: false,
            is_coordinator: false,
            quality: 100,
        };
        let _ = peer.name.push_str(name);
        let _ = peer.kind.push_str(kind);
        // Capacity was checked above.
        let _ = self.peers.push(peer);
        log::info!("peer {} joined ({} total)", name, self.peers.len());
        JoinOutcome::Added
    }

    /// Handle a `mesh_ready`: the peer finished local setup and may now
    /// receive traffic.
    pub fn mark_ready(&mut self, addr: &PeerAddr, now_ms: u32) -> bool {
        if let Some(peer) = self.peers.iter_mut().find(|p| &p.addr == addr) {
            peer.last_seen_ms = now_ms;
            peer.active = true;
            log::info!("peer {} ready", peer.name);
            true
        } else {
            false
        }
    }

    /// Handle a `mesh_heartbeat` from a peer.
    pub fn heartbeat(&mut self, addr: &PeerAddr, now_ms: u32) -> bool {
        if let Some(peer) = self.peers.iter_mut().find(|p| &p.addr == addr) {
            peer.last_seen_ms = now_ms;
            peer.active = true;
            true
        } else {
            false
        }
    }

    /// Remove a peer explicitly (`mesh_leave` or send failure).
    pub fn remove(&mut self, addr: &PeerAddr, link: &mut impl RadioLink) -> bool {
        if let Some(idx) = self.peers.iter().position(|p| &p.addr == addr) {
            let peer = self.peers.remove(idx);
            link.unregister_peer(addr);
            log::info!("peer {} removed ({} left)", peer.name, self.peers.len());
            true
        } else {
            false
        }
    }

    /// Drop active peers that have been silent past the timeout.
    /// Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u32, link: &mut impl RadioLink) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.peers.len() {
            let peer = &self.peers[i];
            if peer.active && now_ms.wrapping_sub(peer.last_seen_ms) > PEER_TIMEOUT_MS {
                log::warn!("peer {} timed out", peer.name);
                let addr = peer.addr;
                self.peers.remove(i);
                link.unregister_peer(&addr);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Send a frame to every active peer. A send rejected as `UnknownPeer`
    /// removes that peer inline. Returns the number of successful sends.
    pub fn fan_out(&mut self, frame: &[u8], link: &mut impl RadioLink) -> usize {
        self.fan_out_filtered(frame, None, link)
    }

    /// Fan out to every active peer except `skip` (audio relay: never echo
    /// back to the source).
    pub fn fan_out_except(
        &mut self,
        frame: &[u8],
        skip: &PeerAddr,
        link: &mut impl RadioLink,
    ) -> usize {
        self.fan_out_filtered(frame, Some(skip), link)
    }

    fn fan_out_filtered(
        &mut self,
        frame: &[u8],
        skip: Option<&PeerAddr>,
        link: &mut impl RadioLink,
    ) -> usize {
        let mut sent = 0;
        let mut i = 0;
        while i < self.peers.len() {
            let peer = &self.peers[i];
            if !peer.active || skip == Some(&peer.addr) {
                i += 1;
                continue;
            }
            match link.send(&peer.addr, frame) {
                Ok(()) => {
                    sent += 1;
                    i += 1;
                }
                Err(SendError::UnknownPeer) => {
                    // Stale membership — heal it now.
                    log::warn!("transport lost peer {}, removing", peer.name);
                    let addr = peer.addr;
                    self.peers.remove(i);
                    link.unregister_peer(&addr);
                }
                Err(SendError::Link) => {
                    i += 1;
                }
            }
        }
        sent
    }

    /// Short-key device summaries for a `mesh_status` document, bounded to
    /// the wire limit.
    pub fn summaries(&self) -> Vec<PeerSummary, MAX_STATUS_PEERS> {
        let mut out = Vec::new();
        for peer in self.peers.iter().filter(|p| p.active) {
            let mut mac = MacString::new();
            format_mac_compact(&peer.addr, &mut mac);
            let entry = PeerSummary {
                mac,
                name: peer.name.clone(),
                kind: peer.kind.clone(),
                last_seen_s: peer.last_seen_ms / 1000,
                quality: peer.quality,
            };
            if out.push(entry).is_err() {
                break;
            }
        }
        out
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Relay-side coordinator link ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No coordinator bound; a join round is due.
    Idle,
    /// Join sent, waiting for an ack.
    Joining,
    /// Coordinator bound and registered with the transport.
    Connected,
    /// Retry budget spent — no further automatic attempts.
    Exhausted,
}

/// What the caller should do after a [`CoordinatorLink::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Broadcast a `mesh_join` to the candidate addresses.
    SendJoin,
    /// The coordinator went silent and the binding was cleared.
    Dropped,
}

/// The relay's single-peer view of the mesh: the connection to the hub.
pub struct CoordinatorLink {
    state: LinkState,
    coordinator: Option<PeerAddr>,
    last_attempt_ms: u32,
    last_heartbeat_ms: u32,
    attempts: u8,
}

impl CoordinatorLink {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Idle,
            coordinator: None,
            last_attempt_ms: 0,
            last_heartbeat_ms: 0,
            attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn coordinator(&self) -> Option<PeerAddr> {
        self.coordinator
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Drive retries and the silence timeout. Call on a periodic task.
    ///
    /// The attempt counter is cumulative across reconnects; once spent the
    /// link parks in [`LinkState::Exhausted`] until [`reset`](Self::reset).
    pub fn tick(&mut self, now_ms: u32, link: &mut impl RadioLink) -> Option<LinkAction> {
        match self.state {
            LinkState::Idle => {
                if self.attempts >= MAX_JOIN_ATTEMPTS {
                    log::warn!("join attempts exhausted, stopping reconnection");
                    self.state = LinkState::Exhausted;
                    return None;
                }
                self.state = LinkState::Joining;
                self.attempts += 1;
                self.last_attempt_ms = now_ms;
                log::info!(
                    "joining mesh (attempt {}/{})",
                    self.attempts,
                    MAX_JOIN_ATTEMPTS
                );
                Some(LinkAction::SendJoin)
            }
            LinkState::Joining => {
                if now_ms.wrapping_sub(self.last_attempt_ms) < JOIN_RETRY_MS {
                    return None;
                }
                if self.attempts >= MAX_JOIN_ATTEMPTS {
                    log::warn!("join attempts exhausted, stopping reconnection");
                    self.state = LinkState::Exhausted;
                    return None;
                }
                self.attempts += 1;
                self.last_attempt_ms = now_ms;
                log::info!(
                    "joining mesh (attempt {}/{})",
                    self.attempts,
                    MAX_JOIN_ATTEMPTS
                );
                Some(LinkAction::SendJoin)
            }
            LinkState::Connected => {
                if now_ms.wrapping_sub(self.last_heartbeat_ms) > PEER_TIMEOUT_MS {
                    log::warn!("coordinator heartbeat timeout, dropping link");
                    if let Some(addr) = self.coordinator.take() {
                        link.unregister_peer(&addr);
                    }
                    self.state = LinkState::Idle;
                    return Some(LinkAction::Dropped);
                }
                None
            }
            LinkState::Exhausted => None,
        }
    }

    /// Handle a `mesh_ack`. A `joined` ack binds the sender as coordinator
    /// and registers it with the transport; returns true when the caller
    /// should reply with `mesh_ready`.
    pub fn on_ack(
        &mut self,
        status: AckStatus,
        from: &PeerAddr,
        now_ms: u32,
        link: &mut impl RadioLink,
    ) -> bool {
        match status {
            AckStatus::Joined => {
                if self.state == LinkState::Connected {
                    self.last_heartbeat_ms = now_ms;
                    return false;
                }
                if link.register_peer(from).is_err() {
                    log::warn!("failed to register coordinator with transport");
                    return false;
                }
                self.coordinator = Some(*from);
                self.state = LinkState::Connected;
                self.last_heartbeat_ms = now_ms;
                log::info!("joined mesh, coordinator bound");
                true
            }
            AckStatus::Failed => {
                log::warn!("join rejected by coordinator");
                false
            }
        }
    }

    /// Stamp coordinator liveness on a received heartbeat.
    pub fn on_heartbeat(&mut self, from: &PeerAddr, now_ms: u32) {
        if self.coordinator.as_ref() == Some(from) {
            self.last_heartbeat_ms = now_ms;
        }
    }

    /// Clear the retry budget and return to Idle. Recovery hook for
    /// supervisory code; nothing calls it automatically.
    pub fn reset(&mut self) {
        self.state = LinkState::Idle;
        self.coordinator = None;
        self.attempts = 0;
    }
}

impl Default for CoordinatorLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a radio address as "AA:BB:CC:DD:EE:FF".
pub fn format_mac(addr: &PeerAddr, buf: &mut MacString) {
    let _ = write!(
        buf,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    );
}

/// Format a radio address as 12 hex chars — the short form used in
/// status summaries to save wire space.
pub fn format_mac_compact(addr: &PeerAddr, buf: &mut MacString) {
    let _ = write!(
        buf,
        "{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeLink {
        registered: std::vec::Vec<PeerAddr>,
        sent: std::vec::Vec<(PeerAddr, std::vec::Vec<u8>)>,
        reject_register: bool,
        /// Addresses whose sends fail with UnknownPeer.
        lost: std::vec::Vec<PeerAddr>,
    }

    impl RadioLink for FakeLink {
        fn register_peer(&mut self, addr: &PeerAddr) -> Result<(), SendError> {
            if self.reject_register {
                return Err(SendError::Link);
            }
            self.registered.push(*addr);
            Ok(())
        }

        fn unregister_peer(&mut self, addr: &PeerAddr) {
            self.registered.retain(|a| a != addr);
        }

        fn send(&mut self, addr: &PeerAddr, frame: &[u8]) -> Result<(), SendError> {
            if self.lost.contains(addr) {
                return Err(SendError::UnknownPeer);
            }
            self.sent.push((*addr, frame.to_vec()));
            Ok(())
        }
    }

    fn addr(n: u8) -> PeerAddr {
        [0x10, 0x00, 0x3B, 0x48, 0x9C, n]
    }

    #[test]
    fn join_is_two_phase() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        assert_eq!(
            reg.join(&addr(1), "relay-1", "audio_relay", 100, &mut link),
            JoinOutcome::Added
        );
        // Joined but not ready: no traffic yet.
        assert_eq!(reg.active_count(), 0);
        assert_eq!(reg.fan_out(b"frame", &mut link), 0);

        assert!(reg.mark_ready(&addr(1), 200));
        assert_eq!(reg.active_count(), 1);
        assert_eq!(reg.fan_out(b"frame", &mut link), 1);
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn join_at_capacity_fails_and_leaves_registry_unchanged() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        for n in 0..MAX_PEERS as u8 {
            assert_eq!(
                reg.join(&addr(n), "relay", "audio_relay", 0, &mut link),
                JoinOutcome::Added
            );
        }
        assert_eq!(reg.len(), MAX_PEERS);

        assert_eq!(
            reg.join(&addr(99), "late", "audio_relay", 0, &mut link),
            JoinOutcome::Full
        );
        assert_eq!(reg.len(), MAX_PEERS);
        assert!(reg.find(&addr(99)).is_none());
    }

    #[test]
    fn rejoin_refreshes_without_reactivating() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        reg.join(&addr(1), "relay-1", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(1), 10);
        assert_eq!(
            reg.join(&addr(1), "relay-1", "audio_relay", 500, &mut link),
            JoinOutcome::Refreshed
        );
        assert_eq!(reg.find(&addr(1)).unwrap().last_seen_ms, 500);
        // Only one transport registration happened.
        assert_eq!(link.registered.len(), 1);
    }

    #[test]
    fn transport_rejection_inserts_nothing() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink {
            reject_register: true,
            ..Default::default()
        };
        assert_eq!(
            reg.join(&addr(1), "relay-1", "audio_relay", 0, &mut link),
            JoinOutcome::Rejected
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn sweep_removes_silent_active_peers() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        reg.join(&addr(1), "relay-1", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(1), 0);
        reg.join(&addr(2), "relay-2", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(2), 0);

        // One peer keeps heartbeating, the other goes silent.
        reg.heartbeat(&addr(2), PEER_TIMEOUT_MS);

        let removed = reg.sweep(PEER_TIMEOUT_MS + 1, &mut link);
        assert_eq!(removed, 1);
        assert!(reg.find(&addr(1)).is_none());
        assert!(reg.find(&addr(2)).is_some());

        // The timed-out peer is absent from subsequent fan-out.
        reg.fan_out(b"frame", &mut link);
        assert!(link.sent.iter().all(|(a, _)| a != &addr(1)));
    }

    #[test]
    fn unknown_peer_send_heals_membership() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        reg.join(&addr(1), "relay-1", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(1), 0);
        reg.join(&addr(2), "relay-2", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(2), 0);

        link.lost.push(addr(1));
        assert_eq!(reg.fan_out(b"frame", &mut link), 1);
        assert_eq!(reg.len(), 1);
        assert!(reg.find(&addr(1)).is_none());
    }

    #[test]
    fn fan_out_except_skips_the_source() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        reg.join(&addr(1), "relay-1", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(1), 0);
        reg.join(&addr(2), "relay-2", "audio_relay", 0, &mut link);
        reg.mark_ready(&addr(2), 0);

        assert_eq!(reg.fan_out_except(b"frame", &addr(1), &mut link), 1);
        assert_eq!(link.sent.len(), 1);
        assert_eq!(link.sent[0].0, addr(2));
    }

    #[test]
    fn summaries_cover_active_peers_only() {
        let mut reg = PeerRegistry::new();
        let mut link = FakeLink::default();

        reg.join(&addr(1), "relay-1", "audio_relay", 4_000, &mut link);
        reg.mark_ready(&addr(1), 4_000);
        reg.join(&addr(2), "relay-2", "audio_relay", 0, &mut link);

        let summaries = reg.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name.as_str(), "relay-1");
        assert_eq!(summaries[0].last_seen_s, 4);
        assert_eq!(summaries[0].mac.len(), 12);
    }

    // ── CoordinatorLink ────────────────────────────────────────────────

    #[test]
    fn link_joins_and_binds_on_ack() {
        let mut cl = CoordinatorLink::new();
        let mut link = FakeLink::default();

        assert_eq!(cl.tick(0, &mut link), Some(LinkAction::SendJoin));
        assert_eq!(cl.state(), LinkState::Joining);

        // Ack from the hub binds and requests a ready reply.
        assert!(cl.on_ack(AckStatus::Joined, &addr(7), 100, &mut link));
        assert_eq!(cl.state(), LinkState::Connected);
        assert_eq!(cl.coordinator(), Some(addr(7)));
        assert_eq!(link.registered, vec![addr(7)]);
    }

    #[test]
    fn link_retries_on_interval_then_exhausts() {
        let mut cl = CoordinatorLink::new();
        let mut link = FakeLink::default();

        let mut now = 0u32;
        let mut joins = 0;
        // Run well past the budget; count actual join rounds.
        for _ in 0..MAX_JOIN_ATTEMPTS as u32 + 5 {
            if cl.tick(now, &mut link) == Some(LinkAction::SendJoin) {
                joins += 1;
            }
            now = now.wrapping_add(JOIN_RETRY_MS);
        }
        assert_eq!(joins, MAX_JOIN_ATTEMPTS as u32);
        assert_eq!(cl.state(), LinkState::Exhausted);

        // Exhausted is terminal for the automatic path.
        assert_eq!(cl.tick(now, &mut link), None);

        cl.reset();
        assert_eq!(cl.tick(now, &mut link), Some(LinkAction::SendJoin));
    }

    #[test]
    fn link_no_retry_before_interval() {
        let mut cl = CoordinatorLink::new();
        let mut link = FakeLink::default();

        assert_eq!(cl.tick(0, &mut link), Some(LinkAction::SendJoin));
        assert_eq!(cl.tick(JOIN_RETRY_MS - 1, &mut link), None);
        assert_eq!(cl.tick(JOIN_RETRY_MS, &mut link), Some(LinkAction::SendJoin));
    }

    #[test]
    fn link_drops_on_heartbeat_silence() {
        let mut cl = CoordinatorLink::new();
        let mut link = FakeLink::default();

        cl.tick(0, &mut link);
        cl.on_ack(AckStatus::Joined, &addr(7), 0, &mut link);

        cl.on_heartbeat(&addr(7), 10_000);
        assert_eq!(cl.tick(20_000, &mut link), None);

        // Silence past the timeout clears the binding.
        assert_eq!(
            cl.tick(10_000 + PEER_TIMEOUT_MS + 1, &mut link),
            Some(LinkAction::Dropped)
        );
        assert_eq!(cl.state(), LinkState::Idle);
        assert_eq!(cl.coordinator(), None);
        assert!(link.registered.is_empty());
    }

    #[test]
    fn failed_ack_keeps_joining() {
        let mut cl = CoordinatorLink::new();
        let mut link = FakeLink::default();

        cl.tick(0, &mut link);
        assert!(!cl.on_ack(AckStatus::Failed, &addr(7), 10, &mut link));
        assert_eq!(cl.state(), LinkState::Joining);
        assert_eq!(cl.coordinator(), None);
    }

    #[test]
    fn mac_formatting() {
        let mut s = MacString::new();
        format_mac(&[0x10, 0x00, 0x3B, 0x48, 0x9C, 0x3C], &mut s);
        assert_eq!(s.as_str(), "10:00:3B:48:9C:3C");

        let mut s = MacString::new();
        format_mac_compact(&[0x10, 0x00, 0x3B, 0x48, 0x9C, 0x3C], &mut s);
        assert_eq!(s.as_str(), "10003B489C3C");
    }
}
