//! Periodic UDP broadcast of the service's presence.
//!
//! The beacon announces quickly right after start so that waiting
//! workstations find the service within a second, then settles to the
//! normal interval. On shutdown it broadcasts a goodbye three times since
//! nothing acknowledges a datagram.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use shared::protocol::MAX_ANNOUNCEMENT_SIZE;
use shared::types::AnnouncementStatus;
use crate::config::DiscoveryConfig;
use super::announce::AnnouncementSource;
use super::DiscoveryError;

const GOODBYE_REPEATS: usize = 3;
const GOODBYE_SPACING: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fast,
    Normal,
    Stopped,
}

/// Announcement schedule: `fast_announcements` at the initial interval, then the normal one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub fast_announcements: u32,
    pub initial_interval: Duration,
    pub normal_interval: Duration,
}

impl Cadence {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            fast_announcements: config.fast_announcements,
            initial_interval: config.initial_interval(),
            normal_interval: config.normal_interval(),
        }
    }

    /// Phase the beacon is in once `sent` announcements went out
    pub fn phase(&self, sent: u64) -> Phase {
        if sent < u64::from(self.fast_announcements) {
            Phase::Fast
        } else {
            Phase::Normal
        }
    }

    /// Wait after announcement number `index` (0-based) was sent
    pub fn interval_after(&self, index: u64) -> Duration {
        match self.phase(index) {
            Phase::Fast => self.initial_interval,
            _ => self.normal_interval,
        }
    }
}

pub struct Beacon {
    source: AnnouncementSource,
    target: SocketAddr,
    cadence: Cadence,
    phase: Phase,
}

impl Beacon {
    pub fn new(source: AnnouncementSource, config: &DiscoveryConfig) -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(config.broadcast_addr, config.port)),
            source,
            cadence: Cadence::from_config(config),
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Broadcast until `cancel` fires, then send the goodbye.
    /// Only a socket that cannot be opened ends the beacon early.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        let socket = open_broadcast_socket().await?;

        tracing::info!(
            "Discovery beacon broadcasting to {} ({} fast announcements every {:?}, then every {:?})",
            self.target,
            self.cadence.fast_announcements,
            self.cadence.initial_interval,
            self.cadence.normal_interval
        );

        let mut sequence = 0u64;
        while !cancel.is_cancelled() {
            let wait = match self.announce(&socket, AnnouncementStatus::Running, sequence).await {
                Ok(()) => {
                    let phase = self.cadence.phase(sequence);
                    if phase != self.phase {
                        tracing::debug!("Discovery beacon entering {:?} phase", phase);
                        self.phase = phase;
                    }
                    let wait = self.cadence.interval_after(sequence);
                    sequence += 1;
                    wait
                }
                Err(e) => {
                    tracing::error!("Discovery broadcast error: {}", e);
                    self.cadence.normal_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.send_goodbye(&socket, sequence).await;
        self.phase = Phase::Stopped;
        Ok(())
    }

    async fn announce(
        &self,
        socket: &UdpSocket,
        status: AnnouncementStatus,
        sequence: u64,
    ) -> Result<(), DiscoveryError> {
        let announcement = self.source.build(status, sequence).await?;
        let bytes = serde_json::to_vec(&announcement)?;
        if bytes.len() > MAX_ANNOUNCEMENT_SIZE {
            tracing::warn!("Announcement is {} bytes, receivers may truncate it", bytes.len());
        }

        socket
            .send_to(&bytes, self.target)
            .await
            .map_err(DiscoveryError::Send)?;

        tracing::debug!(
            "Discovery broadcast #{} sent: {}:{} ({:?})",
            sequence,
            announcement.ip,
            announcement.port,
            status
        );
        Ok(())
    }

    async fn send_goodbye(&self, socket: &UdpSocket, sequence: u64) {
        for i in 0..GOODBYE_REPEATS {
            if let Err(e) = self.announce(socket, AnnouncementStatus::Goodbye, sequence).await {
                tracing::error!("Failed to send goodbye broadcast: {}", e);
            }
            if i + 1 < GOODBYE_REPEATS {
                tokio::time::sleep(GOODBYE_SPACING).await;
            }
        }
        tracing::info!("Goodbye discovery broadcast sent ({}x)", GOODBYE_REPEATS);
    }
}

async fn open_broadcast_socket() -> Result<UdpSocket, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(DiscoveryError::Bind)?;
    socket.set_broadcast(true).map_err(DiscoveryError::Bind)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::time::Instant;
    use shared::types::ServiceAnnouncement;

    #[test]
    fn test_cadence_switches_after_fast_phase() {
        let cadence = Cadence::from_config(&DiscoveryConfig::default());
        for i in 0..5 {
            assert_eq!(cadence.phase(i), Phase::Fast);
            assert_eq!(cadence.interval_after(i), Duration::from_secs(1));
        }
        assert_eq!(cadence.phase(5), Phase::Normal);
        assert_eq!(cadence.interval_after(5), Duration::from_secs(2));
        assert_eq!(cadence.interval_after(500), Duration::from_secs(2));
    }

    async fn recv(socket: &UdpSocket) -> (ServiceAnnouncement, Instant) {
        let mut buf = [0u8; 2048];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .expect("no announcement within 2s")
            .unwrap();
        (serde_json::from_slice(&buf[..n]).unwrap(), Instant::now())
    }

    #[tokio::test]
    async fn test_loopback_schedule_and_goodbye() {
        let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let config = DiscoveryConfig {
            port: receiver.local_addr().unwrap().port(),
            broadcast_addr: Ipv4Addr::LOCALHOST,
            advertise_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            initial_interval_ms: 100,
            normal_interval_ms: 300,
            fast_announcements: 3,
            ..DiscoveryConfig::default()
        };
        let source = AnnouncementSource {
            service_name: "ADAMService".to_string(),
            port: 65432,
            discovery_port: config.port,
            advertise_ip: config.advertise_ip,
        };

        let cancel = CancellationToken::new();
        let beacon = Beacon::new(source, &config);
        assert_eq!(beacon.phase(), Phase::Idle);
        let task = tokio::spawn(beacon.run(cancel.clone()));

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(recv(&receiver).await);
        }

        let sequences: Vec<u64> = seen.iter().map(|(a, _)| a.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(a, _)| a.ip == "127.0.0.1" && !a.is_goodbye()));

        let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1].1 - w[0].1).collect();
        for gap in &gaps[..2] {
            assert!(*gap < Duration::from_millis(250), "fast gap {gap:?}");
        }
        // The wait after announcement #3 is the first normal one
        assert!(gaps[3] >= Duration::from_millis(250), "normal gap {:?}", gaps[3]);

        cancel.cancel();
        let mut goodbyes = 0;
        while goodbyes < 3 {
            let (a, _) = recv(&receiver).await;
            if a.is_goodbye() {
                goodbyes += 1;
            }
        }
        task.await.unwrap().unwrap();
    }
}
