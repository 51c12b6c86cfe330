//! Locating a running service: direct TCP probes and listening for beacons.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use thiserror::Error;
use shared::protocol::{
    DEFAULT_DISCOVERY_PORT, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_PORT, MAX_ANNOUNCEMENT_SIZE,
};
use shared::types::ServiceAnnouncement;

/// Timeout of the direct probe that precedes discovery
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed receive so a persistent socket error cannot spin
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind discovery port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// What a client looks for, and where
#[derive(Debug, Clone)]
pub struct Connector {
    pub service_name: String,
    pub default_port: u16,
    pub discovery_port: u16,
}

impl Default for Connector {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            default_port: DEFAULT_SERVICE_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
        }
    }
}

/// True iff a TCP connection to `host:port` completes within `timeout`
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    tracing::debug!("Checking connection to ADAM service {}:{} (timeout: {:?})", host, port, timeout);

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            tracing::info!("Connection successful to ADAM service {}:{}", host, port);
            true
        }
        Ok(Err(e)) => {
            tracing::debug!("Connection failed to {}:{} - {}", host, port, e);
            false
        }
        Err(_) => {
            tracing::debug!("Connection to {}:{} timed out", host, port);
            false
        }
    }
}

impl Connector {
    pub fn new(service_name: impl Into<String>, default_port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            default_port,
            ..Self::default()
        }
    }

    /// Listen for any announcement of our service. Returns as soon as one
    /// arrives; goodbyes count, since they still prove a service is there.
    pub async fn any_service_exists(&self, timeout: Duration) -> bool {
        tracing::debug!("Starting ADAM service discovery check (timeout: {:?})", timeout);

        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!("Discovery error: {}", e);
                return false;
            }
        };

        let deadline = Instant::now() + timeout;
        if let Some((announcement, from)) = self.next_match(&socket, deadline).await {
            tracing::info!(
                "ADAM service discovered via broadcast from {}: {} at {}:{}",
                from.ip(),
                announcement.service_name,
                announcement.ip,
                announcement.port
            );
            return true;
        }

        tracing::debug!("No ADAM service found via discovery after {:?}", timeout);
        false
    }

    /// Find a live service and return its IP.
    ///
    /// `target_ip` is probed first. Otherwise announcements are accepted only
    /// if the advertised `ip:port` answers a probe; the first one that does wins.
    pub async fn find_service_ip(
        &self,
        target_ip: Option<&str>,
        target_port: Option<u16>,
        discovery_timeout: Duration,
    ) -> Option<String> {
        let target_port = target_port.unwrap_or(self.default_port);
        tracing::info!(
            "Finding ADAM service - target_ip: {}, port: {}, discovery_timeout: {:?}",
            target_ip.unwrap_or("None"),
            target_port,
            discovery_timeout
        );

        if let Some(ip) = target_ip {
            if probe(ip, target_port, PROBE_TIMEOUT).await {
                tracing::info!("ADAM service found at specified IP: {}:{}", ip, target_port);
                return Some(ip.to_string());
            }
            tracing::debug!("Specific IP not reachable, trying discovery...");
        }

        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!("Discovery error during service search: {}", e);
                return None;
            }
        };

        let deadline = Instant::now() + discovery_timeout;
        while let Some((announcement, _)) = self.next_match(&socket, deadline).await {
            if announcement.is_goodbye() || announcement.ip.is_empty() {
                continue;
            }
            let port = match announcement.port {
                0 => self.default_port,
                port => port,
            };
            if probe(&announcement.ip, port, PROBE_TIMEOUT).await {
                tracing::info!("ADAM service found via discovery: {}:{}", announcement.ip, port);
                return Some(announcement.ip);
            }
            tracing::debug!("Announced service {}:{} did not answer", announcement.ip, port);
        }

        tracing::warn!("No ADAM service found after {:?} discovery timeout", discovery_timeout);
        None
    }

    async fn bind(&self) -> Result<UdpSocket, DiscoveryError> {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.discovery_port))
            .await
            .map_err(|source| DiscoveryError::Bind {
                port: self.discovery_port,
                source,
            })
    }

    /// Next announcement matching our name or company tag before `deadline`.
    /// Anything unparseable or foreign is skipped.
    async fn next_match(
        &self,
        socket: &UdpSocket,
        deadline: Instant,
    ) -> Option<(ServiceAnnouncement, SocketAddr)> {
        let mut buf = [0u8; MAX_ANNOUNCEMENT_SIZE];
        loop {
            let (n, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => return None,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    tracing::debug!("Discovery receive error: {}", e);
                    tokio::time::sleep_until(error_backoff_until(deadline)).await;
                    continue;
                }
            };

            let Ok(announcement) = serde_json::from_slice::<ServiceAnnouncement>(&buf[..n]) else {
                tracing::debug!("Ignoring malformed datagram from {}", from);
                continue;
            };
            if announcement.matches(&self.service_name) {
                return Some((announcement, from));
            }
        }
    }
}

/// When to retry after a receive error, never later than `deadline`
fn error_backoff_until(deadline: Instant) -> Instant {
    (Instant::now() + RECV_ERROR_BACKOFF).min(deadline)
}
