use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use shared::protocol::{ANNOUNCEMENT_VERSION, CAPABILITIES, COMPANY};
use shared::types::{AnnouncementStatus, ServiceAnnouncement};
use super::DiscoveryError;

/// Any routable address works; nothing is ever sent to it
const ROUTE_PROBE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

const GOODBYE_MESSAGE: &str = "ADAM Audio Service shutting down";

/// Everything needed to build a fresh announcement
#[derive(Debug, Clone)]
pub struct AnnouncementSource {
    pub service_name: String,
    pub port: u16,
    pub discovery_port: u16,
    /// Announce this address instead of resolving the default route
    pub advertise_ip: Option<IpAddr>,
}

impl AnnouncementSource {
    /// Build an announcement from the current host state
    pub async fn build(
        &self,
        status: AnnouncementStatus,
        sequence: u64,
    ) -> Result<ServiceAnnouncement, DiscoveryError> {
        let ip = match self.advertise_ip {
            Some(ip) => ip,
            None => resolve_local_ip().await?,
        };

        Ok(ServiceAnnouncement {
            service_name: self.service_name.clone(),
            company: COMPANY.to_string(),
            ip: ip.to_string(),
            port: self.port,
            hostname: local_hostname(),
            timestamp: unix_seconds(),
            version: ANNOUNCEMENT_VERSION.to_string(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            discovery_port: self.discovery_port,
            message: (status == AnnouncementStatus::Goodbye).then(|| GOODBYE_MESSAGE.to_string()),
            status,
            sequence,
        })
    }
}

/// Local address the OS would use to reach the outside world.
/// Connecting a UDP socket only selects a route; no packet leaves the host.
pub async fn resolve_local_ip() -> Result<IpAddr, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(DiscoveryError::Resolve)?;
    socket
        .connect(ROUTE_PROBE_ADDR)
        .await
        .map_err(DiscoveryError::Resolve)?;
    let local = socket.local_addr().map_err(DiscoveryError::Resolve)?;
    Ok(local.ip())
}

pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            tracing::warn!("Failed to get system hostname: {}", e);
            "unknown".to_string()
        }
    }
}

fn unix_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}
