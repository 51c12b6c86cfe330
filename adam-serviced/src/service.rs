use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use crate::config::Config;
use crate::discovery::announce::AnnouncementSource;
use crate::discovery::beacon::Beacon;
use crate::dispatch::{Dispatcher, StorageInfo};
use crate::instrument::InstrumentSupervisor;
use crate::server;
use crate::store::measurements::MeasurementAggregator;
use crate::store_manager::StoreHandle;

/// A running service: acceptor, beacon and store thread
pub struct ServiceHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    store: StoreHandle,
    server: JoinHandle<()>,
    beacon: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Address the acceptor is bound to; the port is real even if 0 was configured
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, broadcast the goodbye and stop the store thread
    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Err(e) = self.server.await {
            tracing::error!("Acceptor task failed: {}", e);
        }
        if let Some(beacon) = self.beacon {
            if let Err(e) = beacon.await {
                tracing::error!("Beacon task failed: {}", e);
            }
        }
        if let Err(e) = self.store.shutdown().await {
            tracing::error!("Failed to shutdown store: {}", e);
        }
    }
}

/// Bind the command port and start every background task.
/// Only a failed bind is fatal; a beacon that cannot start is logged and skipped.
pub async fn start(config: Config, instrument: InstrumentSupervisor) -> Result<ServiceHandle> {
    let (base_dir, mode) = config.storage.resolve_base_dir();
    tracing::info!("Measurement base directory: {} ({})", base_dir.display(), mode.as_str());

    let aggregator = MeasurementAggregator::new(base_dir.clone(), mode, config.storage.file_name.clone());
    let store = StoreHandle::spawn(aggregator);
    let dispatcher = Dispatcher::new(store.clone(), instrument, StorageInfo { base_dir, mode });

    let listener = server::bind(SocketAddr::new(config.service.host, config.service.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("{} listening on {}", config.service.service_name, local_addr);

    let cancel = CancellationToken::new();

    let server_cancel = cancel.clone();
    let io_timeout = config.service.io_timeout();
    let server = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, dispatcher, io_timeout, server_cancel).await {
            tracing::error!("Server error: {}", e);
        }
    });

    let beacon = if config.discovery.enabled {
        let source = AnnouncementSource {
            service_name: config.service.service_name.clone(),
            port: local_addr.port(),
            discovery_port: config.discovery.port,
            advertise_ip: config.discovery.advertise_ip,
        };
        let beacon = Beacon::new(source, &config.discovery);
        let beacon_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = beacon.run(beacon_cancel).await {
                tracing::error!(
                    "Discovery beacon failed, service keeps running but cannot be discovered: {}",
                    e
                );
            }
        }))
    } else {
        tracing::info!("Discovery disabled");
        None
    };

    Ok(ServiceHandle {
        local_addr,
        cancel,
        store,
        server,
        beacon,
    })
}
