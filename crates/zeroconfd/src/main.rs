use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info};

use zc_mdns::{MdnsConfig, Responder, ServiceInfo};

/// Daemon config: responder settings plus the services to publish at boot.
#[derive(Deserialize, Default)]
struct DaemonConfig {
    #[serde(default)]
    mdns: MdnsConfig,
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Deserialize)]
struct ServiceEntry {
    #[serde(rename = "type")]
    service_type: String,
    name: String,
    port: u16,
    #[serde(default)]
    properties: Vec<(String, String)>,
}

impl DaemonConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zc_mdns=debug".parse().unwrap()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/zeroconfd/config.json"));
    let config = DaemonConfig::load(&config_path)?;

    info!("zeroconfd starting as {}", config.mdns.host_name());
    let responder = Responder::spawn(config.mdns)?;

    for entry in &config.services {
        let props: Vec<(&str, Option<&[u8]>)> = entry
            .properties
            .iter()
            .map(|(k, v)| (k.as_str(), Some(v.as_bytes())))
            .collect();
        let info = ServiceInfo::new(&entry.service_type, &entry.name, entry.port)
            .with_properties(&props);
        match responder.register(info).await {
            Ok(registered) => info!("published {}", registered.qualified_name()),
            Err(e) => error!("failed to publish {}: {}", entry.name, e),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    responder.close().await;
    Ok(())
}
