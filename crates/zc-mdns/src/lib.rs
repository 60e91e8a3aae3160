//! Multicast DNS responder and resolver (RFC 6762 / RFC 6763).
//!
//! One engine task owns every piece of mutable state: the record cache, the
//! service registry, subscriptions and all timers. The receiver task posts
//! parsed frames into the engine inbox; the public [`Responder`] handle
//! posts commands and awaits reply channels. Nothing shares locks.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;

mod dispatch;
mod engine;
mod probe;
mod server;
mod tasks;

pub use config::MdnsConfig;
pub use error::EngineError;
pub use service::{Lifecycle, ServiceInfo};

use std::net::Ipv4Addr;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use engine::Engine;

/// Browse events delivered to `browse()` subscribers.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A new instance pointer appeared for the browsed type.
    Added {
        service_type: String,
        instance: String,
    },
    /// The instance pointer expired or was withdrawn with a goodbye.
    Removed {
        service_type: String,
        instance: String,
    },
    /// Enough records arrived to fully describe the instance.
    Resolved(ServiceInfo),
}

pub(crate) enum Command {
    Register {
        info: ServiceInfo,
        reply: oneshot::Sender<Result<ServiceInfo, EngineError>>,
    },
    Unregister {
        qualified_name: String,
        reply: oneshot::Sender<()>,
    },
    UnregisterAll {
        reply: oneshot::Sender<()>,
    },
    BrowseTypes {
        tx: mpsc::UnboundedSender<String>,
    },
    Browse {
        service_type: String,
        tx: mpsc::UnboundedSender<ServiceEvent>,
    },
    ResolveInfo {
        service_type: String,
        instance: String,
        timeout_ms: u64,
        reply: oneshot::Sender<Option<ServiceInfo>>,
    },
    List {
        service_type: String,
        reply: oneshot::Sender<Vec<ServiceInfo>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running responder. Cloneable; the engine stops once
/// `close()` completes or every handle is dropped.
#[derive(Clone)]
pub struct Responder {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Responder {
    /// Join the multicast group and start the engine. Must be called from
    /// within a tokio runtime.
    pub fn spawn(config: MdnsConfig) -> anyhow::Result<Self> {
        let (frame_rx, out_tx) = server::spawn_socket(&config)?;

        let mut v4: Vec<Ipv4Addr> = config
            .host_addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        let v6 = config
            .host_addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        if v4.is_empty() {
            v4.extend(server::primary_v4_address());
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(config, v4, v6, frame_rx, out_tx);
        tokio::spawn(engine.run(cmd_rx));
        Ok(Self { cmd_tx })
    }

    /// Publish a service. Resolves once the service is announced; the
    /// returned info carries the final instance name, which may have been
    /// incremented to settle a conflict.
    pub async fn register(&self, info: ServiceInfo) -> Result<ServiceInfo, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { info, reply: tx })
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Withdraw a service. Resolves after the goodbye retransmissions.
    pub async fn unregister(&self, qualified_name: &str) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Unregister {
                qualified_name: qualified_name.to_string(),
                reply: tx,
            })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn unregister_all(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::UnregisterAll { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Subscribe to service type discovery. Every already-known type is
    /// replayed into the channel first.
    pub fn browse_types(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(Command::BrowseTypes { tx });
        rx
    }

    /// Browse instances of a service type. Cached instances are replayed as
    /// `Added` events before live updates.
    pub fn browse(&self, service_type: &str) -> mpsc::UnboundedReceiver<ServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(Command::Browse {
            service_type: service_type.trim_end_matches('.').to_string(),
            tx,
        });
        rx
    }

    /// Resolve one instance. `None` when the deadline elapses first;
    /// `timeout_ms` of `None` uses the configured default.
    pub async fn service_info(
        &self,
        service_type: &str,
        instance: &str,
        timeout_ms: Option<u64>,
    ) -> Option<ServiceInfo> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ResolveInfo {
                service_type: service_type.trim_end_matches('.').to_string(),
                instance: instance.to_string(),
                timeout_ms: timeout_ms.unwrap_or(0),
                reply: tx,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Resolved instances of a type. The first call for a type starts a
    /// browse and waits a short grace window for answers.
    pub async fn list(&self, service_type: &str) -> Vec<ServiceInfo> {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::List {
                service_type: service_type.trim_end_matches('.').to_string(),
                reply: tx,
            })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Send goodbyes for every registered service and stop the engine.
    /// Idempotent: closing an already-closed responder returns immediately.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { reply: tx }).is_ok() {
            let _ = rx.await;
        } else {
            debug!("close on an already-stopped responder");
        }
    }
}
