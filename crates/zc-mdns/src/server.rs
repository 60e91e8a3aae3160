//! Multicast socket plumbing. The engine never touches the socket: a
//! receiver task posts incoming frames, a sender task drains outgoing
//! ones. Either task ending signals the engine to rebuild the pair.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::mpsc;
use tracing::{info, warn};

use zc_proto::{MAX_PACKET_SIZE_ABSOLUTE, MDNS_GROUP, MDNS_PORT};

use crate::config::MdnsConfig;

/// Build the socket pair and spawn the receiver and sender tasks.
/// Returns (incoming frames, outgoing frame sink).
pub(crate) fn spawn_socket(
    cfg: &MdnsConfig,
) -> Result<(
    mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
)> {
    let socket = build_socket(cfg)?;
    let socket = Arc::new(tokio::net::UdpSocket::from_std(socket)?);
    info!("joined {} on port {}", MDNS_GROUP, cfg.port);

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(Vec<u8>, SocketAddr)>();

    let recv_socket = socket.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_PACKET_SIZE_ABSOLUTE];
        loop {
            match recv_socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    if frame_tx.send((buf[..len].to_vec(), src)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Dropping frame_tx tells the engine to recover
                    warn!("multicast recv error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some((frame, dest)) = out_rx.recv().await {
            if let Err(e) = socket.send_to(&frame, dest).await {
                warn!("multicast send to {} failed: {}", dest, e);
                break;
            }
        }
    });

    Ok((frame_rx, out_tx))
}

fn build_socket(cfg: &MdnsConfig) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr: SocketAddr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.port));
    socket.bind(&addr.into())?;

    let iface: Ipv4Addr = if cfg.interface.is_empty() {
        Ipv4Addr::UNSPECIFIED
    } else {
        cfg.interface
            .parse()
            .with_context(|| format!("bad interface address {}", cfg.interface))?
    };
    socket.join_multicast_v4(&MDNS_GROUP, &iface)?;
    // RFC 6762 §11: link-local scope, IP TTL 255
    socket.set_multicast_ttl_v4(255)?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Best-effort primary IPv4 address: the source address the kernel picks
/// toward the multicast group. Interface enumeration stays out of scope.
pub(crate) fn primary_v4_address() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((MDNS_GROUP, MDNS_PORT)).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        _ => None,
    }
}
