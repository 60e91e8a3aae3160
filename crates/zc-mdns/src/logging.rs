use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::error;

#[derive(Serialize)]
struct TrafficLogEntry {
    ts: String,
    from: String,
    qr: bool,
    qd: u16,
    an: u16,
    ns: u16,
    ar: u16,
    bytes: usize,
}

/// JSON-lines log of every datagram the responder sees. Entries are handed
/// to a background writer task; the engine never blocks on file I/O.
pub struct TrafficLogger {
    sender: mpsc::UnboundedSender<TrafficLogEntry>,
}

impl TrafficLogger {
    pub fn new(path: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let path = PathBuf::from(path);
        tokio::spawn(async move {
            if let Err(e) = write_entries(path, receiver).await {
                error!("traffic log writer stopped: {}", e);
            }
        });
        Self { sender }
    }

    pub fn log(&self, peer: SocketAddr, header: &zc_proto::DnsHeader, bytes: usize) {
        // Send errors mean the writer died; nothing useful to do here
        let _ = self.sender.send(TrafficLogEntry {
            ts: Utc::now().to_rfc3339(),
            from: peer.to_string(),
            qr: header.is_response(),
            qd: header.qd_count,
            an: header.an_count,
            ns: header.ns_count,
            ar: header.ar_count,
            bytes,
        });
    }
}

async fn write_entries(
    path: PathBuf,
    mut receiver: mpsc::UnboundedReceiver<TrafficLogEntry>,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .await?;
    let mut out = tokio::io::BufWriter::new(file);

    while let Some(entry) = receiver.recv().await {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}
