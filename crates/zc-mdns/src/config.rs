use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// Host label announced on the link (".local" is appended).
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Addresses to publish for the host. Empty = autodetect the primary
    /// IPv4 address of the default route interface.
    #[serde(default)]
    pub host_addresses: Vec<String>,
    /// IPv4 address of the interface to join the multicast group on.
    /// Empty = let the kernel pick.
    #[serde(default)]
    pub interface: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// TTL for shared records (PTR, TXT).
    #[serde(default = "default_record_ttl")]
    pub record_ttl_secs: u32,
    /// TTL for host-bound records (A, AAAA, SRV).
    #[serde(default = "default_host_ttl")]
    pub host_ttl_secs: u32,
    #[serde(default = "default_max_packet")]
    pub max_packet_size: usize,
    #[serde(default = "default_true")]
    pub name_compression: bool,
    /// Accept compression pointers RFC 1035 allows but the strict decoder
    /// rejects.
    #[serde(default)]
    pub permissive_names: bool,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
    #[serde(default = "default_register_timeout")]
    pub register_timeout_ms: u64,
    /// JSON-lines log of every datagram seen; empty = disabled.
    #[serde(default)]
    pub traffic_log_path: String,
}

fn default_hostname() -> String {
    "zeroconf".to_string()
}
fn default_port() -> u16 {
    5353
}
fn default_record_ttl() -> u32 {
    4500
}
fn default_host_ttl() -> u32 {
    120
}
fn default_max_packet() -> usize {
    zc_proto::MAX_PACKET_SIZE
}
fn default_resolve_timeout() -> u64 {
    3000
}
fn default_register_timeout() -> u64 {
    6000
}
fn default_true() -> bool {
    true
}

impl Default for MdnsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

impl MdnsConfig {
    /// Fully qualified host name, e.g. `office-pi.local`.
    pub fn host_name(&self) -> String {
        format!("{}.{}", self.hostname.trim_end_matches(".local"), zc_proto::LOCAL_DOMAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MdnsConfig::default();
        assert_eq!(config.port, 5353);
        assert_eq!(config.record_ttl_secs, 4500);
        assert_eq!(config.host_ttl_secs, 120);
        assert!(config.name_compression);
        assert!(!config.permissive_names);
        assert_eq!(config.host_name(), "zeroconf.local");
    }

    #[test]
    fn test_roundtrip() {
        let json = r#"{
            "hostname": "office-pi",
            "host_addresses": ["192.168.1.20"],
            "record_ttl_secs": 120
        }"#;
        let config: MdnsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host_name(), "office-pi.local");
        assert_eq!(config.record_ttl_secs, 120);

        let serialized = serde_json::to_string(&config).unwrap();
        let config2: MdnsConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(config2.hostname, "office-pi");
    }
}
