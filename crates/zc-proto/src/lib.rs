//! mDNS wire protocol: names, records, messages (RFC 1035 / RFC 6762).
//!
//! This crate is pure data — no sockets, no clocks, no async. Callers pass
//! in `now` as milliseconds where TTL math needs it.

pub mod error;
pub mod message;
pub mod name;
pub mod records;

pub use error::ProtoError;
pub use message::{DnsHeader, DnsMessage, MessageBuilder};
pub use records::{DnsQuestion, DnsRecord, RData, RecordClass, RecordType};

use std::net::Ipv4Addr;

/// Multicast group and port mDNS operates on (RFC 6762 §3).
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// Preferred outgoing frame size — fits a 1500-byte MTU with headers.
pub const MAX_PACKET_SIZE: usize = 1460;
/// Hard cap on outgoing frame size (jumbo frames).
pub const MAX_PACKET_SIZE_ABSOLUTE: usize = 9000;

/// Meta-query name for service type enumeration (RFC 6763 §9).
pub const SERVICE_TYPE_ENUMERATION: &str = "_services._dns-sd._udp.local";
/// Link-local domain suffix.
pub const LOCAL_DOMAIN: &str = "local";
/// IPv4 reverse-mapping domain. Registrations under it are refused.
pub const REVERSE_V4_DOMAIN: &str = "in-addr.arpa";
