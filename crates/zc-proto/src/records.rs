use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Record types the responder works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    PTR,
    HINFO,
    TXT,
    AAAA,
    SRV,
    ANY,
    Unknown(u16),
}

impl RecordType {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::A,
            12 => Self::PTR,
            13 => Self::HINFO,
            16 => Self::TXT,
            28 => Self::AAAA,
            33 => Self::SRV,
            255 => Self::ANY,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::PTR => 12,
            Self::HINFO => 13,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::SRV => 33,
            Self::ANY => 255,
            Self::Unknown(v) => v,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::PTR => write!(f, "PTR"),
            Self::HINFO => write!(f, "HINFO"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self::SRV => write!(f, "SRV"),
            Self::ANY => write!(f, "ANY"),
            Self::Unknown(v) => write!(f, "TYPE{}", v),
        }
    }
}

/// Top bit of the wire class field: cache-flush on records, unicast-response
/// on questions. Orthogonal to the class value itself.
pub const CLASS_UNIQUE: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    IN,
    Any,
    Unknown(u16),
}

impl RecordClass {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::IN,
            255 => Self::Any,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::IN => 1,
            Self::Any => 255,
            Self::Unknown(v) => v,
        }
    }

    /// Split a wire class field into (class, unique/cache-flush bit).
    pub fn from_wire(raw: u16) -> (Self, bool) {
        (Self::from_u16(raw & !CLASS_UNIQUE), raw & CLASS_UNIQUE != 0)
    }

    pub fn to_wire(self, unique: bool) -> u16 {
        self.to_u16() | if unique { CLASS_UNIQUE } else { 0 }
    }
}

/// A question. Never expires.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
    pub unicast_response: bool,
}

impl DnsQuestion {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Self {
            name: name.to_string(),
            qtype,
            qclass: RecordClass::IN,
            unicast_response: false,
        }
    }

    /// Whether `record` answers this question: case-insensitive name match,
    /// equal class, and equal type (or ANY on either side).
    pub fn answered_by(&self, record: &DnsRecord) -> bool {
        self.name.eq_ignore_ascii_case(&record.name)
            && self.qclass == record.class
            && (self.qtype == RecordType::ANY
                || record.rtype == RecordType::ANY
                || self.qtype == record.rtype)
    }
}

/// Resource record data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    PTR(String),
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    TXT(Vec<u8>),
    HINFO {
        cpu: String,
        os: String,
    },
}

impl RData {
    pub fn rtype(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::AAAA(_) => RecordType::AAAA,
            Self::PTR(_) => RecordType::PTR,
            Self::SRV { .. } => RecordType::SRV,
            Self::TXT(_) => RecordType::TXT,
            Self::HINFO { .. } => RecordType::HINFO,
        }
    }

    /// Rdata equality with case-insensitive embedded names.
    pub fn same(&self, other: &RData) -> bool {
        match (self, other) {
            (Self::PTR(a), Self::PTR(b)) => a.eq_ignore_ascii_case(b),
            (
                Self::SRV { priority, weight, port, target },
                Self::SRV {
                    priority: p2,
                    weight: w2,
                    port: po2,
                    target: t2,
                },
            ) => priority == p2 && weight == w2 && port == po2 && target.eq_ignore_ascii_case(t2),
            _ => self == other,
        }
    }
}

/// A complete resource record. `created` is milliseconds on the responder's
/// monotonic clock, stamped at receipt (or at announce time for owned
/// records); TTL is counted from it.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub class: RecordClass,
    /// Cache-flush / owner-claimed bit (top bit of the wire class field).
    pub cache_flush: bool,
    pub ttl: u32,
    pub created: u64,
    pub rdata: RData,
}

impl DnsRecord {
    pub fn new(name: &str, cache_flush: bool, ttl: u32, rdata: RData) -> Self {
        Self {
            name: name.to_string(),
            rtype: rdata.rtype(),
            class: RecordClass::IN,
            cache_flush,
            ttl,
            created: 0,
            rdata,
        }
    }

    pub fn a(name: &str, ip: Ipv4Addr, ttl: u32) -> Self {
        Self::new(name, true, ttl, RData::A(ip))
    }

    pub fn aaaa(name: &str, ip: Ipv6Addr, ttl: u32) -> Self {
        Self::new(name, true, ttl, RData::AAAA(ip))
    }

    pub fn ptr(name: &str, target: &str, ttl: u32) -> Self {
        Self::new(name, false, ttl, RData::PTR(target.to_string()))
    }

    pub fn srv(name: &str, priority: u16, weight: u16, port: u16, target: &str, ttl: u32) -> Self {
        Self::new(
            name,
            true,
            ttl,
            RData::SRV {
                priority,
                weight,
                port,
                target: target.to_string(),
            },
        )
    }

    pub fn txt(name: &str, text: Vec<u8>, ttl: u32) -> Self {
        Self::new(name, true, ttl, RData::TXT(text))
    }

    /// Cache key: the lowercased owner name.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Entry equality: (lowercased name, type, class).
    pub fn same_entry(&self, other: &DnsRecord) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.rtype == other.rtype
            && self.class == other.class
    }

    pub fn same_rdata(&self, other: &DnsRecord) -> bool {
        self.rdata.same(&other.rdata)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.created + self.ttl as u64 * 1000
    }

    /// Seconds of TTL left at `now_ms`.
    pub fn remaining_ttl(&self, now_ms: u64) -> u32 {
        let expires = self.created + self.ttl as u64 * 1000;
        (expires.saturating_sub(now_ms) / 1000) as u32
    }

    /// Timestamp at which `percent` of the TTL has elapsed.
    pub fn ttl_point(&self, percent: u32) -> u64 {
        self.created + self.ttl as u64 * 10 * percent as u64
    }

    /// Adopt the TTL and creation stamp of an identical arrival.
    pub fn reset_ttl(&mut self, arriving: &DnsRecord) {
        self.ttl = arriving.ttl;
        self.created = arriving.created;
    }

    /// Known-answer suppression: some answer the querier already holds is
    /// the same record with at least half our TTL left to run.
    pub fn suppressed_by(&self, known_answers: &[DnsRecord]) -> bool {
        known_answers
            .iter()
            .any(|a| a.same_entry(self) && a.same_rdata(self) && a.ttl >= self.ttl / 2)
    }

    /// Total order over rdata for deterministic output; embedded names
    /// compare lowercased.
    pub fn rdata_cmp(&self, other: &DnsRecord) -> Ordering {
        fn sort_key(r: &RData) -> Vec<u8> {
            match r {
                RData::A(ip) => ip.octets().to_vec(),
                RData::AAAA(ip) => ip.octets().to_vec(),
                RData::PTR(t) => t.to_lowercase().into_bytes(),
                RData::SRV { priority, weight, port, target } => {
                    let mut v = Vec::new();
                    v.extend_from_slice(&priority.to_be_bytes());
                    v.extend_from_slice(&weight.to_be_bytes());
                    v.extend_from_slice(&port.to_be_bytes());
                    v.extend_from_slice(target.to_lowercase().as_bytes());
                    v
                }
                RData::TXT(t) => t.clone(),
                RData::HINFO { cpu, os } => {
                    let mut v = cpu.clone().into_bytes();
                    v.extend_from_slice(os.as_bytes());
                    v
                }
            }
        }
        sort_key(&self.rdata).cmp(&sort_key(&other.rdata))
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ttl={}", self.name, self.rtype, self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_wire_roundtrip() {
        for t in [
            RecordType::A,
            RecordType::PTR,
            RecordType::HINFO,
            RecordType::TXT,
            RecordType::AAAA,
            RecordType::SRV,
            RecordType::ANY,
            RecordType::Unknown(47),
        ] {
            assert_eq!(RecordType::from_u16(t.to_u16()), t);
        }
    }

    #[test]
    fn test_class_unique_bit() {
        let (class, unique) = RecordClass::from_wire(0x8001);
        assert_eq!(class, RecordClass::IN);
        assert!(unique);
        assert_eq!(class.to_wire(true), 0x8001);
        assert_eq!(class.to_wire(false), 0x0001);
    }

    #[test]
    fn test_entry_equality_is_case_insensitive() {
        let a = DnsRecord::ptr("_http._tcp.local", "one._http._tcp.local", 120);
        let b = DnsRecord::ptr("_HTTP._TCP.local", "two._http._tcp.local", 60);
        assert!(a.same_entry(&b));
        assert!(!a.same_rdata(&b));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut r = DnsRecord::ptr("_http._tcp.local", "x._http._tcp.local", 60);
        r.created = 1000;
        assert!(!r.is_expired(1000));
        assert!(!r.is_expired(60_999));
        assert!(r.is_expired(61_000));
        assert_eq!(r.remaining_ttl(31_000), 30);
        assert_eq!(r.ttl_point(80), 1000 + 48_000);
    }

    #[test]
    fn test_reset_ttl() {
        let mut existing = DnsRecord::ptr("_http._tcp.local", "x._http._tcp.local", 60);
        existing.created = 0;
        let mut arriving = existing.clone();
        arriving.created = 30_000;
        arriving.ttl = 120;
        existing.reset_ttl(&arriving);
        assert_eq!(existing.created, 30_000);
        assert_eq!(existing.ttl, 120);
    }

    #[test]
    fn test_suppression_requires_half_ttl() {
        let ours = DnsRecord::ptr("_http._tcp.local", "x._http._tcp.local", 120);
        let mut theirs = ours.clone();

        theirs.ttl = 60;
        assert!(ours.suppressed_by(std::slice::from_ref(&theirs)));

        theirs.ttl = 59;
        assert!(!ours.suppressed_by(std::slice::from_ref(&theirs)));

        // Different rdata never suppresses
        let other = DnsRecord::ptr("_http._tcp.local", "y._http._tcp.local", 120);
        assert!(!ours.suppressed_by(&[other]));
    }

    #[test]
    fn test_answered_by() {
        let record = DnsRecord::srv("X._ipp._tcp.local", 0, 0, 631, "host.local", 120);
        assert!(DnsQuestion::new("x._ipp._tcp.local", RecordType::SRV).answered_by(&record));
        assert!(DnsQuestion::new("x._ipp._tcp.local", RecordType::ANY).answered_by(&record));
        assert!(!DnsQuestion::new("x._ipp._tcp.local", RecordType::TXT).answered_by(&record));
        assert!(!DnsQuestion::new("y._ipp._tcp.local", RecordType::SRV).answered_by(&record));
    }
}
