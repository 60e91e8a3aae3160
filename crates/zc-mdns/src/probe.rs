//! Probe pacing and the authoritative record sets probing defends.

use std::net::{Ipv4Addr, Ipv6Addr};

use zc_proto::DnsRecord;

use crate::service::ServiceInfo;

/// Rate limiter for probe bursts: at 10 or more probes inside a rolling
/// one-second window, the next probe is pushed out to five seconds. The
/// counter resets when the window rolls over.
#[derive(Debug, Default)]
pub(crate) struct ProbeThrottle {
    window_start_ms: u64,
    count: u32,
}

pub(crate) const PROBE_THROTTLE_WINDOW_MS: u64 = 1000;
pub(crate) const PROBE_THROTTLE_COUNT: u32 = 10;
pub(crate) const PROBE_THROTTLE_DELAY_MS: u64 = 5000;

impl ProbeThrottle {
    /// Account for one probe at `now_ms` and return the delay the next
    /// probe should use instead of `base_ms`.
    pub fn next_probe_delay(&mut self, now_ms: u64, base_ms: u64) -> u64 {
        if now_ms.saturating_sub(self.window_start_ms) >= PROBE_THROTTLE_WINDOW_MS {
            self.window_start_ms = now_ms;
            self.count = 0;
        }
        self.count += 1;
        if self.count >= PROBE_THROTTLE_COUNT {
            PROBE_THROTTLE_DELAY_MS
        } else {
            base_ms
        }
    }
}

/// Address records the host entity claims and defends.
pub(crate) fn host_records(
    host_name: &str,
    v4: &[Ipv4Addr],
    v6: &[Ipv6Addr],
    ttl: u32,
) -> Vec<DnsRecord> {
    let mut records = Vec::with_capacity(v4.len() + v6.len());
    for ip in v4 {
        records.push(DnsRecord::a(host_name, *ip, ttl));
    }
    for ip in v6 {
        records.push(DnsRecord::aaaa(host_name, *ip, ttl));
    }
    records
}

/// Records a registered service publishes: shared PTR from the type, plus
/// unique SRV and TXT under the qualified name. Host-bound records use the
/// shorter host TTL.
pub(crate) fn service_records(
    info: &ServiceInfo,
    host_ttl: u32,
    record_ttl: u32,
) -> Vec<DnsRecord> {
    let qualified = info.qualified_name();
    vec![
        DnsRecord::ptr(&info.service_type, &qualified, record_ttl),
        DnsRecord::srv(
            &qualified,
            info.priority,
            info.weight,
            info.port,
            &info.server,
            host_ttl,
        ),
        DnsRecord::txt(&qualified, info.txt.clone(), record_ttl),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use zc_proto::{RData, RecordType};

    #[test]
    fn test_throttle_kicks_in_at_ten_probes() {
        let mut throttle = ProbeThrottle::default();
        for _ in 0..9 {
            assert_eq!(throttle.next_probe_delay(100, 250), 250);
        }
        assert_eq!(throttle.next_probe_delay(100, 250), PROBE_THROTTLE_DELAY_MS);
        // Still inside the window: stays throttled
        assert_eq!(throttle.next_probe_delay(900, 250), PROBE_THROTTLE_DELAY_MS);
        // Window rolled over: counter resets
        assert_eq!(throttle.next_probe_delay(1200, 250), 250);
    }

    #[test]
    fn test_service_record_set() {
        let info = ServiceInfo::new("_ipp._tcp.local", "printer", 631)
            .with_server("host.local")
            .with_properties(&[("rp", Some(b"ipp/print".as_slice()))]);
        let records = service_records(&info, 120, 4500);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].rtype, RecordType::PTR);
        assert_eq!(records[0].name, "_ipp._tcp.local");
        assert!(!records[0].cache_flush);
        assert_eq!(records[0].ttl, 4500);

        assert_eq!(records[1].rtype, RecordType::SRV);
        assert_eq!(records[1].name, "printer._ipp._tcp.local");
        assert!(records[1].cache_flush);
        assert_eq!(records[1].ttl, 120);
        assert!(
            matches!(&records[1].rdata, RData::SRV { port: 631, target, .. } if target == "host.local")
        );

        assert_eq!(records[2].rtype, RecordType::TXT);
        assert!(records[2].cache_flush);
    }

    #[test]
    fn test_host_record_set() {
        let records = host_records(
            "host.local",
            &[Ipv4Addr::new(10, 0, 0, 2)],
            &[Ipv6Addr::LOCALHOST],
            120,
        );
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.cache_flush && r.name == "host.local"));
    }
}
