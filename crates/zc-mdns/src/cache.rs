//! TTL-driven cache of records observed on the link.
//!
//! A keyed multimap: lowercased owner name → bag of records. The engine
//! task is the only owner; there is no interior locking.

use rustc_hash::FxHashMap;

use zc_proto::DnsRecord;

#[derive(Default)]
pub struct RecordCache {
    entries: FxHashMap<String, Vec<DnsRecord>>,
    len: usize,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert without dedup — callers consult `get` first.
    pub fn put(&mut self, record: DnsRecord) {
        self.entries.entry(record.key()).or_default().push(record);
        self.len += 1;
    }

    /// The cached record equal to `record` (entry + rdata equality).
    pub fn get(&mut self, record: &DnsRecord) -> Option<&mut DnsRecord> {
        self.entries
            .get_mut(&record.key())?
            .iter_mut()
            .find(|r| r.same_entry(record) && r.same_rdata(record))
    }

    /// The first cached record sharing `record`'s (name, type, class),
    /// regardless of rdata.
    pub fn get_entry(&mut self, record: &DnsRecord) -> Option<&mut DnsRecord> {
        self.entries
            .get_mut(&record.key())?
            .iter_mut()
            .find(|r| r.same_entry(record))
    }

    /// All records stored under a name.
    pub fn by_name(&self, name: &str) -> &[DnsRecord] {
        self.entries
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Adopt an identical arrival's TTL and creation stamp. Returns false
    /// when no matching record is cached.
    pub fn refresh(&mut self, arriving: &DnsRecord) -> bool {
        match self.get(arriving) {
            Some(existing) => {
                existing.reset_ttl(arriving);
                true
            }
            None => false,
        }
    }

    /// Remove the exact entry. Returns it if it was present.
    pub fn remove(&mut self, record: &DnsRecord) -> Option<DnsRecord> {
        let key = record.key();
        let bag = self.entries.get_mut(&key)?;
        let idx = bag
            .iter()
            .position(|r| r.same_entry(record) && r.same_rdata(record))?;
        let removed = bag.swap_remove(idx);
        self.len -= 1;
        if bag.is_empty() {
            self.entries.remove(&key);
        }
        Some(removed)
    }

    /// Cache-flush: drop every record with the same (name, type, class) but
    /// different rdata — a unique owner has superseded them.
    pub fn flush_entry(&mut self, record: &DnsRecord) -> Vec<DnsRecord> {
        let key = record.key();
        let mut flushed = Vec::new();
        if let Some(bag) = self.entries.get_mut(&key) {
            let mut i = 0;
            while i < bag.len() {
                if bag[i].same_entry(record) && !bag[i].same_rdata(record) {
                    flushed.push(bag.swap_remove(i));
                    self.len -= 1;
                } else {
                    i += 1;
                }
            }
            if bag.is_empty() {
                self.entries.remove(&key);
            }
        }
        flushed
    }

    /// Drop every expired record, returning them for event fan-out.
    pub fn reap(&mut self, now_ms: u64) -> Vec<DnsRecord> {
        let mut reaped = Vec::new();
        self.entries.retain(|_, bag| {
            let mut i = 0;
            while i < bag.len() {
                if bag[i].is_expired(now_ms) {
                    reaped.push(bag.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            !bag.is_empty()
        });
        self.len -= reaped.len();
        reaped
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &DnsRecord> {
        self.entries.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zc_proto::RData;

    fn ptr(name: &str, target: &str, ttl: u32, created: u64) -> DnsRecord {
        let mut r = DnsRecord::ptr(name, target, ttl);
        r.created = created;
        r
    }

    #[test]
    fn test_put_get_by_name() {
        let mut cache = RecordCache::new();
        cache.put(ptr("_http._tcp.local", "a._http._tcp.local", 120, 0));
        cache.put(ptr("_http._tcp.local", "b._http._tcp.local", 120, 0));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.by_name("_HTTP._tcp.LOCAL").len(), 2);
        assert!(cache.by_name("_ipp._tcp.local").is_empty());

        let probe = ptr("_http._tcp.local", "a._http._tcp.local", 60, 0);
        assert!(cache.get(&probe).is_some());
        let other = ptr("_http._tcp.local", "c._http._tcp.local", 60, 0);
        assert!(cache.get(&other).is_none());
    }

    #[test]
    fn test_get_entry_ignores_rdata() {
        let mut cache = RecordCache::new();
        let mut cached = DnsRecord::srv("p._ipp._tcp.local", 0, 0, 631, "old.local", 120);
        cached.created = 0;
        cache.put(cached);

        // Same (name, type, class), different rdata
        let arriving = DnsRecord::srv("p._ipp._tcp.local", 0, 0, 631, "new.local", 120);
        assert!(cache.get(&arriving).is_none());
        assert!(cache.get_entry(&arriving).is_some());

        let unrelated = DnsRecord::txt("p._ipp._tcp.local", vec![0], 120);
        assert!(cache.get_entry(&unrelated).is_none());
    }

    #[test]
    fn test_refresh_updates_ttl_and_created() {
        let mut cache = RecordCache::new();
        cache.put(ptr("_http._tcp.local", "a._http._tcp.local", 60, 0));

        let arriving = ptr("_http._tcp.local", "a._http._tcp.local", 120, 30_000);
        assert!(cache.refresh(&arriving));

        let kept = &cache.by_name("_http._tcp.local")[0];
        assert_eq!(kept.ttl, 120);
        assert_eq!(kept.created, 30_000);
    }

    #[test]
    fn test_remove_exact_entry() {
        let mut cache = RecordCache::new();
        let a = ptr("_http._tcp.local", "a._http._tcp.local", 120, 0);
        let b = ptr("_http._tcp.local", "b._http._tcp.local", 120, 0);
        cache.put(a.clone());
        cache.put(b.clone());

        assert!(cache.remove(&a).is_some());
        assert!(cache.remove(&a).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.by_name("_http._tcp.local")[0].rdata, b.rdata);
    }

    #[test]
    fn test_reap_at_exact_expiry() {
        let mut cache = RecordCache::new();
        cache.put(ptr("_http._tcp.local", "a._http._tcp.local", 60, 0));
        cache.put(ptr("_http._tcp.local", "b._http._tcp.local", 120, 0));

        assert!(cache.reap(59_999).is_empty());
        let reaped = cache.reap(60_000);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].rdata, RData::PTR("a._http._tcp.local".into()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_flush_entry_drops_stale_rdata() {
        let mut cache = RecordCache::new();
        let mut old = DnsRecord::srv("p._ipp._tcp.local", 0, 0, 631, "old.local", 120);
        old.created = 0;
        cache.put(old);

        let new = DnsRecord::srv("p._ipp._tcp.local", 0, 0, 631, "new.local", 120);
        let flushed = cache.flush_entry(&new);
        assert_eq!(flushed.len(), 1);
        assert!(cache.is_empty());
    }
}
