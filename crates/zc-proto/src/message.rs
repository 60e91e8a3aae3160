//! DNS message wire format (RFC 1035) as used by mDNS (RFC 6762).
//!
//! Incoming datagrams are parsed into [`DnsMessage`]; outgoing frames are
//! assembled with [`MessageBuilder`], which enforces section ordering and
//! reports `BufferFull` so the caller can split across frames.

use rustc_hash::FxHashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::ProtoError;
use crate::name::{self, PointerPolicy};
use crate::records::{DnsQuestion, DnsRecord, RData, RecordClass, RecordType};
use crate::{MAX_PACKET_SIZE, MAX_PACKET_SIZE_ABSOLUTE};

pub const FLAG_QR: u16 = 0x8000;
pub const FLAG_AA: u16 = 0x0400;
pub const FLAG_TC: u16 = 0x0200;

/// Parsed DNS header (12 bytes). The section counts are what the packet
/// claimed, adjusted down for records the parser skipped; consumers should
/// iterate the section vectors rather than trust the counts.
#[derive(Debug, Clone, Default)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }
    pub fn is_authoritative(&self) -> bool {
        self.flags & FLAG_AA != 0
    }
    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }
}

fn parse_header(buf: &[u8]) -> Result<DnsHeader, ProtoError> {
    if buf.len() < 12 {
        return Err(ProtoError::TooShort(buf.len()));
    }
    Ok(DnsHeader {
        id: u16::from_be_bytes([buf[0], buf[1]]),
        flags: u16::from_be_bytes([buf[2], buf[3]]),
        qd_count: u16::from_be_bytes([buf[4], buf[5]]),
        an_count: u16::from_be_bytes([buf[6], buf[7]]),
        ns_count: u16::from_be_bytes([buf[8], buf[9]]),
        ar_count: u16::from_be_bytes([buf[10], buf[11]]),
    })
}

/// A fully parsed datagram.
#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

impl DnsMessage {
    /// Parse a datagram. `now_ms` stamps each record's `created` time.
    pub fn parse(buf: &[u8], now_ms: u64) -> Result<Self, ProtoError> {
        Self::parse_with(buf, now_ms, PointerPolicy::Strict)
    }

    pub fn parse_with(buf: &[u8], now_ms: u64, policy: PointerPolicy) -> Result<Self, ProtoError> {
        let mut header = parse_header(buf)?;
        let mut offset = 12;

        let mut questions = Vec::with_capacity(header.qd_count as usize);
        for _ in 0..header.qd_count {
            let (name, after) = name::read_name_with(buf, offset, policy)?;
            offset = after;
            if offset + 4 > buf.len() {
                return Err(ProtoError::Truncated(offset));
            }
            let qtype = RecordType::from_u16(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
            let (qclass, unicast) =
                RecordClass::from_wire(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
            offset += 4;
            questions.push(DnsQuestion {
                name,
                qtype,
                qclass,
                unicast_response: unicast,
            });
        }

        let mut answers = Vec::new();
        let mut authorities = Vec::new();
        let mut additionals = Vec::new();

        let sections = [
            (header.an_count as usize, 0u8),
            (header.ns_count as usize, 1),
            (header.ar_count as usize, 2),
        ];

        for (count, section) in sections {
            for _ in 0..count {
                let (name, after) = name::read_name_with(buf, offset, policy)?;
                offset = after;
                if offset + 10 > buf.len() {
                    return Err(ProtoError::Truncated(offset));
                }
                let rtype = RecordType::from_u16(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
                let (class, cache_flush) =
                    RecordClass::from_wire(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
                let ttl = u32::from_be_bytes([
                    buf[offset + 4],
                    buf[offset + 5],
                    buf[offset + 6],
                    buf[offset + 7],
                ]);
                let rdlength = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]) as usize;
                let rdata_start = offset + 10;
                if rdata_start + rdlength > buf.len() {
                    return Err(ProtoError::Truncated(rdata_start));
                }
                // The cursor always lands exactly past the rdata, whether or
                // not the rdata parses — one bad record cannot desynchronize
                // the rest of the stream.
                offset = rdata_start + rdlength;

                let Some(rdata) = parse_rdata(buf, rdata_start, rdlength, rtype, policy) else {
                    // Unknown type or unparseable rdata: drop the record and
                    // keep the user-visible counts in step.
                    match section {
                        0 => header.an_count = header.an_count.saturating_sub(1),
                        1 => header.ns_count = header.ns_count.saturating_sub(1),
                        _ => header.ar_count = header.ar_count.saturating_sub(1),
                    }
                    continue;
                };

                let record = DnsRecord {
                    name,
                    rtype,
                    class,
                    cache_flush,
                    ttl,
                    created: now_ms,
                    rdata,
                };
                match section {
                    0 => answers.push(record),
                    1 => authorities.push(record),
                    _ => additionals.push(record),
                }
            }
        }

        Ok(Self {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    pub fn is_query(&self) -> bool {
        !self.header.is_response()
    }

    pub fn is_truncated(&self) -> bool {
        self.header.is_truncated()
    }

    /// Every record in the message, across all three record sections.
    pub fn all_records(&self) -> impl Iterator<Item = &DnsRecord> {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
    }

    /// Merge a continuation datagram into a retained truncated query.
    /// Calling this on anything else is a programmer error.
    pub fn append_continuation(&mut self, cont: DnsMessage) {
        assert!(
            self.is_query() && self.header.is_truncated(),
            "continuation appended to a non-truncated or non-query message"
        );
        self.header.qd_count = self.header.qd_count.saturating_add(cont.header.qd_count);
        self.header.an_count = self.header.an_count.saturating_add(cont.header.an_count);
        self.header.ns_count = self.header.ns_count.saturating_add(cont.header.ns_count);
        self.header.ar_count = self.header.ar_count.saturating_add(cont.header.ar_count);
        self.questions.extend(cont.questions);
        self.answers.extend(cont.answers);
        self.authorities.extend(cont.authorities);
        self.additionals.extend(cont.additionals);
    }
}

/// Returns None when the record should be skipped (unknown type, or rdata
/// that does not parse). The caller has already advanced the cursor.
fn parse_rdata(
    buf: &[u8],
    start: usize,
    rdlength: usize,
    rtype: RecordType,
    policy: PointerPolicy,
) -> Option<RData> {
    let end = start + rdlength;
    match rtype {
        RecordType::A => {
            if rdlength != 4 {
                return None;
            }
            Some(RData::A(Ipv4Addr::new(
                buf[start],
                buf[start + 1],
                buf[start + 2],
                buf[start + 3],
            )))
        }
        RecordType::AAAA => {
            if rdlength != 16 {
                return None;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[start..end]);
            Some(RData::AAAA(Ipv6Addr::from(octets)))
        }
        RecordType::PTR => {
            let (target, _) = name::read_name_with(buf, start, policy).ok()?;
            Some(RData::PTR(target))
        }
        RecordType::SRV => {
            if rdlength < 7 {
                return None;
            }
            let priority = u16::from_be_bytes([buf[start], buf[start + 1]]);
            let weight = u16::from_be_bytes([buf[start + 2], buf[start + 3]]);
            let port = u16::from_be_bytes([buf[start + 4], buf[start + 5]]);
            let (target, _) = name::read_name_with(buf, start + 6, policy).ok()?;
            Some(RData::SRV {
                priority,
                weight,
                port,
                target,
            })
        }
        RecordType::TXT => Some(RData::TXT(buf[start..end].to_vec())),
        RecordType::HINFO => {
            let (cpu, after) = read_char_string(buf, start, end)?;
            let (os, _) = read_char_string(buf, after, end)?;
            Some(RData::HINFO { cpu, os })
        }
        RecordType::ANY | RecordType::Unknown(_) => None,
    }
}

fn read_char_string(buf: &[u8], pos: usize, end: usize) -> Option<(String, usize)> {
    if pos >= end {
        return None;
    }
    let len = buf[pos] as usize;
    if pos + 1 + len > end {
        return None;
    }
    let s = String::from_utf8_lossy(&buf[pos + 1..pos + 1 + len]).into_owned();
    Some((s, pos + 1 + len))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Questions,
    Answers,
    Authorities,
    Additionals,
}

/// Assembles one outgoing frame. Sections must be written in protocol
/// order; going backwards panics. When a record would push the frame past
/// its size limit the write is rolled back and `BufferFull` returned — the
/// caller sets TC, flushes, and continues in a fresh builder.
pub struct MessageBuilder {
    id: u16,
    flags: u16,
    buf: Vec<u8>,
    names: FxHashMap<String, u16>,
    compress: bool,
    max_size: usize,
    section: Section,
    qd: u16,
    an: u16,
    ns: u16,
    ar: u16,
}

impl MessageBuilder {
    pub fn new(id: u16, flags: u16) -> Self {
        let mut buf = Vec::with_capacity(MAX_PACKET_SIZE);
        buf.resize(12, 0);
        Self {
            id,
            flags,
            buf,
            names: FxHashMap::default(),
            compress: true,
            max_size: MAX_PACKET_SIZE,
            section: Section::Questions,
            qd: 0,
            an: 0,
            ns: 0,
            ar: 0,
        }
    }

    /// A multicast query frame (id 0 per RFC 6762 §18.1).
    pub fn query() -> Self {
        Self::new(0, 0)
    }

    /// An authoritative multicast response frame.
    pub fn response() -> Self {
        Self::new(0, FLAG_QR | FLAG_AA)
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.min(MAX_PACKET_SIZE_ABSOLUTE);
        self
    }

    pub fn without_compression(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn set_truncated(&mut self) {
        self.flags |= FLAG_TC;
    }

    pub fn is_empty(&self) -> bool {
        self.qd == 0 && self.an == 0 && self.ns == 0 && self.ar == 0
    }

    pub fn answer_count(&self) -> u16 {
        self.an
    }

    pub fn add_question(&mut self, q: &DnsQuestion) -> Result<(), ProtoError> {
        self.enter(Section::Questions);
        let mark = self.buf.len();
        self.write_name(&q.name);
        self.put_u16(q.qtype.to_u16());
        self.put_u16(q.qclass.to_wire(q.unicast_response));
        self.commit(mark)?;
        self.qd += 1;
        Ok(())
    }

    /// Add an answer. With `now_ms` the record is written with its remaining
    /// TTL; an already-expired record is silently not emitted.
    pub fn add_answer(&mut self, r: &DnsRecord, now_ms: Option<u64>) -> Result<(), ProtoError> {
        let ttl = match now_ms {
            Some(now) => {
                if r.is_expired(now) {
                    return Ok(());
                }
                r.remaining_ttl(now)
            }
            None => r.ttl,
        };
        self.enter(Section::Answers);
        self.write_record(r, ttl)?;
        self.an += 1;
        Ok(())
    }

    pub fn add_authority(&mut self, r: &DnsRecord) -> Result<(), ProtoError> {
        self.enter(Section::Authorities);
        self.write_record(r, r.ttl)?;
        self.ns += 1;
        Ok(())
    }

    pub fn add_additional(&mut self, r: &DnsRecord) -> Result<(), ProtoError> {
        self.enter(Section::Additionals);
        self.write_record(r, r.ttl)?;
        self.ar += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf[0..2].copy_from_slice(&self.id.to_be_bytes());
        self.buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        self.buf[4..6].copy_from_slice(&self.qd.to_be_bytes());
        self.buf[6..8].copy_from_slice(&self.an.to_be_bytes());
        self.buf[8..10].copy_from_slice(&self.ns.to_be_bytes());
        self.buf[10..12].copy_from_slice(&self.ar.to_be_bytes());
        self.buf
    }

    fn enter(&mut self, section: Section) {
        assert!(
            section >= self.section,
            "section {:?} written after {:?}",
            section,
            self.section
        );
        self.section = section;
    }

    fn write_record(&mut self, r: &DnsRecord, ttl: u32) -> Result<(), ProtoError> {
        let mark = self.buf.len();
        self.write_name(&r.name);
        self.put_u16(r.rtype.to_u16());
        self.put_u16(r.class.to_wire(r.cache_flush));
        self.put_u32(ttl);
        // rdlength is stamped once the rdata is in place
        let rdlen_at = self.buf.len();
        self.put_u16(0);
        self.write_rdata(&r.rdata);
        let rdlen = (self.buf.len() - rdlen_at - 2) as u16;
        self.buf[rdlen_at..rdlen_at + 2].copy_from_slice(&rdlen.to_be_bytes());
        self.commit(mark)
    }

    fn write_rdata(&mut self, rdata: &RData) {
        match rdata {
            RData::A(ip) => self.buf.extend_from_slice(&ip.octets()),
            RData::AAAA(ip) => self.buf.extend_from_slice(&ip.octets()),
            RData::PTR(target) => self.write_name(target),
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                self.put_u16(*priority);
                self.put_u16(*weight);
                self.put_u16(*port);
                // Target always label-encoded (the canonical SRV form)
                self.write_name(target);
            }
            RData::TXT(bytes) => {
                if bytes.is_empty() {
                    // RFC 6763 §6.1: an empty TXT is one zero-length string
                    self.buf.push(0);
                } else {
                    self.buf.extend_from_slice(bytes);
                }
            }
            RData::HINFO { cpu, os } => {
                for s in [cpu, os] {
                    let len = s.len().min(255);
                    self.buf.push(len as u8);
                    self.buf.extend_from_slice(&s.as_bytes()[..len]);
                }
            }
        }
    }

    /// Roll back to `mark` if the frame outgrew its limit.
    fn commit(&mut self, mark: usize) -> Result<(), ProtoError> {
        if self.buf.len() > self.max_size {
            self.buf.truncate(mark);
            self.names.retain(|_, &mut off| (off as usize) < mark);
            return Err(ProtoError::BufferFull);
        }
        Ok(())
    }

    fn write_name(&mut self, n: &str) {
        if self.compress {
            name::write_name(&mut self.buf, n, Some(&mut self.names));
        } else {
            name::write_name(&mut self.buf, n, None);
        }
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: DnsRecord) -> DnsRecord {
        let mut b = MessageBuilder::response();
        b.add_answer(&record, None).unwrap();
        let frame = b.finish();
        let msg = DnsMessage::parse(&frame, 0).unwrap();
        assert_eq!(msg.answers.len(), 1);
        msg.answers[0].clone()
    }

    #[test]
    fn test_roundtrip_each_rdata_kind() {
        let records = vec![
            DnsRecord::a("host.local", Ipv4Addr::new(192, 168, 1, 20), 120),
            DnsRecord::aaaa("host.local", Ipv6Addr::LOCALHOST, 120),
            DnsRecord::ptr("_http._tcp.local", "web._http._tcp.local", 4500),
            DnsRecord::srv("web._http._tcp.local", 0, 0, 8080, "host.local", 120),
            DnsRecord::txt("web._http._tcp.local", b"\x09path=/idx".to_vec(), 4500),
            DnsRecord::new(
                "host.local",
                false,
                120,
                RData::HINFO {
                    cpu: "X86_64".into(),
                    os: "LINUX".into(),
                },
            ),
        ];
        for record in records {
            let back = roundtrip(record.clone());
            assert!(back.same_entry(&record), "{}", record);
            assert!(back.same_rdata(&record), "{}", record);
            assert_eq!(back.ttl, record.ttl);
            assert_eq!(back.cache_flush, record.cache_flush);
        }
    }

    #[test]
    fn test_ptr_layout_and_compression_offsets() {
        let mut b = MessageBuilder::response();
        b.add_answer(
            &DnsRecord::ptr("_http._tcp.local", "MyServer._http._tcp.local", 120),
            None,
        )
        .unwrap();

        // Owner name starts right after the 12-byte header
        assert_eq!(b.buf[12], 5);
        assert_eq!(&b.buf[13..18], b"_http");
        assert_eq!(b.names.get("_http._tcp.local"), Some(&12u16));

        let frame = b.finish();
        let msg = DnsMessage::parse(&frame, 0).unwrap();
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(
            msg.answers[0].rdata,
            RData::PTR("MyServer._http._tcp.local".into())
        );
        // The rdata target reuses the owner name suffix via a pointer
        let mut plain = MessageBuilder::response().without_compression();
        plain
            .add_answer(
                &DnsRecord::ptr("_http._tcp.local", "MyServer._http._tcp.local", 120),
                None,
            )
            .unwrap();
        assert!(frame.len() < plain.finish().len());
    }

    #[test]
    fn test_full_message_roundtrip() {
        let mut b = MessageBuilder::query();
        b.add_question(&DnsQuestion::new("_ipp._tcp.local", RecordType::PTR))
            .unwrap();
        b.add_answer(
            &DnsRecord::ptr("_ipp._tcp.local", "printer._ipp._tcp.local", 4500),
            None,
        )
        .unwrap();
        b.add_authority(&DnsRecord::srv(
            "printer._ipp._tcp.local",
            0,
            0,
            631,
            "host.local",
            120,
        ))
        .unwrap();
        b.add_additional(&DnsRecord::a("host.local", Ipv4Addr::new(10, 0, 0, 7), 120))
            .unwrap();
        let frame = b.finish();

        let msg = DnsMessage::parse(&frame, 5000).unwrap();
        assert!(msg.is_query());
        assert_eq!(msg.header.qd_count, 1);
        assert_eq!(msg.questions[0].name, "_ipp._tcp.local");
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.authorities.len(), 1);
        assert_eq!(msg.additionals.len(), 1);
        // Records are stamped with the parse-time clock
        assert_eq!(msg.answers[0].created, 5000);
    }

    #[test]
    fn test_unknown_record_type_skipped_with_count_fixup() {
        let mut b = MessageBuilder::response();
        b.add_answer(
            &DnsRecord::ptr("_http._tcp.local", "a._http._tcp.local", 120),
            None,
        )
        .unwrap();
        let mut frame = b.finish();

        // Append a TYPE47 (NSEC) record by hand and bump an_count to 2
        name::write_name(&mut frame, "a._http._tcp.local", None);
        frame.extend_from_slice(&47u16.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(&120u32.to_be_bytes());
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(&[0xAB, 0xCD]);
        frame[7] = 2;

        let msg = DnsMessage::parse(&frame, 0).unwrap();
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.header.an_count, 1);
    }

    #[test]
    fn test_bad_rdata_does_not_desync_stream() {
        let mut b = MessageBuilder::response();
        b.add_answer(
            &DnsRecord::ptr("_http._tcp.local", "a._http._tcp.local", 120),
            None,
        )
        .unwrap();
        let mut frame = b.finish();

        // Hand-craft a PTR whose rdata is a malformed name, then a good A
        name::write_name(&mut frame, "bad._http._tcp.local", None);
        frame.extend_from_slice(&RecordType::PTR.to_u16().to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(&120u32.to_be_bytes());
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(&[0x40, 0x00]); // invalid label type

        name::write_name(&mut frame, "host.local", None);
        frame.extend_from_slice(&RecordType::A.to_u16().to_be_bytes());
        frame.extend_from_slice(&0x8001u16.to_be_bytes());
        frame.extend_from_slice(&120u32.to_be_bytes());
        frame.extend_from_slice(&4u16.to_be_bytes());
        frame.extend_from_slice(&[10, 0, 0, 9]);
        frame[7] = 3;

        let msg = DnsMessage::parse(&frame, 0).unwrap();
        assert_eq!(msg.answers.len(), 2);
        assert_eq!(msg.header.an_count, 2);
        assert_eq!(msg.answers[1].name, "host.local");
        assert!(msg.answers[1].cache_flush);
    }

    #[test]
    fn test_buffer_full_rolls_back_and_tc_splits() {
        let mut b = MessageBuilder::response().with_max_size(80);
        let mut wrote = 0;
        let mut overflowed = false;
        for i in 0..8 {
            let r = DnsRecord::ptr(
                &format!("_svc{}._tcp.example-domain.local", i),
                &format!("instance-number-{}._svc{}._tcp.example-domain.local", i, i),
                4500,
            );
            match b.add_answer(&r, None) {
                Ok(()) => wrote += 1,
                Err(ProtoError::BufferFull) => {
                    overflowed = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(overflowed);
        assert!(wrote >= 1);

        b.set_truncated();
        let frame = b.finish();
        assert!(frame.len() <= 80);
        let msg = DnsMessage::parse(&frame, 0).unwrap();
        assert!(msg.is_truncated());
        assert_eq!(msg.answers.len(), wrote);
    }

    #[test]
    fn test_append_continuation_merges_sections() {
        let mut q1 = MessageBuilder::query();
        q1.set_truncated();
        q1.add_question(&DnsQuestion::new("_http._tcp.local", RecordType::PTR))
            .unwrap();
        for i in 0..10 {
            q1.add_answer(
                &DnsRecord::ptr("_http._tcp.local", &format!("i{}._http._tcp.local", i), 4500),
                None,
            )
            .unwrap();
        }
        let mut primary = DnsMessage::parse(&q1.finish(), 0).unwrap();

        let mut q2 = MessageBuilder::query();
        for i in 10..30 {
            q2.add_answer(
                &DnsRecord::ptr("_http._tcp.local", &format!("i{}._http._tcp.local", i), 4500),
                None,
            )
            .unwrap();
        }
        let cont = DnsMessage::parse(&q2.finish(), 0).unwrap();

        primary.append_continuation(cont);
        assert_eq!(primary.questions.len(), 1);
        assert_eq!(primary.answers.len(), 30);
        assert_eq!(primary.header.an_count, 30);
    }

    #[test]
    #[should_panic(expected = "non-truncated")]
    fn test_append_continuation_rejects_untruncated_primary() {
        let mut q = MessageBuilder::query();
        q.add_question(&DnsQuestion::new("_http._tcp.local", RecordType::PTR))
            .unwrap();
        let mut primary = DnsMessage::parse(&q.finish(), 0).unwrap();
        primary.append_continuation(DnsMessage::default());
    }

    #[test]
    #[should_panic(expected = "section")]
    fn test_question_after_answer_panics() {
        let mut b = MessageBuilder::response();
        b.add_answer(
            &DnsRecord::ptr("_http._tcp.local", "a._http._tcp.local", 120),
            None,
        )
        .unwrap();
        let _ = b.add_question(&DnsQuestion::new("_http._tcp.local", RecordType::PTR));
    }

    #[test]
    fn test_too_short_header() {
        assert!(matches!(
            DnsMessage::parse(&[0u8; 5], 0),
            Err(ProtoError::TooShort(5))
        ));
    }

    #[test]
    fn test_remaining_ttl_written_with_now() {
        let mut r = DnsRecord::ptr("_http._tcp.local", "a._http._tcp.local", 120);
        r.created = 0;
        let mut b = MessageBuilder::response();
        b.add_answer(&r, Some(60_000)).unwrap();
        let msg = DnsMessage::parse(&b.finish(), 0).unwrap();
        assert_eq!(msg.answers[0].ttl, 60);

        // Expired records are not emitted at all
        let mut b = MessageBuilder::response();
        b.add_answer(&r, Some(120_000)).unwrap();
        assert!(b.is_empty());
    }

    #[test]
    fn test_goodbye_ttl_zero() {
        let mut goodbye = DnsRecord::srv("p._ipp._tcp.local", 0, 0, 631, "host.local", 120);
        goodbye.ttl = 0;
        let mut b = MessageBuilder::response();
        b.add_answer(&goodbye, None).unwrap();
        let msg = DnsMessage::parse(&b.finish(), 0).unwrap();
        assert_eq!(msg.answers[0].ttl, 0);
    }
}
