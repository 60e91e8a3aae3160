//! Frame ingestion: responses feed the cache, conflict detection and
//! subscriber notification; queries are coalesced and answered by a
//! delayed responder job.

use std::net::SocketAddr;

use rand::Rng;
use tracing::debug;

use zc_proto::name::PointerPolicy;
use zc_proto::{
    DnsMessage, DnsRecord, ProtoError, RData, RecordType, MDNS_PORT, SERVICE_TYPE_ENUMERATION,
};

use crate::engine::{instance_label, Engine, PendingQuery};
use crate::probe;
use crate::service::{Lifecycle, ServiceInfo};
use crate::tasks::Job;
use crate::ServiceEvent;

/// Extra wait before answering a truncated query, so its continuation
/// frames can land and coalesce.
const TC_DEFER_MS: u64 = 400;

impl Engine {
    pub(crate) fn handle_frame(&mut self, buf: &[u8], peer: SocketAddr) {
        let now = self.now_ms();
        let policy = if self.cfg.permissive_names {
            PointerPolicy::Permissive
        } else {
            PointerPolicy::Strict
        };
        let msg = match DnsMessage::parse_with(buf, now, policy) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("dropping malformed datagram from {}: {}", peer, e);
                return;
            }
        };
        if let Some(log) = &self.traffic_log {
            log.log(peer, &msg.header, buf.len());
        }
        if msg.header.is_response() {
            self.handle_response(msg, now);
        } else {
            self.handle_query(msg, peer);
        }
    }

    // ---- responses -------------------------------------------------------

    fn handle_response(&mut self, msg: DnsMessage, now: u64) {
        let records: Vec<DnsRecord> = msg.all_records().cloned().collect();
        let mut informative: Vec<(DnsRecord, bool)> = Vec::new();

        for record in records {
            // A TTL-zero arrival is already expired: a goodbye
            let goodbye = record.is_expired(now);
            if self.cache.get(&record).is_some() {
                if goodbye {
                    self.cache.remove(&record);
                    informative.push((record.clone(), true));
                } else {
                    // Known record: refresh quietly, no event
                    self.cache.refresh(&record);
                }
            } else if !goodbye {
                if record.cache_flush {
                    // Unique owner supersedes older rdata under this entry
                    self.cache.flush_entry(&record);
                }
                self.cache.put(record.clone());
                informative.push((record.clone(), false));
            }
            self.check_conflict(&record);
        }

        // Deliver in arrival order
        for (record, removed) in informative {
            self.notify_record(&record, removed);
        }
    }

    /// A unique incoming record matching an owned name with different rdata
    /// disputes our claim: revert one state, rename, probe again.
    pub(crate) fn check_conflict(&mut self, record: &DnsRecord) {
        if !record.cache_flush {
            return;
        }
        if !self.host.state.is_canceled()
            && record.name.eq_ignore_ascii_case(&self.host.name)
        {
            let ours = probe::host_records(
                &self.host.name,
                &self.host.v4,
                &self.host.v6,
                self.cfg.host_ttl_secs,
            );
            if disputes(record, &ours) {
                self.conflict_host();
                return;
            }
        }

        let mut conflicted = None;
        for (key, svc) in &self.services {
            if svc.info.state.is_canceled() {
                continue;
            }
            if record.name.eq_ignore_ascii_case(&svc.info.qualified_name()) {
                let ours = probe::service_records(
                    &svc.info,
                    self.cfg.host_ttl_secs,
                    self.cfg.record_ttl_secs,
                );
                if disputes(record, &ours) {
                    conflicted = Some(key.clone());
                    break;
                }
            }
        }
        if let Some(key) = conflicted {
            self.conflict_service(&key);
        }
    }

    /// Fan a cache change out to whoever asked a matching question.
    pub(crate) fn notify_record(&mut self, record: &DnsRecord, removed: bool) {
        match &record.rdata {
            RData::PTR(target) => {
                let name_lc = record.key();
                if name_lc == SERVICE_TYPE_ENUMERATION {
                    if !removed {
                        self.discovered_type(target);
                    }
                    return;
                }
                // A browse pointer at a type name also reveals the type
                if !removed
                    && (name_lc.ends_with("._tcp.local") || name_lc.ends_with("._udp.local"))
                {
                    let name = record.name.clone();
                    self.discovered_type(&name);
                }
                let instance = instance_label(target, &name_lc);
                let event = if removed {
                    ServiceEvent::Removed {
                        service_type: record.name.clone(),
                        instance: instance.clone(),
                    }
                } else {
                    ServiceEvent::Added {
                        service_type: record.name.clone(),
                        instance: instance.clone(),
                    }
                };
                if let Some(subs) = self.service_subs.get_mut(&name_lc) {
                    subs.retain(|tx| tx.send(event.clone()).is_ok());
                }
                if !removed {
                    self.emit_resolved(&name_lc, &instance);
                }
            }
            RData::SRV { .. } | RData::TXT(_) => {
                self.try_complete_pending();
                if !removed {
                    self.emit_resolved_for_qualified(&record.name);
                }
            }
            RData::A(_) | RData::AAAA(_) => {
                self.try_complete_pending();
            }
            _ => {}
        }
    }

    fn discovered_type(&mut self, service_type: &str) {
        let lc = service_type.trim_end_matches('.').to_lowercase();
        if self.known_types.contains_key(&lc) {
            return;
        }
        self.known_types
            .insert(lc, service_type.trim_end_matches('.').to_string());
        let display = service_type.trim_end_matches('.').to_string();
        self.type_subs.retain(|tx| tx.send(display.clone()).is_ok());
    }

    /// Emit `Resolved` to a type's subscribers once an instance has data.
    fn emit_resolved(&mut self, type_lc: &str, instance: &str) {
        let Some(info) = self.assemble_info(type_lc, instance) else {
            return;
        };
        if !info.has_data() {
            return;
        }
        if let Some(subs) = self.service_subs.get_mut(type_lc) {
            subs.retain(|tx| tx.send(ServiceEvent::Resolved(info.clone())).is_ok());
        }
    }

    fn emit_resolved_for_qualified(&mut self, qualified: &str) {
        let q_lc = qualified.trim_end_matches('.').to_lowercase();
        let types: Vec<String> = self
            .service_subs
            .keys()
            .filter(|t| q_lc.ends_with(&format!(".{}", t)))
            .cloned()
            .collect();
        for type_lc in types {
            let instance = instance_label(qualified, &type_lc);
            self.emit_resolved(&type_lc, &instance);
        }
    }

    fn try_complete_pending(&mut self) {
        let snapshot: Vec<(u64, String, String)> = self
            .pending_infos
            .iter()
            .map(|p| (p.token, p.service_type.clone(), p.instance.clone()))
            .collect();
        for (token, service_type, instance) in snapshot {
            if let Some(info) = self.assemble_info(&service_type, &instance) {
                if info.has_data() {
                    self.complete_pending(token, Some(info));
                }
            }
        }
    }

    // ---- queries ---------------------------------------------------------

    fn handle_query(&mut self, msg: DnsMessage, peer: SocketAddr) {
        // Known answers and probe authorities can dispute our claims
        let records: Vec<DnsRecord> = msg.all_records().cloned().collect();
        for record in records {
            self.check_conflict(&record);
        }

        if msg.is_truncated() {
            if let Some(pending) = &mut self.pending_query {
                if pending.peer.ip() == peer.ip() {
                    pending.msg.append_continuation(msg);
                    return;
                }
            }
            self.pending_query = Some(PendingQuery { peer, msg });
            let delay = rand::rng().random_range(20..=120) + TC_DEFER_MS;
            self.schedule(delay, Job::Respond { peer, query: None });
            return;
        }

        // A non-truncated frame from the same peer extends the pending
        // query instead of spawning another responder
        if let Some(pending) = &mut self.pending_query {
            if pending.peer.ip() == peer.ip() {
                pending.msg.append_continuation(msg);
                return;
            }
        }

        if msg.questions.is_empty() {
            return;
        }
        let delay = rand::rng().random_range(20..=120);
        self.schedule(delay, Job::Respond {
            peer,
            query: Some(Box::new(msg)),
        });
    }

    /// The responder job: answer every question we are authoritative for,
    /// minus what the querier already knows.
    pub(crate) fn respond(&mut self, peer: SocketAddr, query: Option<Box<DnsMessage>>) {
        let query = match query {
            Some(q) => *q,
            None => match self.pending_query.take() {
                Some(pending) => pending.msg,
                None => return,
            },
        };
        let known: Vec<DnsRecord> = query.all_records().cloned().collect();

        let mut answers = Vec::new();
        let mut additionals = Vec::new();
        for question in &query.questions {
            self.local_answers(question, &mut answers, &mut additionals);
        }
        dedup(&mut answers);
        answers.retain(|r| !r.suppressed_by(&known));
        if answers.is_empty() {
            debug!("nothing to answer for {}", peer);
            return;
        }
        dedup(&mut additionals);
        additionals.retain(|extra| {
            !answers
                .iter()
                .any(|a| a.same_entry(extra) && a.same_rdata(extra))
        });

        // Legacy unicast: a querier not on port 5353 cannot hear multicast
        let unicast = peer.port() != MDNS_PORT
            || query.questions.iter().all(|q| q.unicast_response);

        let mut frames = Vec::new();
        let mut builder = self.response_builder();
        for answer in &answers {
            if let Err(ProtoError::BufferFull) = builder.add_answer(answer, None) {
                builder.set_truncated();
                frames.push(builder.finish());
                builder = self.response_builder();
                if builder.add_answer(answer, None).is_err() {
                    debug!("record too large for any frame: {}", answer);
                }
            }
        }
        for extra in &additionals {
            if builder.add_additional(extra).is_err() {
                break;
            }
        }
        if !builder.is_empty() {
            frames.push(builder.finish());
        }
        for frame in frames {
            if unicast {
                self.send_to(frame, peer);
            } else {
                self.send_multicast(frame);
            }
        }
    }

    /// Authoritative records answering one question, with the additionals a
    /// client will want next.
    fn local_answers(
        &self,
        question: &zc_proto::DnsQuestion,
        answers: &mut Vec<DnsRecord>,
        additionals: &mut Vec<DnsRecord>,
    ) {
        let qtype = question.qtype;
        let wants = |t: RecordType| qtype == t || qtype == RecordType::ANY;

        // Type enumeration: one pointer per announced type
        if question.name.eq_ignore_ascii_case(SERVICE_TYPE_ENUMERATION) && wants(RecordType::PTR) {
            for svc in self.services.values() {
                if svc.info.state.is_announced() {
                    answers.push(DnsRecord::ptr(
                        SERVICE_TYPE_ENUMERATION,
                        &svc.info.service_type,
                        self.cfg.record_ttl_secs,
                    ));
                }
            }
        }

        for svc in self.services.values() {
            if !svc.info.state.is_announced() {
                continue;
            }
            let info = &svc.info;
            let records =
                probe::service_records(info, self.cfg.host_ttl_secs, self.cfg.record_ttl_secs);
            let (ptr, srv, txt) = (&records[0], &records[1], &records[2]);

            if info.service_type.eq_ignore_ascii_case(&question.name) && wants(RecordType::PTR) {
                answers.push(ptr.clone());
                additionals.push(srv.clone());
                additionals.push(txt.clone());
                self.push_host_records(additionals);
            }
            if info.qualified_name().eq_ignore_ascii_case(&question.name) {
                if wants(RecordType::SRV) {
                    answers.push(srv.clone());
                    self.push_host_records(additionals);
                }
                if wants(RecordType::TXT) {
                    answers.push(txt.clone());
                }
            }
        }

        if self.host.state.is_announced() && self.host.name.eq_ignore_ascii_case(&question.name) {
            for record in probe::host_records(
                &self.host.name,
                &self.host.v4,
                &self.host.v6,
                self.cfg.host_ttl_secs,
            ) {
                if wants(record.rtype) {
                    answers.push(record);
                }
            }
        }
    }

    fn push_host_records(&self, additionals: &mut Vec<DnsRecord>) {
        if !self.host.state.is_announced() {
            return;
        }
        additionals.extend(probe::host_records(
            &self.host.name,
            &self.host.v4,
            &self.host.v6,
            self.cfg.host_ttl_secs,
        ));
    }

    // ---- assembly from the cache ----------------------------------------

    /// Build a `ServiceInfo` for a remote instance from cached records.
    /// `None` when the cache holds nothing at all for it.
    pub(crate) fn assemble_info(&self, service_type: &str, instance: &str) -> Option<ServiceInfo> {
        let qualified = format!("{}.{}", instance, service_type);
        let mut info = ServiceInfo::new(service_type, instance, 0);
        info.state = Lifecycle::Announced;
        let mut found = false;

        for record in self.cache.by_name(&qualified) {
            match &record.rdata {
                RData::SRV {
                    priority,
                    weight,
                    port,
                    target,
                } => {
                    info.priority = *priority;
                    info.weight = *weight;
                    info.port = *port;
                    info.server = target.trim_end_matches('.').to_string();
                    found = true;
                }
                RData::TXT(bytes) => {
                    info.txt = bytes.clone();
                    found = true;
                }
                _ => {}
            }
        }
        if !info.server.is_empty() {
            for record in self.cache.by_name(&info.server) {
                match &record.rdata {
                    RData::A(ip) => info.addresses_v4.push(*ip),
                    RData::AAAA(ip) => info.addresses_v6.push(*ip),
                    _ => {}
                }
            }
        }
        found.then_some(info)
    }

    /// Every fully resolved instance of a type: cached peers plus our own
    /// announced registrations.
    pub(crate) fn assembled_instances(&self, type_lc: &str) -> Vec<ServiceInfo> {
        let mut out: Vec<ServiceInfo> = Vec::new();
        for record in self.cache.by_name(type_lc) {
            if let RData::PTR(target) = &record.rdata {
                let instance = instance_label(target, type_lc);
                if let Some(info) = self.assemble_info(type_lc, &instance) {
                    if info.has_data()
                        && !out
                            .iter()
                            .any(|i| i.qualified_name().eq_ignore_ascii_case(&info.qualified_name()))
                    {
                        out.push(info);
                    }
                }
            }
        }
        for svc in self.services.values() {
            if svc.info.state.is_announced()
                && svc.info.service_type.to_lowercase() == type_lc
                && !out
                    .iter()
                    .any(|i| i.qualified_name().eq_ignore_ascii_case(&svc.info.qualified_name()))
            {
                out.push(svc.info.clone());
            }
        }
        out
    }
}

/// True when `record` and some record of `ours` share an entry but none of
/// ours carries the same rdata.
fn disputes(record: &DnsRecord, ours: &[DnsRecord]) -> bool {
    ours.iter().any(|o| o.same_entry(record))
        && !ours
            .iter()
            .any(|o| o.same_entry(record) && o.same_rdata(record))
}

fn dedup(records: &mut Vec<DnsRecord>) {
    let mut i = 0;
    while i < records.len() {
        let duplicate = records[..i]
            .iter()
            .any(|r| r.same_entry(&records[i]) && r.same_rdata(&records[i]));
        if duplicate {
            records.swap_remove(i);
        } else {
            i += 1;
        }
    }
}
