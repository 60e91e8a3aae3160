//! The scheduled jobs driving probing, announcing, renewal, reaping,
//! query responses, goodbyes and the three resolvers.

use std::net::SocketAddr;

use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use zc_proto::{
    DnsMessage, DnsQuestion, DnsRecord, MessageBuilder, RecordType, SERVICE_TYPE_ENUMERATION,
};

use crate::engine::{Engine, Entity};
use crate::probe;
use crate::service::{Lifecycle, ServiceInfo};

/// Backoff ceiling for the resolvers.
const RESOLVE_INTERVAL_MAX_MS: u64 = 20_000;
const REAP_INTERVAL_MS: u64 = 10_000;
const GOODBYE_COUNT: u8 = 3;
const GOODBYE_INTERVAL_MS: u64 = 125;
/// TTL percentages at which announced records are re-announced.
const RENEW_STAGES: [u32; 4] = [80, 85, 90, 95];

pub(crate) enum Job {
    Probe { entity: Entity, tick: u8 },
    Announce { entity: Entity, tick: u8 },
    Renew { entity: Entity, stage: u8 },
    Cancel { entity: Entity, tick: u8 },
    Reap,
    Respond {
        peer: SocketAddr,
        /// `None`: drain the pending coalesced query instead.
        query: Option<Box<DnsMessage>>,
    },
    ResolveTypes { interval_ms: u64 },
    ResolveService { service_type: String, interval_ms: u64 },
    ResolveInfo { token: u64, interval_ms: u64 },
    InfoDeadline { token: u64 },
    RegisterDeadline { token: u64 },
    ListGrace {
        service_type: String,
        reply: oneshot::Sender<Vec<ServiceInfo>>,
    },
    Recover,
}

impl Job {
    /// The entity whose "current task" slot this job occupies, if any.
    pub(crate) fn entity(&self) -> Option<&Entity> {
        match self {
            Job::Probe { entity, .. }
            | Job::Announce { entity, .. }
            | Job::Renew { entity, .. }
            | Job::Cancel { entity, .. } => Some(entity),
            _ => None,
        }
    }
}

impl Engine {
    pub(crate) fn run_job(&mut self, job: Job) {
        if self.closing
            && !matches!(job, Job::Cancel { .. } | Job::Reap | Job::ListGrace { .. })
        {
            // Only goodbyes, reaping and parked list replies survive close
            return;
        }
        match job {
            Job::Probe { entity, tick } => self.run_probe(entity, tick),
            Job::Announce { entity, tick } => self.run_announce(entity, tick),
            Job::Renew { entity, stage } => self.run_renew(entity, stage),
            Job::Cancel { entity, tick } => self.run_cancel(entity, tick),
            Job::Reap => self.run_reap(),
            Job::Respond { peer, query } => self.respond(peer, query),
            Job::ResolveTypes { interval_ms } => self.run_resolve_types(interval_ms),
            Job::ResolveService {
                service_type,
                interval_ms,
            } => self.run_resolve_service(service_type, interval_ms),
            Job::ResolveInfo { token, interval_ms } => self.run_resolve_info(token, interval_ms),
            Job::InfoDeadline { token } => self.run_info_deadline(token),
            Job::RegisterDeadline { token } => self.register_deadline(token),
            Job::ListGrace {
                service_type,
                reply,
            } => {
                let _ = reply.send(self.assembled_instances(&service_type));
            }
            Job::Recover => self.run_recover(),
        }
    }

    /// Name and authoritative records an entity claims. Empty records for a
    /// service that has been removed or renamed since the job was queued.
    fn entity_records(&self, entity: &Entity) -> (String, Vec<DnsRecord>) {
        match entity {
            Entity::Host => (
                self.host.name.clone(),
                probe::host_records(
                    &self.host.name,
                    &self.host.v4,
                    &self.host.v6,
                    self.cfg.host_ttl_secs,
                ),
            ),
            Entity::Service(key) => match self.services.get(key) {
                Some(svc) => (
                    svc.info.qualified_name(),
                    probe::service_records(
                        &svc.info,
                        self.cfg.host_ttl_secs,
                        self.cfg.record_ttl_secs,
                    ),
                ),
                None => (String::new(), Vec::new()),
            },
        }
    }

    fn set_entity_state(&mut self, entity: &Entity, state: Lifecycle) {
        match entity {
            Entity::Host => self.host.state = state,
            Entity::Service(key) => {
                if let Some(svc) = self.services.get_mut(key) {
                    svc.info.state = state;
                }
            }
        }
    }

    pub(crate) fn response_builder(&self) -> MessageBuilder {
        let b = MessageBuilder::response().with_max_size(self.cfg.max_packet_size);
        if self.cfg.name_compression {
            b
        } else {
            b.without_compression()
        }
    }

    fn query_builder(&self) -> MessageBuilder {
        let b = MessageBuilder::query().with_max_size(self.cfg.max_packet_size);
        if self.cfg.name_compression {
            b
        } else {
            b.without_compression()
        }
    }

    // ---- prober ----------------------------------------------------------

    fn run_probe(&mut self, entity: Entity, tick: u8) {
        let (name, records) = self.entity_records(&entity);
        if records.is_empty() {
            return;
        }
        let state = match tick {
            1 => Lifecycle::Probing1,
            2 => Lifecycle::Probing2,
            _ => Lifecycle::Probing3,
        };
        self.set_entity_state(&entity, state);

        let mut b = self.query_builder();
        let mut question = DnsQuestion::new(&name, RecordType::ANY);
        question.unicast_response = tick == 1;
        let mut ok = b.add_question(&question).is_ok();
        for record in &records {
            ok = ok && b.add_authority(record).is_ok();
        }
        if !ok {
            warn!("probe frame for {} overflowed; sent partial", name);
        }
        debug!("probe {}/3 for {}", tick, name);
        self.send_multicast(b.finish());

        if tick < 3 {
            let now = self.now_ms();
            let delay = self.throttle.next_probe_delay(now, 250);
            self.schedule_entity(entity.clone(), delay, Job::Probe {
                entity,
                tick: tick + 1,
            });
        } else {
            self.schedule_entity(entity.clone(), 1000, Job::Announce { entity, tick: 1 });
        }
    }

    // ---- announcer / renewer --------------------------------------------

    fn run_announce(&mut self, entity: Entity, tick: u8) {
        let (name, mut records) = self.entity_records(&entity);
        if records.is_empty() {
            return;
        }
        self.set_entity_state(&entity, match tick {
            1 => Lifecycle::Announcing1,
            _ => Lifecycle::Announcing2,
        });

        let now = self.now_ms();
        for record in &mut records {
            record.created = now;
        }
        debug!("announce {}/2 for {}", tick, name);
        self.send_announcement(&entity, &records);

        if tick < 2 {
            self.schedule_entity(entity.clone(), 250, Job::Announce {
                entity,
                tick: tick + 1,
            });
        } else {
            match &entity {
                Entity::Host => {
                    self.host.state = Lifecycle::Announced;
                    info!("host {} announced", self.host.name);
                }
                Entity::Service(key) => {
                    let key = key.clone();
                    self.service_announced(&key);
                }
            }
            // The shortest-lived record paces the renewal cycle
            let Some(pacer) = records.iter().min_by_key(|r| r.ttl) else {
                return;
            };
            self.schedule_entity(entity.clone(), renew_delay(pacer), Job::Renew {
                entity,
                stage: 0,
            });
        }
    }

    fn run_renew(&mut self, entity: Entity, stage: u8) {
        let announced = match &entity {
            Entity::Host => self.host.state.is_announced(),
            Entity::Service(key) => self
                .services
                .get(key)
                .map(|s| s.info.state.is_announced())
                .unwrap_or(false),
        };
        if !announced {
            return;
        }
        let (name, mut records) = self.entity_records(&entity);
        if records.is_empty() {
            return;
        }
        let now = self.now_ms();
        for record in &mut records {
            record.created = now;
        }
        debug!("renew stage {} for {}", stage, name);
        self.send_announcement(&entity, &records);

        let Some(pacer) = records.iter().min_by_key(|r| r.ttl) else {
            return;
        };
        let (next_stage, delay) = if stage < 3 {
            let stage = stage as usize;
            (
                stage as u8 + 1,
                pacer.ttl_point(RENEW_STAGES[stage + 1]) - pacer.ttl_point(RENEW_STAGES[stage]),
            )
        } else {
            (0, renew_delay(pacer))
        };
        self.schedule_entity(entity.clone(), delay, Job::Renew {
            entity,
            stage: next_stage,
        });
    }

    /// Unsolicited response claiming `records`; service announcements carry
    /// the host address records as additionals.
    fn send_announcement(&mut self, entity: &Entity, records: &[DnsRecord]) {
        let mut b = self.response_builder();
        let mut ok = true;
        for record in records {
            ok = ok && b.add_answer(record, None).is_ok();
        }
        if let Entity::Service(_) = entity {
            if self.host.state.is_announced() {
                for extra in probe::host_records(
                    &self.host.name,
                    &self.host.v4,
                    &self.host.v6,
                    self.cfg.host_ttl_secs,
                ) {
                    if b.add_additional(&extra).is_err() {
                        break;
                    }
                }
            }
        }
        if !ok {
            warn!("announcement overflowed; sent partial");
        }
        self.send_multicast(b.finish());
    }

    // ---- canceler --------------------------------------------------------

    fn run_cancel(&mut self, entity: Entity, tick: u8) {
        let (name, mut records) = self.entity_records(&entity);
        self.set_entity_state(&entity, Lifecycle::Canceled);

        if !records.is_empty() {
            debug!("goodbye {}/{} for {}", tick, GOODBYE_COUNT, name);
            for record in &mut records {
                record.ttl = 0;
            }
            let mut b = self.response_builder();
            for record in &records {
                let _ = b.add_answer(record, None);
            }
            self.send_multicast(b.finish());
        }

        if tick < GOODBYE_COUNT {
            self.schedule_entity(entity.clone(), GOODBYE_INTERVAL_MS, Job::Cancel {
                entity,
                tick: tick + 1,
            });
        } else if let Entity::Service(key) = entity {
            self.service_canceled(&key);
        }
    }

    // ---- reaper ----------------------------------------------------------

    fn run_reap(&mut self) {
        let now = self.now_ms();
        let reaped = self.cache.reap(now);
        if !reaped.is_empty() {
            debug!("reaped {} expired records", reaped.len());
        }
        for record in reaped {
            self.notify_record(&record, true);
        }
        self.schedule(REAP_INTERVAL_MS, Job::Reap);
    }

    // ---- resolvers -------------------------------------------------------

    fn run_resolve_types(&mut self, interval_ms: u64) {
        self.type_subs.retain(|tx| !tx.is_closed());
        if self.type_subs.is_empty() {
            self.types_browsed = false;
            return;
        }
        let now = self.now_ms();
        let known = self.cache.by_name(SERVICE_TYPE_ENUMERATION).to_vec();
        let mut b = self.query_builder();
        let _ = b.add_question(&DnsQuestion::new(SERVICE_TYPE_ENUMERATION, RecordType::PTR));
        for record in &known {
            let _ = b.add_answer(record, Some(now));
        }
        self.send_multicast(b.finish());
        self.schedule(interval_ms, Job::ResolveTypes {
            interval_ms: (interval_ms * 2).min(RESOLVE_INTERVAL_MAX_MS),
        });
    }

    fn run_resolve_service(&mut self, service_type: String, interval_ms: u64) {
        if let Some(subs) = self.service_subs.get_mut(&service_type) {
            subs.retain(|tx| !tx.is_closed());
        }
        let has_subs = self
            .service_subs
            .get(&service_type)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_subs && interval_ms >= RESOLVE_INTERVAL_MAX_MS {
            // Nobody listening anymore; stop browsing this type
            self.browsed.remove(&service_type);
            return;
        }

        let now = self.now_ms();
        let known = self.cache.by_name(&service_type).to_vec();
        let mut b = self.query_builder();
        let _ = b.add_question(&DnsQuestion::new(&service_type, RecordType::PTR));
        for record in &known {
            if record.rtype == RecordType::PTR {
                let _ = b.add_answer(record, Some(now));
            }
        }
        self.send_multicast(b.finish());
        self.schedule(interval_ms, Job::ResolveService {
            service_type,
            interval_ms: (interval_ms * 2).min(RESOLVE_INTERVAL_MAX_MS),
        });
    }

    fn run_resolve_info(&mut self, token: u64, interval_ms: u64) {
        let Some(pending) = self.pending_infos.iter().find(|p| p.token == token) else {
            return;
        };
        let service_type = pending.service_type.clone();
        let instance = pending.instance.clone();
        let qualified = format!("{}.{}", instance, service_type);

        if let Some(info) = self.assemble_info(&service_type, &instance) {
            if info.has_data() {
                self.complete_pending(token, Some(info));
                return;
            }
        }

        let now = self.now_ms();
        let partial = self.assemble_info(&service_type, &instance);
        let server = partial.map(|p| p.server).unwrap_or_default();

        let mut known = self.cache.by_name(&qualified).to_vec();
        let mut b = self.query_builder();
        let _ = b.add_question(&DnsQuestion::new(&qualified, RecordType::SRV));
        let _ = b.add_question(&DnsQuestion::new(&qualified, RecordType::TXT));
        if !server.is_empty() {
            let _ = b.add_question(&DnsQuestion::new(&server, RecordType::A));
            let _ = b.add_question(&DnsQuestion::new(&server, RecordType::AAAA));
            known.extend(self.cache.by_name(&server).to_vec());
        }
        for record in &known {
            let _ = b.add_answer(record, Some(now));
        }
        self.send_multicast(b.finish());
        self.schedule(interval_ms, Job::ResolveInfo {
            token,
            interval_ms: (interval_ms * 2).min(RESOLVE_INTERVAL_MAX_MS),
        });
    }

    fn run_info_deadline(&mut self, token: u64) {
        self.complete_pending(token, None);
    }

    pub(crate) fn complete_pending(&mut self, token: u64, result: Option<ServiceInfo>) {
        if let Some(pos) = self.pending_infos.iter().position(|p| p.token == token) {
            let mut pending = self.pending_infos.swap_remove(pos);
            if let Some(reply) = pending.reply.take() {
                let _ = reply.send(result);
            }
        }
    }
}

/// Delay to the first renewal point (80 % of `record`'s TTL), with a little
/// jitter so renewers on a busy link spread out.
fn renew_delay(record: &DnsRecord) -> u64 {
    record.ttl_point(RENEW_STAGES[0]) - record.created + rand::rng().random_range(0..500)
}
