//! The engine task: sole owner of the cache, the service registry, all
//! subscriptions and every timer. Frames and commands arrive as messages;
//! nothing else touches the state.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use zc_proto::{DnsMessage, MDNS_GROUP, MDNS_PORT, REVERSE_V4_DOMAIN};

use crate::cache::RecordCache;
use crate::config::MdnsConfig;
use crate::error::EngineError;
use crate::logging::TrafficLogger;
use crate::probe::ProbeThrottle;
use crate::server;
use crate::service::{self, Lifecycle, ServiceInfo};
use crate::tasks::Job;
use crate::{Command, ServiceEvent};

/// A host or a registered service; each owns at most one lifecycle job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Entity {
    Host,
    /// Lowercased qualified service name.
    Service(String),
}

pub(crate) struct HostEntity {
    pub name: String,
    pub v4: Vec<Ipv4Addr>,
    pub v6: Vec<Ipv6Addr>,
    pub state: Lifecycle,
}

pub(crate) struct LocalService {
    pub info: ServiceInfo,
    pub register_waiters: Vec<(u64, oneshot::Sender<Result<ServiceInfo, EngineError>>)>,
    pub cancel_waiters: Vec<oneshot::Sender<()>>,
}

pub(crate) struct PendingInfo {
    pub service_type: String,
    pub instance: String,
    pub token: u64,
    pub reply: Option<oneshot::Sender<Option<ServiceInfo>>>,
}

/// A truncated query held open for its continuation frames.
pub(crate) struct PendingQuery {
    pub peer: SocketAddr,
    pub msg: DnsMessage,
}

pub(crate) struct Engine {
    pub(crate) cfg: MdnsConfig,
    epoch: Instant,

    pub(crate) cache: RecordCache,
    pub(crate) host: HostEntity,
    pub(crate) services: HashMap<String, LocalService>,

    pub(crate) type_subs: Vec<mpsc::UnboundedSender<String>>,
    pub(crate) service_subs: HashMap<String, Vec<mpsc::UnboundedSender<ServiceEvent>>>,
    /// Known service types: lowercased → display form.
    pub(crate) known_types: HashMap<String, String>,
    /// Types with an active browse resolver.
    pub(crate) browsed: HashSet<String>,
    pub(crate) types_browsed: bool,

    pub(crate) pending_infos: Vec<PendingInfo>,
    pub(crate) pending_query: Option<PendingQuery>,

    timer: BinaryHeap<Reverse<(Instant, u64)>>,
    jobs: HashMap<u64, Job>,
    next_id: u64,
    pub(crate) entity_jobs: HashMap<Entity, u64>,

    pub(crate) out_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    frame_rx: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,

    pub(crate) throttle: ProbeThrottle,
    pub(crate) traffic_log: Option<TrafficLogger>,

    pub(crate) closing: bool,
    close_waiters: Vec<oneshot::Sender<()>>,
    /// Woken when the service registry drains (unregister_all).
    idle_waiters: Vec<oneshot::Sender<()>>,
    socket_down: bool,
    cmd_open: bool,
}

impl Engine {
    pub(crate) fn new(
        cfg: MdnsConfig,
        v4: Vec<Ipv4Addr>,
        v6: Vec<Ipv6Addr>,
        frame_rx: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
        out_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    ) -> Self {
        let traffic_log = if cfg.traffic_log_path.is_empty() {
            None
        } else {
            Some(TrafficLogger::new(&cfg.traffic_log_path))
        };
        let host = HostEntity {
            name: cfg.host_name(),
            v4,
            v6,
            state: Lifecycle::Probing1,
        };
        Self {
            cfg,
            epoch: Instant::now(),
            cache: RecordCache::new(),
            host,
            services: HashMap::new(),
            type_subs: Vec::new(),
            service_subs: HashMap::new(),
            known_types: HashMap::new(),
            browsed: HashSet::new(),
            types_browsed: false,
            pending_infos: Vec::new(),
            pending_query: None,
            timer: BinaryHeap::new(),
            jobs: HashMap::new(),
            next_id: 0,
            entity_jobs: HashMap::new(),
            out_tx,
            frame_rx,
            throttle: ProbeThrottle::default(),
            traffic_log,
            closing: false,
            close_waiters: Vec::new(),
            idle_waiters: Vec::new(),
            socket_down: false,
            cmd_open: true,
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        info!("mDNS responder starting as {}", self.host.name);
        self.start();

        loop {
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                cmd = cmd_rx.recv(), if self.cmd_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        // Every handle dropped: wind down
                        self.cmd_open = false;
                        self.begin_close(None);
                    }
                },
                frame = self.frame_rx.recv(), if !self.socket_down => match frame {
                    Some((buf, peer)) => self.handle_frame(&buf, peer),
                    None => self.socket_down = true,
                },
                _ = tokio::time::sleep_until(deadline) => self.run_due_jobs(),
            }

            if self.socket_down && !self.closing {
                self.recover();
            }
            if self.finished() {
                break;
            }
        }
        debug!("engine stopped");
    }

    fn start(&mut self) {
        self.schedule(10_000, Job::Reap);
        if self.host.v4.is_empty() && self.host.v6.is_empty() {
            // Nothing to claim; services may still publish with an
            // externally supplied target host.
            warn!("no host addresses to publish; skipping host probing");
            self.host.state = Lifecycle::Announced;
        } else {
            self.schedule_probe(Entity::Host);
        }
    }

    // ---- timers ----------------------------------------------------------

    pub(crate) fn next_token(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn schedule(&mut self, delay_ms: u64, job: Job) -> u64 {
        let id = self.next_token();
        self.jobs.insert(id, job);
        self.timer
            .push(Reverse((Instant::now() + Duration::from_millis(delay_ms), id)));
        id
    }

    /// Install an entity's current lifecycle job, cancelling its previous
    /// one — at most one Prober/Announcer/Renewer/Canceler per entity.
    pub(crate) fn schedule_entity(&mut self, entity: Entity, delay_ms: u64, job: Job) {
        let id = self.schedule(delay_ms, job);
        if let Some(old) = self.entity_jobs.insert(entity, id) {
            self.jobs.remove(&old);
        }
    }

    pub(crate) fn cancel_entity(&mut self, entity: &Entity) {
        if let Some(id) = self.entity_jobs.remove(entity) {
            self.jobs.remove(&id);
        }
    }

    /// First probe of a cycle: random initial delay, subject to throttling.
    pub(crate) fn schedule_probe(&mut self, entity: Entity) {
        let base = rand::rng().random_range(0..250);
        let now = self.now_ms();
        let delay = self.throttle.next_probe_delay(now, base);
        self.schedule_entity(entity.clone(), delay, Job::Probe { entity, tick: 1 });
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.peek().map(|&Reverse((t, _))| t)
    }

    fn run_due_jobs(&mut self) {
        let now = Instant::now();
        while let Some(&Reverse((deadline, _))) = self.timer.peek() {
            if deadline > now {
                break;
            }
            let Reverse((_, id)) = self.timer.pop().unwrap();
            let Some(job) = self.jobs.remove(&id) else {
                // Cancelled or superseded
                continue;
            };
            if let Some(entity) = job.entity() {
                if self.entity_jobs.get(entity) != Some(&id) {
                    continue;
                }
                self.entity_jobs.remove(&entity.clone());
            }
            self.run_job(job);
        }
    }

    // ---- commands --------------------------------------------------------

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register { info, reply } => self.register(info, reply),
            Command::Unregister {
                qualified_name,
                reply,
            } => self.unregister(&qualified_name, reply),
            Command::UnregisterAll { reply } => {
                if self.services.is_empty() {
                    let _ = reply.send(());
                    return;
                }
                self.idle_waiters.push(reply);
                for key in self.services.keys().cloned().collect::<Vec<_>>() {
                    self.schedule_cancel(Entity::Service(key));
                }
            }
            Command::BrowseTypes { tx } => {
                for display in self.known_types.values() {
                    let _ = tx.send(display.clone());
                }
                self.type_subs.push(tx);
                if !self.types_browsed && !self.closing {
                    self.types_browsed = true;
                    self.schedule(0, Job::ResolveTypes { interval_ms: 225 });
                }
            }
            Command::Browse { service_type, tx } => self.browse(&service_type, tx),
            Command::ResolveInfo {
                service_type,
                instance,
                timeout_ms,
                reply,
            } => self.resolve_info(service_type, instance, timeout_ms, reply),
            Command::List {
                service_type,
                reply,
            } => {
                let lc = service_type.to_lowercase();
                if self.browsed.contains(&lc) || self.closing {
                    let _ = reply.send(self.assembled_instances(&lc));
                } else {
                    self.start_browse(&lc);
                    // Grace window for first answers to the new browse
                    self.schedule(200, Job::ListGrace {
                        service_type: lc,
                        reply,
                    });
                }
            }
            Command::Close { reply } => self.begin_close(Some(reply)),
        }
    }

    fn register(
        &mut self,
        mut info: ServiceInfo,
        reply: oneshot::Sender<Result<ServiceInfo, EngineError>>,
    ) {
        if self.closing {
            let _ = reply.send(Err(EngineError::Closed));
            return;
        }
        // Reverse-mapping names are not ours to claim; refused silently.
        if info
            .qualified_name()
            .to_lowercase()
            .ends_with(REVERSE_V4_DOMAIN)
        {
            debug!("ignoring registration under {}", REVERSE_V4_DOMAIN);
            let _ = reply.send(Ok(info));
            return;
        }

        if info.server.is_empty() {
            info.server = self.host.name.clone();
        }
        if info.txt.is_empty() {
            info.txt = vec![0];
        }
        while self
            .services
            .contains_key(&info.qualified_name().to_lowercase())
        {
            info.instance = service::increment_name(&info.instance);
        }
        info.state = Lifecycle::Probing1;

        let key = info.qualified_name().to_lowercase();
        info!("registering {}", info.qualified_name());
        let token = self.next_token();
        self.services.insert(
            key.clone(),
            LocalService {
                info,
                register_waiters: vec![(token, reply)],
                cancel_waiters: Vec::new(),
            },
        );
        let timeout = self.cfg.register_timeout_ms;
        self.schedule(timeout, Job::RegisterDeadline { token });
        self.schedule_probe(Entity::Service(key));
    }

    fn unregister(&mut self, qualified_name: &str, reply: oneshot::Sender<()>) {
        let key = qualified_name.trim_end_matches('.').to_lowercase();
        match self.services.get_mut(&key) {
            Some(svc) => {
                svc.cancel_waiters.push(reply);
                self.schedule_cancel(Entity::Service(key));
            }
            None => {
                let _ = reply.send(());
            }
        }
    }

    pub(crate) fn schedule_cancel(&mut self, entity: Entity) {
        self.schedule_entity(entity.clone(), 0, Job::Cancel { entity, tick: 1 });
    }

    fn browse(&mut self, service_type: &str, tx: mpsc::UnboundedSender<ServiceEvent>) {
        let lc = service_type.to_lowercase();
        // Replay what the cache already knows, then go live
        for record in self.cache.by_name(&lc).to_vec() {
            if let zc_proto::RData::PTR(target) = &record.rdata {
                let instance = instance_label(target, &lc);
                let _ = tx.send(ServiceEvent::Added {
                    service_type: service_type.to_string(),
                    instance: instance.clone(),
                });
                if let Some(info) = self.assemble_info(service_type, &instance) {
                    if info.has_data() {
                        let _ = tx.send(ServiceEvent::Resolved(info));
                    }
                }
            }
        }
        self.service_subs.entry(lc.clone()).or_default().push(tx);
        if !self.browsed.contains(&lc) && !self.closing {
            self.start_browse(&lc);
        }
    }

    fn start_browse(&mut self, type_lc: &str) {
        self.browsed.insert(type_lc.to_string());
        let delay = rand::rng().random_range(0..250);
        self.schedule(delay, Job::ResolveService {
            service_type: type_lc.to_string(),
            interval_ms: 225,
        });
    }

    fn resolve_info(
        &mut self,
        service_type: String,
        instance: String,
        timeout_ms: u64,
        reply: oneshot::Sender<Option<ServiceInfo>>,
    ) {
        if let Some(info) = self.assemble_info(&service_type, &instance) {
            if info.has_data() {
                let _ = reply.send(Some(info));
                return;
            }
        }
        if self.closing {
            let _ = reply.send(None);
            return;
        }
        let token = self.next_token();
        self.pending_infos.push(PendingInfo {
            service_type,
            instance,
            token,
            reply: Some(reply),
        });
        let timeout = if timeout_ms == 0 {
            self.cfg.resolve_timeout_ms
        } else {
            timeout_ms
        };
        self.schedule(225, Job::ResolveInfo {
            token,
            interval_ms: 225,
        });
        self.schedule(timeout, Job::InfoDeadline { token });
    }

    // ---- conflicts -------------------------------------------------------

    /// A peer holds `name` with different unique rdata: step the state back,
    /// pick the next candidate name, and probe again.
    pub(crate) fn conflict_service(&mut self, key: &str) {
        let Some(mut svc) = self.services.remove(key) else {
            return;
        };
        self.cancel_entity(&Entity::Service(key.to_string()));

        let old = svc.info.qualified_name();
        svc.info.state = svc.info.state.revert();
        svc.info.instance = service::increment_name(&svc.info.instance);
        while self
            .services
            .contains_key(&svc.info.qualified_name().to_lowercase())
        {
            svc.info.instance = service::increment_name(&svc.info.instance);
        }
        let new_key = svc.info.qualified_name().to_lowercase();
        warn!("name conflict: {} -> {}", old, svc.info.qualified_name());
        self.services.insert(new_key.clone(), svc);
        self.schedule_probe(Entity::Service(new_key));
    }

    pub(crate) fn conflict_host(&mut self) {
        if self.host.state.is_canceled() {
            return;
        }
        let old = self.host.name.clone();
        self.cancel_entity(&Entity::Host);
        self.host.state = self.host.state.revert();
        self.host.name = service::increment_host_name(&self.host.name);
        warn!("host name conflict: {} -> {}", old, self.host.name);
        // Services targeting the old host follow it to the new name
        for svc in self.services.values_mut() {
            if svc.info.server.eq_ignore_ascii_case(&old) {
                svc.info.server = self.host.name.clone();
            }
        }
        self.schedule_probe(Entity::Host);
    }

    // ---- registry plumbing ----------------------------------------------

    /// Called when a service finishes announcing.
    pub(crate) fn service_announced(&mut self, key: &str) {
        if let Some(svc) = self.services.get_mut(key) {
            svc.info.state = Lifecycle::Announced;
            info!("announced {}", svc.info.qualified_name());
            let info = svc.info.clone();
            for (_, waiter) in svc.register_waiters.drain(..) {
                let _ = waiter.send(Ok(info.clone()));
            }
        }
    }

    /// Called when a service's goodbye retransmissions are done.
    pub(crate) fn service_canceled(&mut self, key: &str) {
        if let Some(mut svc) = self.services.remove(key) {
            svc.info.state = Lifecycle::Canceled;
            info!("withdrew {}", svc.info.qualified_name());
            for waiter in svc.cancel_waiters.drain(..) {
                let _ = waiter.send(());
            }
            for (_, waiter) in svc.register_waiters.drain(..) {
                let _ = waiter.send(Err(EngineError::Closed));
            }
        }
        if self.services.is_empty() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    pub(crate) fn register_deadline(&mut self, token: u64) {
        for svc in self.services.values_mut() {
            if let Some(pos) = svc.register_waiters.iter().position(|(t, _)| *t == token) {
                let (_, waiter) = svc.register_waiters.swap_remove(pos);
                let _ = waiter.send(Err(EngineError::Timeout));
                return;
            }
        }
    }

    // ---- shutdown --------------------------------------------------------

    fn begin_close(&mut self, reply: Option<oneshot::Sender<()>>) {
        if self.closing {
            match reply {
                Some(r) if self.is_done() => {
                    let _ = r.send(());
                }
                Some(r) => self.close_waiters.push(r),
                None => {}
            }
            return;
        }
        info!("closing responder");
        self.closing = true;
        if let Some(r) = reply {
            self.close_waiters.push(r);
        }
        for key in self.services.keys().cloned().collect::<Vec<_>>() {
            self.schedule_cancel(Entity::Service(key));
        }
        if !self.host.state.is_canceled() {
            self.schedule_cancel(Entity::Host);
        }
        // Resolutions in flight come back empty
        for pending in self.pending_infos.drain(..) {
            if let Some(reply) = pending.reply {
                let _ = reply.send(None);
            }
        }
    }

    fn is_done(&self) -> bool {
        self.closing && self.services.is_empty() && self.host.state.is_canceled()
    }

    fn finished(&mut self) -> bool {
        if !self.is_done() {
            return false;
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(());
        }
        true
    }

    // ---- I/O -------------------------------------------------------------

    pub(crate) fn send_multicast(&mut self, frame: Vec<u8>) {
        let dest = SocketAddr::from((MDNS_GROUP, MDNS_PORT));
        self.send_to(frame, dest);
    }

    pub(crate) fn send_to(&mut self, frame: Vec<u8>, dest: SocketAddr) {
        if self.out_tx.send((frame, dest)).is_err() {
            self.socket_down = true;
        }
    }

    fn recover(&mut self) {
        error!("multicast socket failed; rebuilding and re-announcing");
        match server::spawn_socket(&self.cfg) {
            Ok((frame_rx, out_tx)) => {
                self.frame_rx = frame_rx;
                self.out_tx = out_tx;
                self.socket_down = false;
                // Snapshot survives in the registry: claim everything again
                if !self.host.v4.is_empty() || !self.host.v6.is_empty() {
                    self.host.state = Lifecycle::Probing1;
                    self.schedule_probe(Entity::Host);
                }
                for svc in self.services.values_mut() {
                    svc.info.state = Lifecycle::Probing1;
                }
                for key in self.services.keys().cloned().collect::<Vec<_>>() {
                    self.schedule_probe(Entity::Service(key));
                }
            }
            Err(e) => {
                error!("socket rebuild failed: {e}; retrying");
                self.socket_down = false;
                self.schedule(5000, Job::Recover);
            }
        }
    }

    pub(crate) fn run_recover(&mut self) {
        if !self.closing {
            self.socket_down = true;
        }
    }
}

/// Instance label of a qualified name, given its (lowercased, ASCII) type.
pub(crate) fn instance_label(qualified: &str, type_lc: &str) -> String {
    let qualified = qualified.trim_end_matches('.');
    if qualified.len() > type_lc.len() + 1 {
        let split = qualified.len() - type_lc.len();
        if qualified.is_char_boundary(split) {
            let (head, tail) = qualified.split_at(split);
            if tail.eq_ignore_ascii_case(type_lc) && head.ends_with('.') {
                return head[..head.len() - 1].to_string();
            }
        }
    }
    qualified.to_string()
}
