//! Per-transport client registry and message router.
//!
//! A [`Broker`] owns the set of admitted clients for one transport. Its run loop
//! drains the broadcast queue and fans every frame out to each client's own
//! bounded buffer, and forwards bytes read from clients into the shared response
//! queue. Every push is non-blocking: a slow client loses frames, it never slows
//! the loop or the other clients down.
//!
//! [`Broker::quit`] is the single cancellation primitive. It is idempotent, and it
//! drops every client's outbound sender, so each transport loop observes the end
//! of its [`ClientConn::next_broadcast`] stream and closes its socket.

use super::queue::BroadcastQueue;
use super::types::{Frame, Payload, PushOutcome};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const LOG_THROTTLE: Duration = Duration::from_secs(2);

/// Connection admission rules, evaluated once when a client connects.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    /// Allow at most one registered client per remote IP.
    pub one_per_ip: bool,
    /// IPs exempt from the per-IP limit.
    pub trusted_ips: HashSet<IpAddr>,
}

impl AdmissionPolicy {
    fn allows(&self, ip: IpAddr, mut registered: impl Iterator<Item = IpAddr>) -> bool {
        !self.one_per_ip || self.trusted_ips.contains(&ip) || !registered.any(|other| other == ip)
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Transport label used in logs.
    pub transport: &'static str,
    pub policy: AdmissionPolicy,
    /// Capacity of the broadcast queue and of the inbound buffer.
    pub queue_capacity: usize,
    /// Capacity of each client's outbound buffer.
    pub client_queue_capacity: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionError {
    // Another client from this IP is registered and the IP is not trusted.
    DuplicateIp,
    // The broker has quit and admits nobody.
    Quit,
}

struct ClientEntry {
    ip: IpAddr,
    outbound_tx: mpsc::Sender<Frame>,
    dropped: u64,
    last_full_log: Instant,
}

struct Inbound {
    client_id: u64,
    payload: Payload,
}

struct LoopReceivers {
    broadcast_rx: mpsc::Receiver<Frame>,
    inbound_rx: mpsc::Receiver<Inbound>,
}

pub struct Broker {
    transport: &'static str,
    policy: AdmissionPolicy,
    client_queue_capacity: usize,
    clients: Mutex<HashMap<u64, ClientEntry>>,
    next_client_id: AtomicU64,
    quit_tx: watch::Sender<bool>,
    inbound_tx: mpsc::Sender<Inbound>,
    // Taken by the first `run_loop` call.
    loop_rx: Mutex<Option<LoopReceivers>>,
    response_tx: mpsc::Sender<Payload>,
}

impl Broker {
    /// Creates a broker that forwards client bytes into `response_tx`.
    ///
    /// Returns the broker and the producer end of its broadcast queue.
    pub fn new(
        settings: BrokerSettings,
        response_tx: mpsc::Sender<Payload>,
    ) -> (Arc<Self>, BroadcastQueue) {
        let (queue, broadcast_rx) = BroadcastQueue::new(settings.queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (quit_tx, _quit_rx) = watch::channel(false);

        let broker = Arc::new(Self {
            transport: settings.transport,
            policy: settings.policy,
            client_queue_capacity: settings.client_queue_capacity.max(1),
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            quit_tx,
            inbound_tx,
            loop_rx: Mutex::new(Some(LoopReceivers {
                broadcast_rx,
                inbound_rx,
            })),
            response_tx,
        });
        (broker, queue)
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }

    /// Registers a client connecting from `ip` if the admission policy allows it.
    pub fn admit(self: &Arc<Self>, ip: IpAddr) -> Result<ClientConn, AdmissionError> {
        let mut clients = self.lock_clients();
        // Checked under the registry lock so a concurrent quit cannot miss this client.
        if self.has_quit() {
            return Err(AdmissionError::Quit);
        }
        if !self.policy.allows(ip, clients.values().map(|c| c.ip)) {
            debug!(transport = self.transport, %ip, "rejecting duplicate ip");
            return Err(AdmissionError::DuplicateIp);
        }

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.client_queue_capacity);
        clients.insert(
            id,
            ClientEntry {
                ip,
                outbound_tx,
                dropped: 0,
                last_full_log: Instant::now() - LOG_THROTTLE,
            },
        );
        info!(
            transport = self.transport,
            client_id = id,
            %ip,
            clients = clients.len(),
            "client admitted"
        );

        Ok(ClientConn {
            id,
            ip,
            outbound_rx,
            inbound_tx: self.inbound_tx.clone(),
            quit_rx: self.quit_tx.subscribe(),
            broker: Arc::downgrade(self),
        })
    }

    /// Fans out broadcasts and forwards client responses until the broker quits.
    pub async fn run_loop(self: Arc<Self>) {
        let receivers = self.loop_rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(LoopReceivers {
            mut broadcast_rx,
            mut inbound_rx,
        }) = receivers
        else {
            warn!(transport = self.transport, "broker loop already started");
            return;
        };

        let mut quit_rx = self.quit_tx.subscribe();
        let mut broadcast_open = true;
        let mut last_response_full_log = Instant::now() - LOG_THROTTLE;
        info!(transport = self.transport, "broker loop started");

        loop {
            tokio::select! {
                biased;

                _ = quit_rx.wait_for(|quit| *quit) => break,

                frame = broadcast_rx.recv(), if broadcast_open => match frame {
                    Some(frame) => self.fan_out(frame),
                    None => {
                        // Producer is gone; keep serving client responses until quit.
                        debug!(transport = self.transport, "broadcast queue closed");
                        broadcast_open = false;
                    }
                },

                Some(inbound) = inbound_rx.recv() => {
                    self.forward_inbound(inbound, &mut last_response_full_log);
                }
            }
        }

        self.disconnect_all();
        info!(transport = self.transport, "broker loop exited");
    }

    /// Marks the broker as quit and disconnects every client.
    ///
    /// Returns true for the call that performed the shutdown; later calls are no-ops.
    pub fn quit(&self) -> bool {
        let first = self.quit_tx.send_if_modified(|quit| {
            if *quit {
                false
            } else {
                *quit = true;
                true
            }
        });
        if first {
            info!(transport = self.transport, "broker quitting");
            self.disconnect_all();
        }
        first
    }

    pub fn has_quit(&self) -> bool {
        *self.quit_tx.borrow()
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<u64, ClientEntry>> {
        // The registry has no invariant a panicking holder could leave half-updated.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, frame: Frame) {
        let mut clients = self.lock_clients();
        let mut gone = Vec::new();

        for (&client_id, entry) in clients.iter_mut() {
            match entry.outbound_tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped += 1;
                    if entry.last_full_log.elapsed() >= LOG_THROTTLE {
                        entry.last_full_log = Instant::now();
                        debug!(
                            transport = self.transport,
                            client_id,
                            dropped = entry.dropped,
                            "client queue full; dropping frame"
                        );
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(client_id),
            }
        }

        for client_id in gone {
            if let Some(entry) = clients.remove(&client_id) {
                info!(transport = self.transport, client_id, ip = %entry.ip, "client gone");
            }
        }
    }

    fn forward_inbound(&self, inbound: Inbound, last_full_log: &mut Instant) {
        match self.response_tx.try_send(inbound.payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if last_full_log.elapsed() >= LOG_THROTTLE {
                    *last_full_log = Instant::now();
                    warn!(
                        transport = self.transport,
                        client_id = inbound.client_id,
                        "response queue full; dropping message"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(transport = self.transport, "response queue closed; dropping message");
            }
        }
    }

    fn unregister(&self, client_id: u64) {
        if let Some(entry) = self.lock_clients().remove(&client_id) {
            info!(
                transport = self.transport,
                client_id,
                ip = %entry.ip,
                dropped = entry.dropped,
                "client disconnected"
            );
        }
    }

    fn disconnect_all(&self) {
        // Dropping the entries drops each outbound sender, ending every client stream.
        let removed = std::mem::take(&mut *self.lock_clients());
        if !removed.is_empty() {
            info!(
                transport = self.transport,
                clients = removed.len(),
                "disconnected all clients"
            );
        }
    }
}

/// A transport's handle on one admitted client.
///
/// Dropping it unregisters the client from the broker.
pub struct ClientConn {
    id: u64,
    ip: IpAddr,
    outbound_rx: mpsc::Receiver<Frame>,
    inbound_tx: mpsc::Sender<Inbound>,
    quit_rx: watch::Receiver<bool>,
    broker: Weak<Broker>,
}

impl ClientConn {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Next frame to deliver to this client, in broadcast order.
    ///
    /// Returns `None` once the broker has dropped the client (quit or removal);
    /// the transport should then close the connection.
    pub async fn next_broadcast(&mut self) -> Option<Frame> {
        self.outbound_rx.recv().await
    }

    /// Resolves once the broker has quit (or is gone).
    ///
    /// Transports race their socket writes against this so a peer that stopped
    /// reading cannot keep the connection open after quit.
    pub async fn quit_signal(&self) {
        let mut quit_rx = self.quit_rx.clone();
        let _ = quit_rx.wait_for(|quit| *quit).await;
    }

    /// Hands bytes read from this client to the broker. Never waits.
    pub fn respond(&self, payload: Payload) -> PushOutcome {
        match self.inbound_tx.try_send(Inbound {
            client_id: self.id,
            payload,
        }) {
            Ok(()) => PushOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

impl Drop for ClientConn {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.unregister(self.id);
        }
    }
}
