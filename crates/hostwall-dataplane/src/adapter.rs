//! Queue adapter
//!
//! Owns the kernel queue on a single thread. Packets are dispatched to the
//! worker pool; workers classify and send the verdict back over a channel,
//! and the adapter issues it to the kernel. Every received packet gets
//! exactly one verdict, including when the pool refuses the job.

use crate::clock::Clock;
use crate::parse::parse_ip_packet;
use crate::pool::{JobHandler, PoolConfig, PoolStats, WorkerPool};
use crate::record_pool::RecordPool;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use hostwall_common::{AtomicCounter, HostwallResult, PacketRecord, Verdict};
use hostwall_policy::Firewall;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A packet held by the kernel until its verdict is issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    /// Kernel packet id, echoed back with the verdict
    pub id: u32,
    /// Network-layer bytes (at least the headers)
    pub data: Vec<u8>,
}

/// Kernel packet queue boundary
pub trait KernelQueue {
    /// Next packet, or `None` when nothing is pending. Must not block.
    fn recv(&mut self) -> HostwallResult<Option<QueuedPacket>>;

    /// Resolve a packet previously returned by `recv`
    fn issue(&mut self, id: u32, verdict: Verdict) -> HostwallResult<()>;
}

/// Adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// How long to wait for verdicts when the kernel queue is empty
    pub idle_poll_ms: u64,
    /// Verdict for packets the pool refuses
    pub saturation_verdict: Verdict,
    /// Upper bound on waiting for busy workers at shutdown
    pub drain_timeout_ms: u64,
    /// Idle packet records kept for reuse
    pub record_pool_size: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 5,
            saturation_verdict: Verdict::Drop,
            drain_timeout_ms: 5000,
            record_pool_size: 4096,
        }
    }
}

/// Unit of work carried to a pool worker
pub struct PacketJob {
    /// The queued packet
    pub packet: QueuedPacket,
    /// Scratch record owned by this job
    pub record: PacketRecord,
}

/// Pool handler: parse, classify, report the verdict
pub struct FirewallHandler {
    firewall: Arc<Firewall>,
    records: Arc<RecordPool>,
    verdicts: Sender<(u32, Verdict)>,
}

impl FirewallHandler {
    /// Create handler reporting verdicts on `verdicts`
    pub fn new(
        firewall: Arc<Firewall>,
        records: Arc<RecordPool>,
        verdicts: Sender<(u32, Verdict)>,
    ) -> Self {
        Self { firewall, records, verdicts }
    }
}

impl JobHandler<PacketJob> for FirewallHandler {
    fn handle(&self, job: PacketJob) {
        let PacketJob { packet, mut record } = job;

        if let Err(e) = parse_ip_packet(&packet.data, &mut record) {
            tracing::trace!(id = packet.id, error = %e, "unparsed packet");
        }
        let verdict = self.firewall.classify(&record);
        self.records.release(record);

        if self.verdicts.send((packet.id, verdict)).is_err() {
            tracing::warn!(id = packet.id, "verdict channel closed");
        }
    }
}

/// Drives a [`KernelQueue`] through the worker pool
pub struct QueueAdapter<Q: KernelQueue> {
    queue: Q,
    pool: WorkerPool<PacketJob>,
    records: Arc<RecordPool>,
    verdicts: Receiver<(u32, Verdict)>,
    config: AdapterConfig,
    shutdown: Arc<AtomicBool>,

    // Metrics
    received: AtomicCounter,
    accepted: AtomicCounter,
    dropped: AtomicCounter,
    fallbacks: AtomicCounter,
    issue_errors: AtomicCounter,
}

impl<Q: KernelQueue> QueueAdapter<Q> {
    /// Wire a queue to a firewall through a new worker pool
    pub fn new(
        queue: Q,
        firewall: Arc<Firewall>,
        pool_config: PoolConfig,
        config: AdapterConfig,
        clock: Arc<dyn Clock>,
    ) -> HostwallResult<Self> {
        let records = Arc::new(RecordPool::new(config.record_pool_size));
        let (tx, verdicts) = unbounded();
        let handler = FirewallHandler::new(firewall, records.clone(), tx);
        let pool = WorkerPool::start(pool_config, handler, clock)?;

        Ok(Self {
            queue,
            pool,
            records,
            verdicts,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            received: AtomicCounter::new(0),
            accepted: AtomicCounter::new(0),
            dropped: AtomicCounter::new(0),
            fallbacks: AtomicCounter::new(0),
            issue_errors: AtomicCounter::new(0),
        })
    }

    /// Flag that stops [`run`](Self::run) when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Pump packets until shutdown, then drain
    ///
    /// A kernel receive error ends the loop; pending verdicts are still
    /// issued before the error is returned.
    pub fn run(&mut self) -> HostwallResult<AdapterStats> {
        tracing::info!("queue adapter running");
        let idle_poll = Duration::from_millis(self.config.idle_poll_ms.max(1));

        let mut outcome = Ok(());
        while !self.shutdown.load(Ordering::Acquire) {
            self.flush_verdicts();

            match self.queue.recv() {
                Ok(Some(packet)) => self.dispatch(packet),
                Ok(None) => match self.verdicts.recv_timeout(idle_poll) {
                    Ok((id, verdict)) => self.issue(id, verdict),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                Err(e) => {
                    tracing::error!(error = %e, "kernel queue receive failed");
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.drain();
        outcome.map(|()| self.stats())
    }

    fn dispatch(&mut self, packet: QueuedPacket) {
        self.received.inc();
        let job = PacketJob {
            packet,
            record: self.records.acquire(),
        };

        if let Err(e) = self.pool.serve(job) {
            let verdict = self.config.saturation_verdict;
            tracing::warn!(
                error = %e,
                %verdict,
                "worker pool refused packet, applying fallback verdict"
            );
            let job = e.into_job();
            self.records.release(job.record);
            self.fallbacks.inc();
            self.issue(job.packet.id, verdict);
        }
    }

    fn flush_verdicts(&mut self) {
        while let Ok((id, verdict)) = self.verdicts.try_recv() {
            self.issue(id, verdict);
        }
    }

    fn issue(&mut self, id: u32, verdict: Verdict) {
        match verdict {
            Verdict::Accept => self.accepted.inc(),
            Verdict::Drop => self.dropped.inc(),
        };
        if let Err(e) = self.queue.issue(id, verdict) {
            self.issue_errors.inc();
            tracing::warn!(id, %verdict, error = %e, "failed to issue verdict");
        }
    }

    fn drain(&mut self) {
        tracing::info!("queue adapter draining");
        self.pool.stop();
        let drained = self
            .pool
            .wait_for_drain(Duration::from_millis(self.config.drain_timeout_ms));
        self.flush_verdicts();

        if !drained {
            tracing::warn!(
                live = self.pool.stats().live,
                "workers still busy after drain timeout"
            );
        }
        tracing::info!(stats = ?self.stats(), "queue adapter stopped");
    }

    /// Underlying queue
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Get adapter statistics
    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            received: self.received.get(),
            accepted: self.accepted.get(),
            dropped: self.dropped.get(),
            fallbacks: self.fallbacks.get(),
            issue_errors: self.issue_errors.get(),
        }
    }
}

/// Adapter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdapterStats {
    /// Packets read from the kernel
    pub received: u64,
    /// ACCEPT verdicts issued
    pub accepted: u64,
    /// DROP verdicts issued
    pub dropped: u64,
    /// Verdicts issued without classification because the pool refused
    pub fallbacks: u64,
    /// Verdicts the kernel rejected
    pub issue_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pool::OverflowPolicy;
    use hostwall_policy::{
        CacheTiers, DefaultPolicy, LocalAddrs, MemoryList, PolicyAction, RawRule, RuleEngine,
    };
    use std::collections::{HashMap, VecDeque};

    /// Queue fed from a list, recording issued verdicts
    struct ScriptedQueue {
        pending: VecDeque<QueuedPacket>,
        issued: HashMap<u32, Verdict>,
        shutdown_when_done: Option<(usize, Arc<AtomicBool>)>,
    }

    impl KernelQueue for ScriptedQueue {
        fn recv(&mut self) -> HostwallResult<Option<QueuedPacket>> {
            Ok(self.pending.pop_front())
        }

        fn issue(&mut self, id: u32, verdict: Verdict) -> HostwallResult<()> {
            assert!(self.issued.insert(id, verdict).is_none(), "packet {id} resolved twice");
            if let Some((expected, flag)) = &self.shutdown_when_done {
                if self.issued.len() == *expected {
                    flag.store(true, Ordering::Release);
                }
            }
            Ok(())
        }
    }

    fn tcp(id: u32, src: [u8; 4], dst_port: u16) -> QueuedPacket {
        let mut data = vec![
            0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00,
        ];
        data.extend_from_slice(&src);
        data.extend_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(&4444u16.to_be_bytes());
        data.extend_from_slice(&dst_port.to_be_bytes());
        data.extend_from_slice(&[0u8; 16]);
        QueuedPacket { id, data }
    }

    fn firewall() -> Arc<Firewall> {
        let mut local = LocalAddrs::new();
        local.insert("10.0.0.1");
        let engine = RuleEngine::from_raw(
            &[RawRule::new(0, "192.168.1.5", "any", "any", "22")],
            DefaultPolicy::new(PolicyAction::Deny, PolicyAction::Allow),
            Arc::new(local),
        )
        .unwrap();
        Arc::new(Firewall::new(
            Arc::new(CacheTiers::default()),
            Arc::new(MemoryList::new()),
            Arc::new(MemoryList::new()),
            engine,
        ))
    }

    fn pool_config(max_workers: usize, overflow: OverflowPolicy) -> PoolConfig {
        PoolConfig {
            max_workers,
            max_idle_secs: 10,
            reap_interval_secs: 3600,
            overflow,
        }
    }

    #[test]
    fn test_every_packet_gets_a_verdict() {
        let packets: VecDeque<_> = (0..200u32)
            .map(|id| {
                let src = if id % 2 == 0 { [192, 168, 1, 5] } else { [192, 168, 1, 6] };
                tcp(id, src, 22)
            })
            .collect();

        let queue = ScriptedQueue {
            pending: packets,
            issued: HashMap::new(),
            shutdown_when_done: None,
        };
        let mut adapter = QueueAdapter::new(
            queue,
            firewall(),
            pool_config(4, OverflowPolicy::Wait { timeout_ms: 10_000 }),
            AdapterConfig::default(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();

        let flag = adapter.shutdown_handle();
        adapter.queue.shutdown_when_done = Some((200, flag));
        let stats = adapter.run().unwrap();

        assert_eq!(stats.received, 200);
        assert_eq!(stats.fallbacks, 0);
        assert_eq!((stats.accepted, stats.dropped), (100, 100));

        let issued = &adapter.queue().issued;
        assert_eq!(issued.len(), 200);
        for (id, verdict) in issued {
            let expected = if id % 2 == 0 { Verdict::Accept } else { Verdict::Drop };
            assert_eq!(*verdict, expected, "packet {id}");
        }
    }

    #[test]
    fn test_saturation_falls_back() {
        let queue = ScriptedQueue {
            pending: (0..50).map(|id| tcp(id, [192, 168, 1, 5], 22)).collect(),
            issued: HashMap::new(),
            shutdown_when_done: None,
        };
        let config = AdapterConfig {
            saturation_verdict: Verdict::Drop,
            ..AdapterConfig::default()
        };
        let mut adapter = QueueAdapter::new(
            queue,
            firewall(),
            pool_config(0, OverflowPolicy::Reject),
            config,
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        let flag = adapter.shutdown_handle();
        adapter.queue.shutdown_when_done = Some((50, flag));

        let stats = adapter.run().unwrap();
        assert_eq!(stats.fallbacks, 50);
        assert_eq!(stats.dropped, 50);
        assert!(adapter.queue().issued.values().all(|v| *v == Verdict::Drop));
        assert_eq!(adapter.pool_stats().rejected, 50);
    }

    #[test]
    fn test_receive_error_still_drains() {
        struct Failing {
            sent: bool,
            issued: Vec<u32>,
        }
        impl KernelQueue for Failing {
            fn recv(&mut self) -> HostwallResult<Option<QueuedPacket>> {
                if !self.sent {
                    self.sent = true;
                    return Ok(Some(tcp(7, [192, 168, 1, 5], 22)));
                }
                Err(hostwall_common::HostwallError::Queue {
                    queue: 0,
                    reason: "socket closed".into(),
                })
            }
            fn issue(&mut self, id: u32, _: Verdict) -> HostwallResult<()> {
                self.issued.push(id);
                Ok(())
            }
        }

        let mut adapter = QueueAdapter::new(
            Failing { sent: false, issued: Vec::new() },
            firewall(),
            pool_config(2, OverflowPolicy::Reject),
            AdapterConfig::default(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();

        assert!(adapter.run().is_err());
        assert_eq!(adapter.queue().issued, vec![7]);
    }
}
