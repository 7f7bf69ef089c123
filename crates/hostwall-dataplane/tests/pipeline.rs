//! Queue-to-verdict pipeline over an in-memory kernel queue

use crossbeam::channel::{unbounded, Receiver, Sender};
use hostwall_common::{HostwallResult, Verdict};
use hostwall_dataplane::{
    AdapterConfig, KernelQueue, ManualClock, OverflowPolicy, PoolConfig, QueueAdapter, QueuedPacket,
};
use hostwall_policy::{
    CacheTiers, DefaultPolicy, Firewall, LocalAddrs, MemoryList, PolicyAction, RawRule, RuleEngine,
    Tier,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Packets arrive over a channel, verdicts leave over another
struct ChannelQueue {
    inbound: Receiver<QueuedPacket>,
    verdicts: Sender<(u32, Verdict)>,
}

impl KernelQueue for ChannelQueue {
    fn recv(&mut self) -> HostwallResult<Option<QueuedPacket>> {
        Ok(self.inbound.try_recv().ok())
    }

    fn issue(&mut self, id: u32, verdict: Verdict) -> HostwallResult<()> {
        let _ = self.verdicts.send((id, verdict));
        Ok(())
    }
}

fn ipv4_tcp(id: u32, src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> QueuedPacket {
    let mut data = vec![0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00];
    data.extend_from_slice(&src);
    data.extend_from_slice(&dst);
    data.extend_from_slice(&src_port.to_be_bytes());
    data.extend_from_slice(&dst_port.to_be_bytes());
    data.extend_from_slice(&[0u8; 16]);
    QueuedPacket { id, data }
}

fn firewall(deny: &[&str]) -> Arc<Firewall> {
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
        Arc::new(MemoryList::parse(deny).unwrap()),
        Arc::new(MemoryList::new()),
        engine,
    ))
}

#[test]
fn ssh_exception_end_to_end() {
    let (packet_tx, packet_rx) = unbounded();
    let (verdict_tx, verdict_rx) = unbounded();
    let fw = firewall(&["203.0.113.9"]);

    let mut adapter = QueueAdapter::new(
        ChannelQueue { inbound: packet_rx, verdicts: verdict_tx },
        fw.clone(),
        PoolConfig {
            max_workers: 8,
            max_idle_secs: 10,
            reap_interval_secs: 3600,
            overflow: OverflowPolicy::Wait { timeout_ms: 10_000 },
        },
        AdapterConfig::default(),
        Arc::new(ManualClock::new()),
    )
    .unwrap();
    let shutdown = adapter.shutdown_handle();
    let runner = std::thread::spawn(move || adapter.run());

    packet_tx.send(ipv4_tcp(1, [192, 168, 1, 5], 4444, [10, 0, 0, 1], 22)).unwrap();
    packet_tx.send(ipv4_tcp(2, [192, 168, 1, 6], 4444, [10, 0, 0, 1], 22)).unwrap();
    packet_tx.send(ipv4_tcp(3, [203, 0, 113, 9], 4444, [10, 0, 0, 1], 22)).unwrap();
    // Outbound falls to the permissive outbound default
    packet_tx.send(ipv4_tcp(4, [10, 0, 0, 1], 5000, [8, 8, 8, 8], 53)).unwrap();
    // Unparseable bytes still get a verdict (inbound default)
    packet_tx.send(QueuedPacket { id: 5, data: vec![0xFF; 3] }).unwrap();

    let mut verdicts: Vec<(u32, Verdict)> = (0..5)
        .map(|_| verdict_rx.recv_timeout(Duration::from_secs(10)).unwrap())
        .collect();
    verdicts.sort_unstable_by_key(|(id, _)| *id);

    shutdown.store(true, Ordering::Release);
    let stats = runner.join().unwrap().unwrap();

    assert_eq!(
        verdicts,
        vec![
            (1, Verdict::Accept),
            (2, Verdict::Drop),
            (3, Verdict::Drop),
            (4, Verdict::Accept),
            (5, Verdict::Drop),
        ]
    );
    assert_eq!(stats.received, 5);
    assert_eq!(stats.fallbacks, 0);
    assert!(fw.tiers().exists(Tier::Deny, "203.0.113.9"));
}

#[test]
fn shutdown_with_idle_queue() {
    let (_packet_tx, packet_rx) = unbounded();
    let (verdict_tx, _verdict_rx) = unbounded();

    let mut adapter = QueueAdapter::new(
        ChannelQueue { inbound: packet_rx, verdicts: verdict_tx },
        firewall(&[]),
        PoolConfig::default(),
        AdapterConfig::default(),
        Arc::new(ManualClock::new()),
    )
    .unwrap();
    let shutdown = adapter.shutdown_handle();
    let runner = std::thread::spawn(move || adapter.run());

    std::thread::sleep(Duration::from_millis(20));
    shutdown.store(true, Ordering::Release);
    let stats = runner.join().unwrap().unwrap();
    assert_eq!(stats.received, 0);
}
