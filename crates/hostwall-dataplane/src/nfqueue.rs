//! Linux NFQUEUE binding
//!
//! Packets stay owned by this thread until their verdict is issued; workers
//! only ever see a copy of the header bytes the parser reads.

use serde::{Deserialize, Serialize};

#[cfg(target_os = "linux")]
use crate::adapter::{KernelQueue, QueuedPacket};
#[cfg(target_os = "linux")]
use hostwall_common::{HostwallError, HostwallResult, Verdict};
#[cfg(target_os = "linux")]
use std::{collections::HashMap, io};

/// Kernel queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// NFQUEUE number (`iptables ... -j NFQUEUE --queue-num N`)
    pub queue_num: u16,
    /// Kernel-side queue length
    pub max_len: u32,
    /// Let the kernel accept packets when the queue overflows
    pub fail_open: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_num: 0,
            max_len: 1024,
            fail_open: false,
        }
    }
}

/// NFQUEUE socket bound to one queue number
#[cfg(target_os = "linux")]
pub struct NfQueue {
    queue: nfq::Queue,
    queue_num: u16,
    pending: HashMap<u32, nfq::Message>,
}

#[cfg(target_os = "linux")]
impl NfQueue {
    /// Open netlink socket and bind the queue
    pub fn open(config: &QueueConfig) -> HostwallResult<Self> {
        let queue_num = config.queue_num;
        let err = |step: &str, e: io::Error| HostwallError::Queue {
            queue: queue_num,
            reason: format!("{step}: {e}"),
        };

        let mut queue = nfq::Queue::open().map_err(|e| err("open", e))?;
        queue.bind(queue_num).map_err(|e| err("bind", e))?;
        queue
            .set_queue_max_len(queue_num, config.max_len)
            .map_err(|e| err("set queue length", e))?;
        queue
            .set_fail_open(queue_num, config.fail_open)
            .map_err(|e| err("set fail-open", e))?;
        queue.set_nonblocking(true);

        tracing::info!(
            queue = queue_num,
            max_len = config.max_len,
            fail_open = config.fail_open,
            "NFQUEUE bound"
        );

        Ok(Self {
            queue,
            queue_num,
            pending: HashMap::new(),
        })
    }

    /// Packets awaiting a verdict
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(target_os = "linux")]
impl KernelQueue for NfQueue {
    fn recv(&mut self) -> HostwallResult<Option<QueuedPacket>> {
        match self.queue.recv() {
            Ok(msg) => {
                let id = msg.get_packet_id();
                let payload = msg.get_payload();
                let data = payload[..crate::parse::header_span(payload)].to_vec();
                self.pending.insert(id, msg);
                Ok(Some(QueuedPacket { id, data }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // ENOBUFS: kernel dropped messages because we fell behind
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                tracing::warn!(queue = self.queue_num, "netlink receive buffer overrun");
                Ok(None)
            }
            Err(e) => Err(HostwallError::Queue {
                queue: self.queue_num,
                reason: format!("recv: {e}"),
            }),
        }
    }

    fn issue(&mut self, id: u32, verdict: Verdict) -> HostwallResult<()> {
        let Some(mut msg) = self.pending.remove(&id) else {
            return Err(HostwallError::Queue {
                queue: self.queue_num,
                reason: format!("no pending packet {id}"),
            });
        };
        msg.set_verdict(match verdict {
            Verdict::Accept => nfq::Verdict::Accept,
            Verdict::Drop => nfq::Verdict::Drop,
        });
        self.queue.verdict(msg).map_err(|e| HostwallError::Queue {
            queue: self.queue_num,
            reason: format!("verdict: {e}"),
        })
    }
}

#[cfg(target_os = "linux")]
impl Drop for NfQueue {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                queue = self.queue_num,
                pending = self.pending.len(),
                "closing queue with unresolved packets"
            );
        }
        if let Err(e) = self.queue.unbind(self.queue_num) {
            tracing::debug!(queue = self.queue_num, error = %e, "unbind failed");
        }
    }
}
