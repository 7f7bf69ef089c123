//! Packet record reuse pool
//!
//! Lock-free free list of [`PacketRecord`]s so steady-state traffic does not
//! allocate address strings per packet. A record is owned by exactly one job
//! between `acquire` and `release`.

use crossbeam::queue::ArrayQueue;
use hostwall_common::{AtomicCounter, PacketRecord};

/// Bounded free list of packet records
pub struct RecordPool {
    free: ArrayQueue<PacketRecord>,
    /// Records handed out when the free list was empty
    allocated: AtomicCounter,
    /// Records handed out from the free list
    reused: AtomicCounter,
}

impl RecordPool {
    /// Create pool retaining at most `capacity` idle records
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicCounter::new(0),
            reused: AtomicCounter::new(0),
        }
    }

    /// Take a cleared record
    #[inline]
    pub fn acquire(&self) -> PacketRecord {
        match self.free.pop() {
            Some(rec) => {
                self.reused.inc();
                rec
            }
            None => {
                self.allocated.inc();
                PacketRecord::default()
            }
        }
    }

    /// Return a record. Dropped if the free list is full.
    #[inline]
    pub fn release(&self, mut rec: PacketRecord) {
        rec.reset();
        let _ = self.free.push(rec);
    }

    /// Idle records
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Fresh allocations so far
    pub fn allocated(&self) -> u64 {
        self.allocated.get()
    }

    /// Reuses so far
    pub fn reused(&self) -> u64 {
        self.reused.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reuse() {
        let pool = RecordPool::new(2);

        let rec = pool.acquire();
        assert_eq!(pool.allocated(), 1);

        let mut rec = rec;
        rec.src_ip.push_str("192.168.1.5");
        rec.dst_port = 22;
        pool.release(rec);
        assert_eq!(pool.available(), 1);

        let rec = pool.acquire();
        assert_eq!(rec, PacketRecord::default());
        assert!(rec.src_ip.capacity() >= "192.168.1.5".len());
        assert_eq!(pool.reused(), 1);
    }

    #[test]
    fn test_release_beyond_capacity() {
        let pool = RecordPool::new(1);
        pool.release(PacketRecord::default());
        pool.release(PacketRecord::default());
        assert_eq!(pool.available(), 1);
    }
}
