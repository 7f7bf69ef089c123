//! hostwall Common - shared leaf types for the verdict pipeline
//!
//! This crate holds the types every other hostwall crate agrees on:
//! - [`PacketRecord`]: fields extracted from one queued packet
//! - [`Verdict`] and [`Direction`]: the outcome and orientation of a packet
//! - [`HostwallError`]: the workspace error type
//! - [`AtomicCounter`]: lock-free counters for statistics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod packet;

pub use error::*;
pub use packet::*;

use std::sync::atomic::{AtomicU64, Ordering};

/// High-performance counter for lock-free metrics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
