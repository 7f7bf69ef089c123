//! hostwall Dataplane - kernel queue to verdict
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                         QUEUE ADAPTER                              │
//! │                                                                    │
//! │  ┌────────────┐  recv   ┌─────────────┐  serve   ┌──────────────┐  │
//! │  │  NFQUEUE   │───────► │ PacketJob   │────────► │ WorkerPool   │  │
//! │  │ (netlink)  │         │ (id, bytes) │          │ LIFO idle    │  │
//! │  └─────▲──────┘         └─────┬───────┘          │ stack        │  │
//! │        │                      │ saturated        └──────┬───────┘  │
//! │        │                      ▼                         │ parse +  │
//! │        │               fallback verdict                 │ classify │
//! │        │                      │                         ▼          │
//! │        │   issue       ┌──────┴──────────────────────────────┐     │
//! │        └────────────── │        verdict channel (id, V)      │     │
//! │                        └─────────────────────────────────────┘     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The adapter thread alone touches the kernel socket. Workers never see
//! kernel handles, only header bytes and a pooled [`PacketRecord`].
//!
//! [`PacketRecord`]: hostwall_common::PacketRecord

#![warn(missing_docs)]

pub mod adapter;
pub mod clock;
pub mod nfqueue;
pub mod parse;
pub mod pool;
pub mod record_pool;

pub use adapter::{
    AdapterConfig, AdapterStats, FirewallHandler, KernelQueue, PacketJob, QueueAdapter,
    QueuedPacket,
};
pub use clock::{Clock, CoarseClock, ManualClock};
#[cfg(target_os = "linux")]
pub use nfqueue::NfQueue;
pub use nfqueue::QueueConfig;
pub use parse::{header_span, parse_ethernet_frame, parse_ip_packet, protocol_name, ParseError};
pub use pool::{JobHandler, OverflowPolicy, PoolConfig, PoolStats, ServeError, WorkerPool};
pub use record_pool::RecordPool;
