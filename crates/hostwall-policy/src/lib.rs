//! hostwall Policy - packet classification
//!
//! Decides ACCEPT or DROP for one [`PacketRecord`] by walking the cache
//! tiers, the authoritative lists and finally the rule table.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Firewall::decide                          │
//! │                                                                  │
//! │  ┌────────────┐ hit  ┌────────────┐ hit  ┌──────────────────┐    │
//! │  │ deny tier  │────► │   DROP     │      │ undetermined tier│──┐ │
//! │  │ (src, dst) │      └────────────┘      └──────────────────┘  │ │
//! │  └─────┬──────┘                                 ▲              │ │
//! │        │ miss   ┌────────────┐ hit  ┌────────┐  │ miss         │ │
//! │        └──────► │ allow tier │────► │ ACCEPT │  │              │ │
//! │                 └─────┬──────┘      └────────┘  │              │ │
//! │                       │ miss                    │              ▼ │
//! │                       ▼                         │    ┌─────────┐ │
//! │           ┌──────────────────────┐  no match    │    │  Rule   │ │
//! │           │ deny list / allow    │──────────────┴──► │ Engine  │ │
//! │           │ list (slow path)     │                   └─────────┘ │
//! │           └──────────────────────┘                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rules are exceptions to the per-direction default policy: under a
//! permissive default a matching rule drops, under a blocking default a
//! matching rule accepts.

#![warn(missing_docs)]

pub mod cache;
pub mod engine;
pub mod firewall;
pub mod list;
pub mod local;
pub mod policy;
pub mod rule;
pub mod validator;

pub use cache::{AddrGuard, CacheConfig, CacheTiers, Tier};
pub use engine::{RuleEngine, RuleEngineStats, RuleOutcome};
pub use firewall::{Decision, DecisionPath, Firewall, FirewallStats};
pub use list::{AddressList, CachedList, FileList, MemoryList};
pub use local::LocalAddrs;
pub use policy::{DefaultPolicy, PolicyAction};
pub use rule::{RawRule, Rule, RuleError};
pub use validator::{AddrValidator, PortValidator, Validator, Zone, ZoneValidator};

pub use hostwall_common::{Direction, HostwallError, HostwallResult, PacketRecord, Verdict};
