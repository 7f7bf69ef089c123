//! Classification cache tiers
//!
//! Three bounded caches keyed by address: deny, allow and undetermined.
//! Membership is the only signal. Entries are advisory projections of the
//! authoritative lists and age out by capacity (TinyLFU/LRU) and TTL.
//!
//! Every address hashes to a mutation stripe carrying a generation counter.
//! Authoritative changes ([`CacheTiers::insert`], [`CacheTiers::delete`],
//! [`AddrGuard`]) advance it. A cache fill from a list lookup
//! ([`CacheTiers::fill`]) only lands if the generation it read before the
//! lookup is still current.

use moka::sync::Cache;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

const MUTATION_STRIPES: usize = 64;

/// Cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Known-blocked addresses
    Deny,
    /// Known-allowed addresses
    Allow,
    /// Addresses that must go through the rule engine
    Undetermined,
}

impl Tier {
    /// All tiers
    pub const ALL: [Tier; 3] = [Tier::Deny, Tier::Allow, Tier::Undetermined];
}

/// Per-tier bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries per tier
    pub capacity: u64,
    /// Time-to-live of an entry in seconds (None = capacity bound only)
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 65536,
            ttl_secs: Some(300),
        }
    }
}

/// The three classification tiers
///
/// Lookups are lock-free. Mutations take a striped lock on the address so
/// that an address is never present in two tiers at once.
pub struct CacheTiers {
    deny: Cache<String, ()>,
    allow: Cache<String, ()>,
    undetermined: Cache<String, ()>,
    // Generation per stripe
    stripes: Vec<Mutex<u64>>,
}

/// One address held under its stripe lock
///
/// List decorators mutate the list and the tier through this guard so the
/// pair is atomic with respect to cache fills.
pub struct AddrGuard<'a> {
    tiers: &'a CacheTiers,
    ip: &'a str,
    generation: MutexGuard<'a, u64>,
}

impl AddrGuard<'_> {
    /// Cache the address in `tier`, removing it from the other tiers
    pub fn insert(&mut self, tier: Tier) {
        if self.ip.is_empty() {
            return;
        }
        self.tiers.place(tier, self.ip);
        self.advance();
    }

    /// Remove the address from `tier`
    pub fn delete(&mut self, tier: Tier) {
        self.tiers.tier(tier).invalidate(self.ip);
        self.advance();
    }

    fn advance(&mut self) {
        *self.generation = self.generation.wrapping_add(1);
    }
}

impl CacheTiers {
    /// Create tiers with the given bounds
    pub fn new(config: &CacheConfig) -> Self {
        let build = || -> Cache<String, ()> {
            let builder = Cache::builder().max_capacity(config.capacity);
            match config.ttl_secs {
                Some(secs) => builder.time_to_live(Duration::from_secs(secs)).build(),
                None => builder.build(),
            }
        };

        Self {
            deny: build(),
            allow: build(),
            undetermined: build(),
            stripes: (0..MUTATION_STRIPES).map(|_| Mutex::new(0)).collect(),
        }
    }

    #[inline(always)]
    fn tier(&self, tier: Tier) -> &Cache<String, ()> {
        match tier {
            Tier::Deny => &self.deny,
            Tier::Allow => &self.allow,
            Tier::Undetermined => &self.undetermined,
        }
    }

    fn stripe(&self, ip: &str) -> &Mutex<u64> {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % self.stripes.len()]
    }

    /// Check if `ip` is cached in `tier`
    #[inline]
    pub fn exists(&self, tier: Tier, ip: &str) -> bool {
        self.tier(tier).contains_key(ip)
    }

    /// Tier currently holding `ip`
    pub fn lookup(&self, ip: &str) -> Option<Tier> {
        Tier::ALL.into_iter().find(|t| self.exists(*t, ip))
    }

    // Caller holds the stripe lock
    fn place(&self, tier: Tier, ip: &str) {
        for other in Tier::ALL {
            if other != tier {
                self.tier(other).invalidate(ip);
            }
        }
        self.tier(tier).insert(ip.to_string(), ());
    }

    /// Lock the stripe of `ip`
    pub fn lock<'a>(&'a self, ip: &'a str) -> AddrGuard<'a> {
        AddrGuard {
            tiers: self,
            ip,
            generation: self.stripe(ip).lock(),
        }
    }

    /// Current generation of the stripe holding `ip`
    pub fn generation(&self, ip: &str) -> u64 {
        *self.stripe(ip).lock()
    }

    /// Cache `ip` in `tier`, removing it from the other tiers
    pub fn insert(&self, tier: Tier, ip: &str) {
        self.lock(ip).insert(tier);
    }

    /// Cache a list lookup result.
    ///
    /// Lands only if the stripe is still at `generation`, so a list mutation
    /// that raced the lookup wins. Never demotes a deny entry. Returns false
    /// when refused.
    pub fn fill(&self, tier: Tier, ip: &str, generation: u64) -> bool {
        if ip.is_empty() {
            return true;
        }
        let current = self.stripe(ip).lock();
        if *current != generation {
            return false;
        }
        if tier != Tier::Deny && self.deny.contains_key(ip) {
            return false;
        }
        self.place(tier, ip);
        true
    }

    /// Cache `ip` as undetermined unless a decisive tier already holds it.
    /// Returns true if the address is undetermined afterwards.
    pub fn insert_undetermined(&self, ip: &str) -> bool {
        if ip.is_empty() {
            return false;
        }
        let _guard = self.stripe(ip).lock();
        if self.deny.contains_key(ip) || self.allow.contains_key(ip) {
            return false;
        }
        self.undetermined.insert(ip.to_string(), ());
        true
    }

    /// Remove `ip` from `tier`
    pub fn delete(&self, tier: Tier, ip: &str) {
        self.lock(ip).delete(tier);
    }

    /// Remove `ip` from every tier
    pub fn forget(&self, ip: &str) {
        let mut addr = self.lock(ip);
        for tier in Tier::ALL {
            addr.delete(tier);
        }
    }

    /// Approximate entry count of a tier
    pub fn len(&self, tier: Tier) -> u64 {
        self.tier(tier).entry_count()
    }

    /// Apply pending evictions so counts are exact
    pub fn sync(&self) {
        for tier in Tier::ALL {
            self.tier(tier).run_pending_tasks();
        }
    }

    /// Clear all tiers
    pub fn clear(&self) {
        for tier in Tier::ALL {
            self.tier(tier).invalidate_all();
        }
        for stripe in &self.stripes {
            let mut generation = stripe.lock();
            *generation = generation.wrapping_add(1);
        }
    }
}

impl Default for CacheTiers {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
