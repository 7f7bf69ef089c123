//! Authoritative allow/deny lists
//!
//! The firewall only sees the [`AddressList`] trait. [`MemoryList`] keeps
//! everything in a concurrent map, [`FileList`] persists to a JSON file and
//! [`CachedList`] keeps a cache tier coherent with any list it wraps.
//!
//! Entries are parsed to [`IpAddr`], so `2001:DB8::1` and `2001:db8::1`
//! are the same entry and anything that is not an address is rejected.

use crate::cache::{CacheTiers, Tier};
use dashmap::DashMap;
use hostwall_common::{HostwallError, HostwallResult};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) fn parse_entry(ip: &str) -> Option<IpAddr> {
    ip.trim().parse().ok()
}

fn not_an_address(entry: &str) -> HostwallError {
    HostwallError::ListStore(format!("{entry:?} is not an IP address"))
}

/// Membership store for addresses
pub trait AddressList: Send + Sync {
    /// Check if `ip` is listed
    fn contains(&self, ip: &str) -> bool;

    /// List `ip`
    fn add(&self, ip: &str);

    /// Unlist `ip`
    fn remove(&self, ip: &str);

    /// True if backed purely by memory, false if mutations need I/O
    fn is_resident(&self) -> bool;
}

impl<L: AddressList + ?Sized> AddressList for Arc<L> {
    fn contains(&self, ip: &str) -> bool {
        (**self).contains(ip)
    }

    fn add(&self, ip: &str) {
        (**self).add(ip)
    }

    fn remove(&self, ip: &str) {
        (**self).remove(ip)
    }

    fn is_resident(&self) -> bool {
        (**self).is_resident()
    }
}

/// In-memory list
#[derive(Debug, Default)]
pub struct MemoryList {
    entries: DashMap<IpAddr, ()>,
}

impl MemoryList {
    /// Create empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from address strings, failing on the first non-address entry
    pub fn parse<I, S>(entries: I) -> HostwallResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            let addr = parse_entry(entry).ok_or_else(|| not_an_address(entry))?;
            list.entries.insert(addr, ());
        }
        Ok(list)
    }

    /// Number of listed addresses
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<IpAddr> for MemoryList {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|addr| (addr, ())).collect(),
        }
    }
}

impl AddressList for MemoryList {
    #[inline]
    fn contains(&self, ip: &str) -> bool {
        parse_entry(ip).is_some_and(|addr| self.entries.contains_key(&addr))
    }

    fn add(&self, ip: &str) {
        match parse_entry(ip) {
            Some(addr) => {
                self.entries.insert(addr, ());
            }
            None => tracing::warn!(%ip, "ignoring list entry that is not an IP address"),
        }
    }

    fn remove(&self, ip: &str) {
        if let Some(addr) = parse_entry(ip) {
            self.entries.remove(&addr);
        }
    }

    fn is_resident(&self) -> bool {
        true
    }
}

/// List persisted as a JSON array of addresses
///
/// Reads are served from memory; every mutation rewrites the file.
#[derive(Debug)]
pub struct FileList {
    path: PathBuf,
    entries: RwLock<BTreeSet<IpAddr>>,
}

impl FileList {
    /// Open a list file. A missing file is an empty list; an entry that is
    /// not an address fails the open.
    pub fn open(path: impl AsRef<Path>) -> HostwallResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<BTreeSet<IpAddr>>(&content).map_err(|e| {
                HostwallError::ListStore(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened list file");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Add and persist, reporting I/O failures
    pub fn try_add(&self, ip: &str) -> HostwallResult<()> {
        let addr = parse_entry(ip).ok_or_else(|| not_an_address(ip))?;
        let mut entries = self.entries.write();
        if entries.insert(addr) {
            self.persist(&entries)?;
        }
        Ok(())
    }

    /// Remove and persist, reporting I/O failures
    pub fn try_remove(&self, ip: &str) -> HostwallResult<()> {
        let Some(addr) = parse_entry(ip) else {
            return Ok(());
        };
        let mut entries = self.entries.write();
        if entries.remove(&addr) {
            self.persist(&entries)?;
        }
        Ok(())
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of listed addresses
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn persist(&self, entries: &BTreeSet<IpAddr>) -> HostwallResult<()> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| HostwallError::ListStore(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AddressList for FileList {
    #[inline]
    fn contains(&self, ip: &str) -> bool {
        parse_entry(ip).is_some_and(|addr| self.entries.read().contains(&addr))
    }

    fn add(&self, ip: &str) {
        if let Err(e) = self.try_add(ip) {
            tracing::warn!(
                path = %self.path.display(),
                %ip,
                error = %e,
                "failed to update list file"
            );
        }
    }

    fn remove(&self, ip: &str) {
        if let Err(e) = self.try_remove(ip) {
            tracing::warn!(
                path = %self.path.display(),
                %ip,
                error = %e,
                "failed to persist list removal"
            );
        }
    }

    fn is_resident(&self) -> bool {
        false
    }
}

/// List decorator keeping one cache tier coherent with the list
///
/// `add` writes the list, then caches the address in `tier`. `remove`
/// writes the list, then drops the address from `tier` before returning.
/// Both run under the address's stripe lock, so a slow-path lookup that
/// overlaps them cannot cache a stale answer.
pub struct CachedList<L> {
    inner: L,
    tiers: Arc<CacheTiers>,
    tier: Tier,
}

impl<L: AddressList> CachedList<L> {
    /// Wrap `inner`, mirroring mutations into `tier`
    pub fn new(inner: L, tiers: Arc<CacheTiers>, tier: Tier) -> Self {
        Self { inner, tiers, tier }
    }

    /// Wrapped list
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: AddressList> AddressList for CachedList<L> {
    #[inline]
    fn contains(&self, ip: &str) -> bool {
        self.inner.contains(ip)
    }

    fn add(&self, ip: &str) {
        let Some(addr) = parse_entry(ip) else {
            tracing::warn!(%ip, "ignoring list entry that is not an IP address");
            return;
        };
        let key = addr.to_string();
        let mut cached = self.tiers.lock(&key);
        self.inner.add(&key);
        if self.inner.contains(&key) {
            cached.insert(self.tier);
        }
    }

    fn remove(&self, ip: &str) {
        let key = parse_entry(ip).map_or_else(|| ip.to_string(), |addr| addr.to_string());
        let mut cached = self.tiers.lock(&key);
        self.inner.remove(&key);
        cached.delete(self.tier);
    }

    fn is_resident(&self) -> bool {
        self.inner.is_resident()
    }
}
