//! Short-lived cache of directory listings.
//!
//! Entries are replaced or dropped whole, so a racing insert and
//! invalidate on one path leave either the old listing, the new one or
//! nothing. Expired listings are never served; the memory they hold is
//! reclaimed by an occasional sweep, see [`ListingCache::maybe_sweep`].

use flurry::HashMap;
use rand::Rng;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    listing::Entry,
    path::{Target, VirtualPath},
    utils,
};

/// Identifies one listing: a directory as seen by one user
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub user: Option<String>,
    pub target: Target,
    pub path: VirtualPath,
}

impl CacheKey {
    pub fn new(user: Option<&str>, target: &Target, path: &VirtualPath) -> Self {
        Self {
            user: user.map(ToOwned::to_owned),
            target: target.clone(),
            path: path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedListing {
    entries: Arc<[Entry]>,
    fetched: Instant,
}

pub struct ListingCache {
    listings: HashMap<CacheKey, CachedListing>,
    max_age: Duration,
    sweep_period: u64,
    sweep_chance: u32,
}

impl ListingCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            listings: HashMap::new(),
            max_age,
            sweep_period: 5,
            sweep_chance: 10,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_period: config.sweep_period.max(1),
            sweep_chance: config.sweep_chance.max(1),
            ..Self::new(config.cache_max_age())
        }
    }

    fn is_fresh(&self, listing: &CachedListing) -> bool {
        listing.fetched.elapsed() < self.max_age
    }

    /// The cached listing for `key`, unless it is missing or too old
    pub fn get(&self, key: &CacheKey) -> Option<Arc<[Entry]>> {
        let listings = self.listings.pin();
        listings
            .get(key)
            .filter(|listing| self.is_fresh(listing))
            .map(|listing| listing.entries.clone())
    }

    pub fn put(&self, key: CacheKey, entries: Vec<Entry>) -> Arc<[Entry]> {
        let entries: Arc<[Entry]> = entries.into();
        let _ = self.listings.pin().insert(
            key,
            CachedListing {
                entries: entries.clone(),
                fetched: Instant::now(),
            },
        );
        entries
    }

    /// Drops the listing for `key`; returns whether one was cached
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.listings.pin().remove(key).is_some();
        if removed {
            trace!("listing cache: invalidated {}", key.path);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired listing, returns how many were dropped
    pub fn sweep(&self) -> usize {
        let before = self.listings.len();
        self.listings
            .pin()
            .retain(|_, listing| listing.fetched.elapsed() < self.max_age);
        let dropped = before.saturating_sub(self.listings.len());
        debug!("listing cache: swept {} stale listings", dropped);
        dropped
    }

    fn sweep_due<R: Rng>(&self, unix_secs: u64, rng: &mut R) -> bool {
        unix_secs % self.sweep_period == 0 && rng.random_ratio(1, self.sweep_chance)
    }

    /// Starts a [`sweep`](Self::sweep) on a task of its own every once in
    /// a while; returns whether one was started.
    ///
    /// Only in seconds divisible by the sweep period, and then only for a
    /// random fraction of the callers, so that a burst of requests does
    /// not turn into a burst of sweeps. Must be called within a tokio
    /// runtime.
    pub fn maybe_sweep(self: &Arc<Self>) -> bool {
        let unix_secs = u64::try_from(utils::unix_now()).unwrap_or(0);

        if !self.sweep_due(unix_secs, &mut rand::rng()) {
            return false;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            cache.sweep();
        });
        true
    }
}
