//! Per-site cache of extracted treatment events.
//!
//! Writers that populate the cache from a slow fetch take a [`RefreshTicket`]
//! before fetching, which drops the current entry, and hand it back with the
//! result. Any `put`, `invalidate`, new refresh or completed refresh in
//! between bumps the slot generation, and the late result is discarded
//! instead of overwriting newer state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sitewatch_logs::TreatmentEvent;
use tracing::debug;

/// Events cached for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEvents {
    /// Events, newest first.
    pub events: Vec<TreatmentEvent>,
    /// When the events were stored.
    pub stored_at: DateTime<Utc>,
}

/// Proof that a refresh was started against a particular cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    site_id: String,
    generation: u64,
}

impl RefreshTicket {
    /// The site being refreshed.
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }
}

/// Counters describing cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Sites with cached events.
    pub entries: usize,
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Refresh results dropped because the slot changed underneath them.
    pub stale_refreshes: u64,
}

/// A keyed store of per-site treatment events.
pub trait SiteCache: Send + Sync {
    /// Returns the cached events for a site.
    fn get(&self, site_id: &str) -> Option<CachedEvents>;

    /// Stores events for a site unconditionally, stamped with `now`.
    fn put(&self, site_id: &str, events: Vec<TreatmentEvent>, now: DateTime<Utc>);

    /// Drops the entry for one site. Outstanding refresh tickets become stale.
    fn invalidate(&self, site_id: &str);

    /// Drops every entry. Outstanding refresh tickets become stale.
    fn invalidate_all(&self);

    /// Invalidates the entry for a site and starts a refresh. Any older
    /// ticket for the site becomes stale.
    fn begin_refresh(&self, site_id: &str) -> RefreshTicket;

    /// Stores a refresh result if the slot has not changed since the ticket
    /// was issued, stamped with `now`. Returns whether the result was stored.
    fn complete_refresh(
        &self,
        ticket: RefreshTicket,
        events: Vec<TreatmentEvent>,
        now: DateTime<Utc>,
    ) -> bool;

    /// Returns usage counters.
    fn stats(&self) -> CacheStats;
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    cached: Option<CachedEvents>,
}

/// In-process [`SiteCache`].
#[derive(Debug, Default)]
pub struct InMemorySiteCache {
    slots: RwLock<HashMap<String, Slot>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_refreshes: AtomicU64,
}

impl InMemorySiteCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl SiteCache for InMemorySiteCache {
    fn get(&self, site_id: &str) -> Option<CachedEvents> {
        let found = self
            .slots
            .read()
            .get(site_id)
            .and_then(|slot| slot.cached.clone());

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn put(&self, site_id: &str, events: Vec<TreatmentEvent>, now: DateTime<Utc>) {
        let generation = self.next_generation();
        self.slots.write().insert(
            site_id.to_string(),
            Slot {
                generation,
                cached: Some(CachedEvents {
                    events,
                    stored_at: now,
                }),
            },
        );
    }

    fn invalidate(&self, site_id: &str) {
        if self.slots.write().remove(site_id).is_some() {
            debug!(site_id = %site_id, "Invalidated cached events");
        }
    }

    fn invalidate_all(&self) {
        let mut slots = self.slots.write();
        let dropped = slots.len();
        slots.clear();
        debug!(dropped, "Invalidated all cached events");
    }

    fn begin_refresh(&self, site_id: &str) -> RefreshTicket {
        let generation = self.next_generation();
        let previous = self.slots.write().insert(
            site_id.to_string(),
            Slot {
                generation,
                cached: None,
            },
        );
        if previous.is_some_and(|slot| slot.cached.is_some()) {
            debug!(site_id = %site_id, "Invalidated cached events for refresh");
        }
        RefreshTicket {
            site_id: site_id.to_string(),
            generation,
        }
    }

    fn complete_refresh(
        &self,
        ticket: RefreshTicket,
        events: Vec<TreatmentEvent>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut slots = self.slots.write();
        match slots.get_mut(&ticket.site_id) {
            Some(slot) if slot.generation == ticket.generation => {
                slot.generation = self.next_generation();
                slot.cached = Some(CachedEvents {
                    events,
                    stored_at: now,
                });
                true
            }
            _ => {
                self.stale_refreshes.fetch_add(1, Ordering::Relaxed);
                debug!(site_id = %ticket.site_id, "Discarded stale refresh result");
                false
            }
        }
    }

    fn stats(&self) -> CacheStats {
        let entries = self
            .slots
            .read()
            .values()
            .filter(|slot| slot.cached.is_some())
            .count();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_refreshes: self.stale_refreshes.load(Ordering::Relaxed),
        }
    }
}
