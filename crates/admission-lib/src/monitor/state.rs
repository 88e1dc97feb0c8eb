//! Shared monitor state: usage history ring and reservation table
//!
//! Both live behind the monitor's single mutex. The sampling loop is the
//! only writer to the history; admission and reservation calls read and
//! prune the reservation table.

use crate::models::{MetricSummary, ResourceReservation, ResourceUsage, ReservedTotals, UsageStats};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Bounded FIFO of usage snapshots
#[derive(Debug)]
pub(crate) struct UsageHistory {
    samples: VecDeque<ResourceUsage>,
    capacity: usize,
}

impl UsageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, evicting the oldest when full
    pub fn push(&mut self, usage: ResourceUsage) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(usage);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn latest(&self) -> Option<&ResourceUsage> {
        self.samples.back()
    }

    /// Snapshots taken at or after `since`; everything when `since` is None
    pub fn since(&self, since: Option<DateTime<Utc>>) -> Vec<ResourceUsage> {
        match since {
            None => self.samples.iter().cloned().collect(),
            Some(cutoff) => self
                .samples
                .iter()
                .filter(|u| u.timestamp >= cutoff)
                .cloned()
                .collect(),
        }
    }

    /// Aggregate CPU and memory over snapshots newer than `since`
    pub fn stats(&self, since: DateTime<Utc>, window_seconds: f64) -> UsageStats {
        let window: Vec<&ResourceUsage> =
            self.samples.iter().filter(|u| u.timestamp >= since).collect();

        UsageStats {
            sample_count: window.len(),
            window_seconds,
            cpu: MetricSummary::from_values(window.iter().map(|u| u.cpu_percent)),
            memory: MetricSummary::from_values(window.iter().map(|u| u.memory_percent)),
        }
    }
}

/// Active reservations keyed by id
#[derive(Debug, Default)]
pub(crate) struct ReservationTable {
    reservations: HashMap<Uuid, ResourceReservation>,
}

impl ReservationTable {
    pub fn insert(&mut self, reservation: ResourceReservation) {
        self.reservations.insert(reservation.id, reservation);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<ResourceReservation> {
        self.reservations.remove(id)
    }

    /// Drop reservations whose expiry has passed; returns how many went
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.reservations.len();
        self.reservations.retain(|_, r| !r.is_expired_at(now));
        before - self.reservations.len()
    }

    pub fn totals(&self) -> ReservedTotals {
        self.reservations
            .values()
            .fold(ReservedTotals::default(), |acc, r| ReservedTotals {
                cpu_percent: acc.cpu_percent + r.cpu_reserved,
                memory_mb: acc.memory_mb + r.memory_reserved_mb,
                count: acc.count + 1,
            })
    }

    pub fn list(&self) -> Vec<ResourceReservation> {
        let mut list: Vec<_> = self.reservations.values().cloned().collect();
        list.sort_by_key(|r| r.created_at);
        list
    }
}

/// Everything guarded by the monitor's mutex
#[derive(Debug)]
pub(crate) struct MonitorState {
    pub history: UsageHistory,
    pub reservations: ReservationTable,
}

impl MonitorState {
    pub fn new(history_size: usize) -> Self {
        Self {
            history: UsageHistory::new(history_size),
            reservations: ReservationTable::default(),
        }
    }
}
