//! Security event log
//!
//! Every event raised by an evaluation is appended to a bounded in-memory
//! log and fanned out to the registered [`EventSink`]s. The default
//! [`TracingSink`] writes one structured record per event on the
//! `audit::oidc` target:
//!
//! ```text
//! RUST_LOG=audit::oidc=info
//! ```
//!
//! When the log is full the oldest events are dropped. Sinks see every event.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::types::{SecurityEvent, ThreatLevel};

/// Write-only destination for security events
pub trait EventSink: Send + Sync + Debug {
    /// Deliver one event
    fn emit(&self, event: &SecurityEvent);
}

/// Sink writing structured `tracing` records
#[derive(Debug, Clone)]
pub struct TracingSink {
    service_name: String,
}

impl TracingSink {
    /// Create a sink attributing records to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &SecurityEvent) {
        macro_rules! audit {
            ($level:ident) => {
                $level!(
                    target: "audit::oidc",
                    event_id = %event.id,
                    event_type = event.event_type.as_str(),
                    threat_level = event.threat_level.as_str(),
                    recommended_response = event.recommended_response.as_str(),
                    client_id = ?event.client_id,
                    network_address = %event.network_address,
                    endpoint = %event.endpoint,
                    risk_score = event.risk_score,
                    correlation_id = %event.correlation_id,
                    service = %self.service_name,
                    "{}",
                    event.description
                )
            };
        }

        match event.threat_level {
            ThreatLevel::Low => audit!(debug),
            ThreatLevel::Medium => audit!(info),
            ThreatLevel::High => audit!(warn),
            ThreatLevel::Critical => audit!(error),
        }
    }
}

/// Bounded, append-only log of security events
#[derive(Debug)]
pub struct SecurityEventLog {
    capacity: usize,
    events: RwLock<VecDeque<SecurityEvent>>,
    sinks: Vec<Arc<dyn EventSink>>,
    total_recorded: AtomicU64,
}

impl SecurityEventLog {
    /// Create a log holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            sinks: Vec::new(),
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Add a sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append events and deliver them to every sink
    pub fn record(&self, events: &[SecurityEvent]) {
        if events.is_empty() {
            return;
        }

        for event in events {
            crate::shield_metrics::record_event(
                event.event_type.as_str(),
                event.threat_level.as_str(),
            );
            for sink in &self.sinks {
                sink.emit(event);
            }
        }

        self.total_recorded
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        if self.capacity == 0 {
            return;
        }
        let mut log = self.events.write();
        log.extend(events.iter().cloned());
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    /// Events currently retained
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events recorded since start, including dropped ones
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Relaxed)
    }

    /// The most recent `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let log = self.events.read();
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    /// Retained events per threat level
    pub fn threat_distribution(&self) -> BTreeMap<ThreatLevel, usize> {
        let mut distribution = BTreeMap::new();
        for event in self.events.read().iter() {
            *distribution.entry(event.threat_level).or_insert(0) += 1;
        }
        distribution
    }
}
