//! Snapshot types for serializing tracker state.
//!
//! This module provides serializable point-in-time views of a dispatcher's
//! registration and queue state, for diagnostics pages, debug endpoints, or
//! logging. Snapshots are plain data; nothing in them is interpreted.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use metrica::loader::{Loader, LoaderSettings};
//! use metrica::snapshot::TrackerSnapshot;
//! use metrica::tracker::config::CounterConfig;
//! use metrica::tracker::queue::CallQueue;
//!
//! let queue = Arc::new(CallQueue::new());
//! let counter = Loader::new(LoaderSettings::default())
//!     .attach(queue, [CounterConfig::new(1)], None);
//!
//! let snapshot = TrackerSnapshot::capture(&counter);
//! let json = serde_json::to_string(&snapshot).unwrap();
//! assert!(json.contains("\"ready\":false"));
//! ```

use serde::{Deserialize, Serialize};

use crate::tracker::config::InitOptions;
use crate::tracker::dispatcher::Counter;
use crate::tracker::CounterId;

/// A snapshot of a single registered counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterSnapshot {
    /// The counter identifier.
    pub id: CounterId,
    /// The initialization options registered for it.
    #[serde(default, skip_serializing_if = "InitOptions::is_empty")]
    pub options: InitOptions,
}

/// A point-in-time capture of a dispatcher's state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerSnapshot {
    /// The registered counters, in registration order.
    pub counters: Vec<CounterSnapshot>,
    /// The identifier targeted when no explicit target is given.
    pub default_id: CounterId,
    /// Calls currently buffered behind the not-yet-loaded remote side.
    pub buffered: usize,
    /// Whether the remote side has installed itself.
    pub ready: bool,
}

impl TrackerSnapshot {
    /// Captures the current state of `counter`.
    pub fn capture(counter: &Counter) -> Self {
        Self {
            counters: counter
                .counters()
                .iter()
                .filter_map(|config| {
                    config.id.clone().map(|id| CounterSnapshot {
                        id,
                        options: config.options.clone(),
                    })
                })
                .collect(),
            default_id: counter.default_id().clone(),
            buffered: counter.buffered_len(),
            ready: counter.is_ready(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Loader, LoaderSettings};
    use crate::tracker::config::CounterConfig;
    use crate::tracker::dispatcher::Target;
    use crate::tracker::queue::CallQueue;
    use serde_json::json;
    use std::sync::Arc;

    fn sample_counter() -> Counter {
        let queue = Arc::new(CallQueue::new());
        Loader::new(LoaderSettings::default()).attach(
            queue,
            [
                CounterConfig::new(1).with_option("webvisor", true),
                CounterConfig::new(2),
            ],
            None,
        )
    }

    #[test]
    fn test_capture() {
        let counter = sample_counter();
        counter.set_user_id("u-1", Target::Default);

        let snapshot = TrackerSnapshot::capture(&counter);
        assert_eq!(snapshot.counters.len(), 2);
        assert_eq!(snapshot.default_id, CounterId::Num(1));
        assert_eq!(snapshot.buffered, 1);
        assert!(!snapshot.ready);
    }

    #[test]
    fn test_serialize_round_trip() {
        let snapshot = TrackerSnapshot::capture(&sample_counter());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["default_id"], json!(1));
        assert_eq!(json["counters"][0]["options"]["webvisor"], json!(true));

        let back: TrackerSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
