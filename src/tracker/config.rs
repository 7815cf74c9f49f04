//! Counter configuration model and default-identifier resolution.
//!
//! A tracked application registers one or more counter configurations at
//! start-up: an identifier plus an open bag of initialization options the
//! remote script interprets. This module normalizes that input into a
//! [`CounterSet`] and resolves which counter is the *default* target for
//! calls that do not name one.
//!
//! Resolution runs during application bootstrap, so nothing in this module
//! ever fails: invalid input degrades to a best-effort value and a
//! [`tracing`] diagnostic.
//!
//! # Default hint semantics
//!
//! The optional hint supplied at registration is interpreted as follows:
//!
//! | hint                          | resolves to                 |
//! |-------------------------------|-----------------------------|
//! | absent or empty string        | first configured counter    |
//! | number `< len`                | counter at that position    |
//! | anything else                 | the hint itself, literally  |
//!
//! A numeric hint inside the positional range is *always* positional, even
//! when the same number appears as a literal identifier elsewhere in the
//! set. Application code relies on both interpretations, so the asymmetry is
//! load-bearing.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::tracker::CounterId;

/// Open map of remote-script-defined initialization flags.
///
/// Keys and values are opaque to this layer; they are forwarded verbatim to
/// the remote script at load time.
pub type InitOptions = BTreeMap<String, Value>;

/// Configuration of a single tracked counter instance.
///
/// Deserializes from the flat shape applications write in static config,
/// where every key other than `id` is an initialization option:
///
/// ```rust
/// use metrica::tracker::config::CounterConfig;
/// use metrica::tracker::CounterId;
///
/// let config: CounterConfig =
///     serde_json::from_str(r#"{"id": 26812653, "webvisor": true}"#).unwrap();
///
/// assert_eq!(config.id, Some(CounterId::Num(26812653)));
/// assert_eq!(config.options["webvisor"], serde_json::json!(true));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// The counter identifier. Configs without one are skipped at
    /// registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CounterId>,
    /// Initialization options, forwarded verbatim at load time.
    #[serde(flatten)]
    pub options: InitOptions,
}

impl CounterConfig {
    /// Creates a configuration for the given identifier with no options.
    pub fn new(id: impl Into<CounterId>) -> Self {
        Self {
            id: Some(id.into()),
            options: InitOptions::new(),
        }
    }

    /// Adds an initialization option, returning `self` for method chaining.
    ///
    /// ```rust
    /// use metrica::tracker::config::CounterConfig;
    ///
    /// let config = CounterConfig::new(1)
    ///     .with_option("webvisor", true)
    ///     .with_option("defer", true);
    /// assert_eq!(config.options.len(), 2);
    /// ```
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// An ordered, validated set of counter configurations.
///
/// Insertion order is significant: positional lookups index into it. The set
/// is created once at registration and immutable thereafter; nothing in this
/// layer adds or removes counters later.
///
/// Duplicate identifiers are not deduplicated. Lookups scan linearly and
/// prefer the first match, which is the documented behavior for callers that
/// register duplicates anyway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterSet {
    entries: Vec<CounterConfig>,
}

impl CounterSet {
    /// Normalizes user-supplied configuration into a validated set.
    ///
    /// Accepts any sequence of configs (a single config converts via
    /// [`From`]), preserves order, and skips entries without a usable
    /// identifier, reporting each skip as a diagnostic rather than failing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use metrica::tracker::config::{CounterConfig, CounterSet};
    ///
    /// let set = CounterSet::normalize([
    ///     CounterConfig::new(1).with_option("webvisor", true),
    ///     CounterConfig::new(2),
    /// ]);
    /// assert_eq!(set.len(), 2);
    /// ```
    pub fn normalize(configs: impl IntoIterator<Item = CounterConfig>) -> Self {
        let mut entries = Vec::new();
        for (position, config) in configs.into_iter().enumerate() {
            match &config.id {
                Some(id) if !id.is_empty() => entries.push(config),
                _ => {
                    warn!(position, "skipping counter config without an id");
                }
            }
        }
        Self { entries }
    }

    /// Number of registered counters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no counter survived normalization.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the configurations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CounterConfig> {
        self.entries.iter()
    }

    /// Returns the identifier registered at `position`, if any.
    pub fn at(&self, position: usize) -> Option<&CounterId> {
        self.entries.get(position).and_then(|entry| entry.id.as_ref())
    }

    /// Returns `true` if some entry carries `id`. First-match linear scan.
    pub fn contains(&self, id: &CounterId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.id.as_ref() == Some(id))
    }

    /// Precomputes the position-to-identifier translation used when a
    /// positional target is supplied at call time rather than at
    /// registration time.
    pub fn positional_map(&self) -> Vec<CounterId> {
        self.entries
            .iter()
            .filter_map(|entry| entry.id.clone())
            .collect()
    }

    /// Resolves the default identifier from an optional hint.
    ///
    /// See the [module documentation](self) for the hint semantics. The
    /// resolved identifier is checked against the registered set; a candidate
    /// that matches no registered counter is still returned, with a
    /// diagnostic, because failing here would break application bootstrap.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use metrica::tracker::config::{CounterConfig, CounterSet};
    /// use metrica::tracker::CounterId;
    ///
    /// let set = CounterSet::normalize([
    ///     CounterConfig::new(1).with_option("webvisor", true),
    ///     CounterConfig::new(2),
    /// ]);
    ///
    /// // Positional: 1 names the second counter, not the literal id 1.
    /// assert_eq!(set.resolve_default(Some(&CounterId::Num(1))), CounterId::Num(2));
    ///
    /// // Out of range: taken literally (and reported, since nothing matches).
    /// assert_eq!(set.resolve_default(Some(&CounterId::Num(5))), CounterId::Num(5));
    /// ```
    pub fn resolve_default(&self, hint: Option<&CounterId>) -> CounterId {
        let candidate = match hint {
            None => self.first_id(),
            Some(CounterId::Name(name)) if name.is_empty() => self.first_id(),
            Some(CounterId::Num(n)) => match usize::try_from(*n) {
                Ok(position) if position < self.len() => self
                    .at(position)
                    .cloned()
                    .unwrap_or_else(|| CounterId::Num(*n)),
                _ => CounterId::Num(*n),
            },
            Some(literal) => literal.clone(),
        };
        if !self.contains(&candidate) {
            warn!(
                id = %candidate,
                "default identifier does not match any registered counter"
            );
        }
        candidate
    }

    fn first_id(&self) -> CounterId {
        match self.at(0) {
            Some(id) => id.clone(),
            None => {
                warn!("resolving a default identifier against an empty counter set");
                CounterId::Name(String::new())
            }
        }
    }
}

impl From<CounterConfig> for CounterSet {
    /// Normalizes a single configuration into a one-element set.
    fn from(config: CounterConfig) -> Self {
        CounterSet::normalize([config])
    }
}

impl From<Vec<CounterConfig>> for CounterSet {
    fn from(configs: Vec<CounterConfig>) -> Self {
        CounterSet::normalize(configs)
    }
}

impl Display for CounterSet {
    /// Formats the set as the comma-separated list of its identifiers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.positional_map().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}
