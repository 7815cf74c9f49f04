//! Core module containing the counter bridging infrastructure.
//!
//! This module provides the shared types used by every part of the crate, as
//! well as the submodules implementing the individual pieces of the bridge:
//!
//! - [`config`] - counter configuration model and default-identifier resolution
//! - [`queue`] - the global call queue that buffers calls until the remote side installs
//! - [`bridge`] - conversion of the remote callback convention into futures
//! - [`dispatcher`] - the public [`Counter`](dispatcher::Counter) API surface
//!
//! # Architecture
//!
//! The bridge decouples *issuing* a tracked call from *executing* it:
//!
//! ```text
//!   application code
//!        │  counter.reach_goal("signup", ...)
//!        ▼
//!   ┌───────────────┐   resolve target    ┌─────────────────┐
//!   │  Dispatcher    │────────────────────►│  CounterSet      │
//!   │  (dispatcher)  │   bridge callback   │  (config)        │
//!   └───────┬───────┘                      └─────────────────┘
//!           │ PendingCall { id, operation, args }
//!           ▼
//!   ┌───────────────┐   not installed     ┌─────────────────┐
//!   │  CallQueue     │────────────────────►│  FIFO buffer     │
//!   │  (queue)       │   installed         └─────────────────┘
//!   └───────┬───────┘
//!           │ drain / forward, in issue order
//!           ▼
//!   ┌───────────────┐   invokes callback  ┌─────────────────┐
//!   │  RemoteBridge  │────────────────────►│  CallFuture      │
//!   │  (remote side) │                     │  resolves        │
//!   └───────────────┘                      └─────────────────┘
//! ```
//!
//! A call issued before the remote script has loaded is buffered, never
//! dropped. Once the remote side installs itself, the buffer drains in strict
//! insertion order and each bridged future resolves as its call executes.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod queue;

use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{Result, TrackerError};

/// Opaque key naming one backing remote counter instance.
///
/// The remote script addresses its instances either by an account number or
/// by a free-form string; this layer never interprets the value, it only
/// forwards it. Both shapes serialize to their bare form (`42` or `"main"`),
/// which is what the remote naming convention expects.
///
/// # Examples
///
/// ```rust
/// use metrica::tracker::CounterId;
///
/// let by_number = CounterId::from(26812653);
/// let by_name = CounterId::from("main");
///
/// assert_eq!(by_number.to_string(), "26812653");
/// assert_eq!(by_name.to_string(), "main");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CounterId {
    /// A numeric identifier, typically an account number.
    Num(u64),
    /// A string identifier.
    Name(String),
}

impl CounterId {
    /// Returns `true` if the identifier carries no usable value.
    ///
    /// Only the empty string qualifies; every number is a valid identifier.
    pub fn is_empty(&self) -> bool {
        match self {
            CounterId::Num(_) => false,
            CounterId::Name(name) => name.is_empty(),
        }
    }

    /// Renders the identifier as a wire value.
    pub fn to_value(&self) -> Value {
        match self {
            CounterId::Num(n) => Value::from(*n),
            CounterId::Name(name) => Value::from(name.as_str()),
        }
    }
}

impl Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterId::Num(n) => write!(f, "{}", n),
            CounterId::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<u64> for CounterId {
    fn from(n: u64) -> Self {
        CounterId::Num(n)
    }
}

impl From<&str> for CounterId {
    fn from(name: &str) -> Self {
        CounterId::Name(name.to_string())
    }
}

impl From<String> for CounterId {
    fn from(name: String) -> Self {
        CounterId::Name(name)
    }
}

/// The fixed set of operations the remote counter object exposes.
///
/// Each variant maps to exactly one wire name. Historical front-ends used a
/// second name for goal reporting; that spelling lives in [`ALIASES`] and is
/// accepted on the dynamic call path only, so the mapping exists in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Goal/event reporting.
    ReachGoal,
    /// Page-view reporting.
    Hit,
    /// External-link click reporting.
    ExtLink,
    /// File-download reporting.
    File,
    /// Bounce suppression.
    NotBounce,
    /// Client-identifier reading.
    GetClientId,
    /// User-identifier setting.
    SetUserId,
    /// Per-user custom parameters.
    UserParams,
    /// Per-session custom parameters.
    Params,
    /// Phone-number replacement.
    ReplacePhones,
    /// File-extension registration for download tracking.
    AddFileExtension,
    /// Instance teardown.
    Destruct,
}

/// Alternate wire spellings accepted for backwards compatibility.
pub const ALIASES: [(&str, Operation); 1] = [("fireEvent", Operation::ReachGoal)];

impl Operation {
    /// Returns the canonical name of this operation on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Operation::ReachGoal => "reachGoal",
            Operation::Hit => "hit",
            Operation::ExtLink => "extLink",
            Operation::File => "file",
            Operation::NotBounce => "notBounce",
            Operation::GetClientId => "getClientID",
            Operation::SetUserId => "setUserID",
            Operation::UserParams => "userParams",
            Operation::Params => "params",
            Operation::ReplacePhones => "replacePhones",
            Operation::AddFileExtension => "addFileExtension",
            Operation::Destruct => "destruct",
        }
    }

    /// Parses a wire name, consulting the alias table after the canonical names.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use metrica::tracker::Operation;
    ///
    /// assert_eq!(Operation::from_wire("reachGoal"), Some(Operation::ReachGoal));
    /// assert_eq!(Operation::from_wire("fireEvent"), Some(Operation::ReachGoal));
    /// assert_eq!(Operation::from_wire("selfDestruct"), None);
    /// ```
    pub fn from_wire(name: &str) -> Option<Self> {
        let canonical = match name {
            "reachGoal" => Some(Operation::ReachGoal),
            "hit" => Some(Operation::Hit),
            "extLink" => Some(Operation::ExtLink),
            "file" => Some(Operation::File),
            "notBounce" => Some(Operation::NotBounce),
            "getClientID" => Some(Operation::GetClientId),
            "setUserID" => Some(Operation::SetUserId),
            "userParams" => Some(Operation::UserParams),
            "params" => Some(Operation::Params),
            "replacePhones" => Some(Operation::ReplacePhones),
            "addFileExtension" => Some(Operation::AddFileExtension),
            "destruct" => Some(Operation::Destruct),
            _ => None,
        };
        canonical.or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == name)
                .map(|(_, op)| *op)
        })
    }

    /// Returns `true` if the operation follows the callback convention and
    /// can therefore be awaited.
    pub fn is_awaitable(self) -> bool {
        matches!(
            self,
            Operation::ReachGoal
                | Operation::Hit
                | Operation::ExtLink
                | Operation::File
                | Operation::NotBounce
                | Operation::GetClientId
        )
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// The context the executing remote side hands to a call's callback.
///
/// This is the bridged equivalent of the binding the remote convention
/// invokes its fire-and-forget callbacks with. A caller-supplied callback and
/// the future-resolving composed callback observe the same reply.
#[derive(Debug, Clone, Default)]
pub struct CallReply {
    payload: Option<Value>,
}

impl CallReply {
    /// A reply carrying no payload, the common case for reporting operations.
    pub fn empty() -> Self {
        Self { payload: None }
    }

    /// A reply carrying a payload, e.g. the client identifier being read.
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    /// The payload, if the operation produced one.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

/// Callback travelling with a call, invoked by the remote side once the call
/// has executed. Invoked at most once; the `FnOnce` bound encodes that.
pub type TrackerCallback = Box<dyn FnOnce(&CallReply) + Send + 'static>;

/// The argument bundle of a single call.
///
/// `values` holds the positional wire arguments (already free of callbacks);
/// `callback` is the slot the remote convention's callback parameter travels
/// in, kept out of the serialized values so the wire shape stays plain data.
pub struct CallArgs {
    /// Positional wire arguments, forwarded verbatim.
    pub values: Vec<Value>,
    /// Callback invoked by the remote side after execution.
    pub callback: Option<TrackerCallback>,
}

impl CallArgs {
    /// Creates an argument bundle with no callback.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            callback: None,
        }
    }

    /// Attaches a callback, returning `self` for method chaining.
    pub fn with_callback(mut self, callback: TrackerCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl Debug for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("values", &self.values)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}
