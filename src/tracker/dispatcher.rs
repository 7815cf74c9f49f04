//! The public dispatcher: one method per remote operation.
//!
//! [`Counter`] resolves which backing instance a call targets (explicit
//! identifier, positional index, or the registration-time default), bridges
//! the callback convention into a future where the operation supports it,
//! and forwards the call through the global queue. It always returns
//! synchronously; readiness of the remote side only affects *when* the
//! returned future settles, never whether the call is accepted.
//!
//! # Resolution values
//!
//! Each awaitable operation documents what its future resolves with:
//! [`hit`](Counter::hit) resolves with the hit URL,
//! [`get_client_id`](Counter::get_client_id) with the identifier read from
//! the remote side, and every other awaitable operation with its own wire
//! options object.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::tracker::bridge::{bridge, CallFuture, CallbackOptions};
use crate::tracker::config::CounterSet;
use crate::tracker::queue::{CallQueue, PendingCall};
use crate::tracker::{
    CallArgs, CallReply, CounterId, Operation, Result, TrackerCallback, TrackerError,
};

/// Selects which registered counter a call targets.
///
/// Explicit identifier beats positional index beats the registration-time
/// default.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Target {
    /// The default counter resolved at registration time.
    #[default]
    Default,
    /// The counter at this position in the registered set.
    Position(usize),
    /// An explicit identifier, forwarded untouched. Identifiers unknown to
    /// this layer are forwarded anyway; the remote side owns that namespace.
    Id(CounterId),
}

impl From<CounterId> for Target {
    fn from(id: CounterId) -> Self {
        Target::Id(id)
    }
}

macro_rules! options_debug {
    ($name:ident, $($field:ident),*) => {
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field(stringify!($field), &self.$field))*
                    .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
                    .finish()
            }
        }
    };
}

/// Options for goal reporting ([`Counter::reach_goal`]).
#[derive(Default, Serialize)]
pub struct GoalOptions {
    /// Visit parameters attached to the goal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Caller-supplied callback, invoked once the goal is reported.
    #[serde(skip)]
    pub callback: Option<TrackerCallback>,
}

options_debug!(GoalOptions, params);

impl GoalOptions {
    /// Attaches visit parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Attaches a caller callback, invoked before the returned future settles.
    pub fn with_callback(mut self, callback: impl FnOnce(&CallReply) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Options for page-view reporting ([`Counter::hit`]).
#[derive(Default, Serialize)]
pub struct HitOptions {
    /// Page title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Referring URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Visit parameters attached to the page view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Caller-supplied callback.
    #[serde(skip)]
    pub callback: Option<TrackerCallback>,
}

options_debug!(HitOptions, title, referer, params);

impl HitOptions {
    /// Sets the page title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the referring URL.
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Attaches visit parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Attaches a caller callback, invoked before the returned future settles.
    pub fn with_callback(mut self, callback: impl FnOnce(&CallReply) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Options for link and file-download reporting ([`Counter::ext_link`],
/// [`Counter::file`]).
#[derive(Default, Serialize)]
pub struct LinkOptions {
    /// Link title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Visit parameters attached to the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Caller-supplied callback.
    #[serde(skip)]
    pub callback: Option<TrackerCallback>,
}

options_debug!(LinkOptions, title, params);

impl LinkOptions {
    /// Sets the link title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Attaches visit parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Attaches a caller callback, invoked before the returned future settles.
    pub fn with_callback(mut self, callback: impl FnOnce(&CallReply) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Options for bounce suppression ([`Counter::not_bounce`]).
#[derive(Default, Serialize)]
pub struct NotBounceOptions {
    /// Caller-supplied callback.
    #[serde(skip)]
    pub callback: Option<TrackerCallback>,
}

options_debug!(NotBounceOptions,);

impl NotBounceOptions {
    /// Attaches a caller callback, invoked before the returned future settles.
    pub fn with_callback(mut self, callback: impl FnOnce(&CallReply) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl CallbackOptions for GoalOptions {
    fn callback_mut(&mut self) -> &mut Option<TrackerCallback> {
        &mut self.callback
    }
}

impl CallbackOptions for HitOptions {
    fn callback_mut(&mut self) -> &mut Option<TrackerCallback> {
        &mut self.callback
    }
}

impl CallbackOptions for LinkOptions {
    fn callback_mut(&mut self) -> &mut Option<TrackerCallback> {
        &mut self.callback
    }
}

impl CallbackOptions for NotBounceOptions {
    fn callback_mut(&mut self) -> &mut Option<TrackerCallback> {
        &mut self.callback
    }
}

/// The public API surface over a registered counter set.
///
/// Built by [`Loader::attach`](crate::loader::Loader::attach). Every method
/// returns synchronously; awaitable operations hand back a
/// [`CallFuture`] that settles once the remote side executes the call,
/// fire-and-forget operations return nothing.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use metrica::loader::{Loader, LoaderSettings};
/// use metrica::tracker::config::CounterConfig;
/// use metrica::tracker::dispatcher::{GoalOptions, Target};
/// use metrica::tracker::queue::CallQueue;
///
/// let queue = Arc::new(CallQueue::new());
/// let counter = Loader::new(LoaderSettings::default()).attach(
///     Arc::clone(&queue),
///     [CounterConfig::new(1).with_option("webvisor", true)],
///     None,
/// );
///
/// // The remote script has not loaded; the call buffers instead of failing.
/// let _settled_later = counter.reach_goal("signup", GoalOptions::default(), Target::Default);
/// assert_eq!(counter.buffered_len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Counter {
    queue: Arc<CallQueue>,
    counters: CounterSet,
    default_id: CounterId,
}

impl Counter {
    pub(crate) fn new(queue: Arc<CallQueue>, counters: CounterSet, default_id: CounterId) -> Self {
        Self {
            queue,
            counters,
            default_id,
        }
    }

    /// The registered counter set.
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// The identifier calls target when no explicit target is given.
    pub fn default_id(&self) -> &CounterId {
        &self.default_id
    }

    /// Number of calls currently buffered behind the not-yet-loaded remote.
    pub fn buffered_len(&self) -> usize {
        self.queue.buffered_len()
    }

    /// Returns `true` once the remote side has installed itself.
    pub fn is_ready(&self) -> bool {
        self.queue.is_ready()
    }

    /// Reports a goal (conversion event). Resolves with the wire options.
    pub fn reach_goal(&self, goal: &str, options: GoalOptions, target: Target) -> CallFuture {
        let resolution = wire(&options);
        self.forward_bridged(
            Operation::ReachGoal,
            target,
            Some(Value::from(goal)),
            options,
            resolution,
        )
    }

    /// Reports a page view. Resolves with the hit URL.
    pub fn hit(&self, url: &str, options: HitOptions, target: Target) -> CallFuture {
        self.forward_bridged(
            Operation::Hit,
            target,
            Some(Value::from(url)),
            options,
            Value::from(url),
        )
    }

    /// Reports a click on an external link. Resolves with the wire options.
    pub fn ext_link(&self, url: &str, options: LinkOptions, target: Target) -> CallFuture {
        let resolution = wire(&options);
        self.forward_bridged(
            Operation::ExtLink,
            target,
            Some(Value::from(url)),
            options,
            resolution,
        )
    }

    /// Reports a file download. Resolves with the wire options.
    pub fn file(&self, url: &str, options: LinkOptions, target: Target) -> CallFuture {
        let resolution = wire(&options);
        self.forward_bridged(
            Operation::File,
            target,
            Some(Value::from(url)),
            options,
            resolution,
        )
    }

    /// Marks the visit as a non-bounce. Resolves with the wire options.
    pub fn not_bounce(&self, options: NotBounceOptions, target: Target) -> CallFuture {
        let resolution = wire(&options);
        self.forward_bridged(Operation::NotBounce, target, None, options, resolution)
    }

    /// Reads the client identifier the remote side assigned to this visitor.
    ///
    /// The operation takes no options object, so it bypasses the options
    /// bridge: a plain callback travels with the call and the future
    /// resolves with the reply payload.
    pub fn get_client_id(&self, target: Target) -> CallFuture {
        let id = match self.resolve_target(&target) {
            Ok(id) => id,
            Err(err) => return CallFuture::rejected(err),
        };
        let (tx, rx) = oneshot::channel();
        let callback: TrackerCallback = Box::new(move |reply: &CallReply| {
            let payload = reply.payload().cloned().unwrap_or(Value::Null);
            let _ = tx.send(Ok(payload));
        });
        self.queue.call(PendingCall {
            id,
            operation: Operation::GetClientId,
            args: CallArgs::new(Vec::new()).with_callback(callback),
        });
        CallFuture::waiting(rx)
    }

    /// Sets the user identifier. Fire-and-forget.
    pub fn set_user_id(&self, user_id: &str, target: Target) {
        self.forward_plain(Operation::SetUserId, target, vec![Value::from(user_id)]);
    }

    /// Reports per-user custom parameters. Fire-and-forget.
    pub fn user_params(&self, params: Value, target: Target) {
        self.forward_plain(Operation::UserParams, target, vec![params]);
    }

    /// Reports per-session custom parameters. Fire-and-forget.
    pub fn params(&self, params: Value, target: Target) {
        self.forward_plain(Operation::Params, target, vec![params]);
    }

    /// Re-runs phone-number replacement on the current page. Fire-and-forget.
    pub fn replace_phones(&self, target: Target) {
        self.forward_plain(Operation::ReplacePhones, target, Vec::new());
    }

    /// Registers additional file extensions for download tracking.
    /// Fire-and-forget.
    pub fn add_file_extension<I, S>(&self, extensions: I, target: Target)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let extensions: Vec<Value> = extensions
            .into_iter()
            .map(|ext| Value::from(ext.into()))
            .collect();
        self.forward_plain(
            Operation::AddFileExtension,
            target,
            vec![Value::Array(extensions)],
        );
    }

    /// Tears down the backing instance. Fire-and-forget.
    pub fn destruct(&self, target: Target) {
        self.forward_plain(Operation::Destruct, target, Vec::new());
    }

    /// Dynamic entry point keyed by wire name, for collaborators that carry
    /// the operation as a string (e.g. a DOM event directive reporting a
    /// goal). Consults the alias table, so the historical `fireEvent`
    /// spelling reaches goal reporting.
    ///
    /// `values` forward verbatim. Awaitable operations return a future that
    /// resolves with the forwarded values (or, for the client-identifier
    /// read, the reply payload); fire-and-forget operations and unknown
    /// names return `None`, the latter with a diagnostic.
    pub fn call_wire(&self, name: &str, values: Vec<Value>, target: Target) -> Option<CallFuture> {
        let Some(operation) = Operation::from_wire(name) else {
            warn!(name, "dropping call to unknown operation");
            return None;
        };
        if operation == Operation::GetClientId {
            return Some(self.get_client_id(target));
        }
        let id = match self.resolve_target(&target) {
            Ok(id) => id,
            Err(err) if operation.is_awaitable() => return Some(CallFuture::rejected(err)),
            Err(err) => {
                warn!(%operation, %err, "dropping call with unresolvable target");
                return None;
            }
        };
        if operation.is_awaitable() {
            let resolution = Value::Array(values.clone());
            let (tx, rx) = oneshot::channel();
            let callback: TrackerCallback = Box::new(move |_: &CallReply| {
                let _ = tx.send(Ok(resolution));
            });
            self.queue.call(PendingCall {
                id,
                operation,
                args: CallArgs::new(values).with_callback(callback),
            });
            Some(CallFuture::waiting(rx))
        } else {
            self.queue.call(PendingCall {
                id,
                operation,
                args: CallArgs::new(values),
            });
            None
        }
    }

    fn resolve_target(&self, target: &Target) -> Result<CounterId> {
        match target {
            Target::Default => Ok(self.default_id.clone()),
            Target::Position(position) => {
                self.counters
                    .at(*position)
                    .cloned()
                    .ok_or(TrackerError::UnknownTarget {
                        position: *position,
                        len: self.counters.len(),
                    })
            }
            Target::Id(id) => Ok(id.clone()),
        }
    }

    fn forward_bridged<O>(
        &self,
        operation: Operation,
        target: Target,
        head: Option<Value>,
        options: O,
        resolution: Value,
    ) -> CallFuture
    where
        O: CallbackOptions + Serialize,
    {
        let id = match self.resolve_target(&target) {
            Ok(id) => id,
            Err(err) => return CallFuture::rejected(err),
        };
        let (mut bridged, future) = bridge(options, resolution);
        let callback = bridged.callback_mut().take();
        let mut values = Vec::with_capacity(2);
        values.extend(head);
        values.push(wire(&bridged));
        self.queue.call(PendingCall {
            id,
            operation,
            args: CallArgs { values, callback },
        });
        future
    }

    fn forward_plain(&self, operation: Operation, target: Target, values: Vec<Value>) {
        match self.resolve_target(&target) {
            Ok(id) => self.queue.call(PendingCall {
                id,
                operation,
                args: CallArgs::new(values),
            }),
            Err(err) => {
                warn!(%operation, %err, "dropping call with unresolvable target");
            }
        }
    }
}

/// Serializes options into their wire shape; the callback slot is skipped.
fn wire<T: Serialize>(options: &T) -> Value {
    serde_json::to_value(options).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::config::{CounterConfig, CounterSet};
    use crate::tracker::queue::RemoteBridge;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::sync::Mutex;

    /// Remote side that records dispatches and honors the callback contract,
    /// replying with a fixed client identifier where one is read.
    #[derive(Default)]
    struct FakeRemote {
        calls: Arc<Mutex<Vec<(CounterId, Operation, Vec<Value>)>>>,
    }

    impl RemoteBridge for FakeRemote {
        fn instantiate(&self, _config: &CounterConfig) {}

        fn dispatch(&self, mut call: PendingCall) {
            self.calls
                .lock()
                .unwrap()
                .push((call.id.clone(), call.operation, call.args.values.clone()));
            if let Some(callback) = call.args.callback.take() {
                let reply = match call.operation {
                    Operation::GetClientId => CallReply::with_payload(json!("client-77")),
                    _ => CallReply::empty(),
                };
                callback(&reply);
            }
        }
    }

    fn counter_on(queue: &Arc<CallQueue>) -> Counter {
        let set = CounterSet::normalize([
            CounterConfig::new(1).with_option("webvisor", true),
            CounterConfig::new(2),
        ]);
        let default_id = set.resolve_default(None);
        Counter::new(Arc::clone(queue), set, default_id)
    }

    fn install_remote(queue: &Arc<CallQueue>) -> Arc<Mutex<Vec<(CounterId, Operation, Vec<Value>)>>> {
        let remote = FakeRemote::default();
        let calls = Arc::clone(&remote.calls);
        queue.install(Box::new(remote));
        calls
    }

    #[tokio::test]
    async fn test_pre_load_call_resolves_after_install() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);

        let mut future = counter.reach_goal("signup", GoalOptions::default(), Target::Default);
        assert!((&mut future).now_or_never().is_none());
        assert_eq!(counter.buffered_len(), 1);

        install_remote(&queue);
        assert_eq!(future.await, Ok(json!({})));
    }

    #[tokio::test]
    async fn test_pre_load_buffer_holds_the_goal_entry() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);

        let _future = counter.reach_goal(
            "signup",
            GoalOptions::default().with_params(json!({"plan": "pro"})),
            Target::Id(CounterId::Num(1)),
        );

        assert_eq!(
            queue.buffered_view(),
            vec![(
                CounterId::Num(1),
                Operation::ReachGoal,
                vec![json!("signup"), json!({"params": {"plan": "pro"}})],
            )]
        );
    }

    #[tokio::test]
    async fn test_fifo_order_per_target() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        let first = counter.reach_goal(
            "a",
            GoalOptions::default().with_callback(move |_| log.lock().unwrap().push("a")),
            Target::Default,
        );
        let log = Arc::clone(&order);
        let second = counter.reach_goal(
            "b",
            GoalOptions::default().with_callback(move |_| log.lock().unwrap().push("b")),
            Target::Default,
        );

        let calls = install_remote(&queue);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(calls.lock().unwrap()[0].2[0], json!("a"));
        assert_eq!(calls.lock().unwrap()[1].2[0], json!("b"));

        first.await.unwrap();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_callback_fires_once_before_settlement() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let fired = Arc::new(Mutex::new(0));

        let observer = Arc::clone(&fired);
        let mut future = counter.reach_goal(
            "signup",
            GoalOptions::default().with_callback(move |_| *observer.lock().unwrap() += 1),
            Target::Default,
        );
        assert!((&mut future).now_or_never().is_none());
        assert_eq!(*fired.lock().unwrap(), 0);

        install_remote(&queue);
        // The callback already ran during the drain, before the future was
        // able to settle.
        assert_eq!(*fired.lock().unwrap(), 1);
        future.await.unwrap();
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_target_precedence() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let calls = install_remote(&queue);

        counter.set_user_id("u-default", Target::Default);
        counter.set_user_id("u-pos", Target::Position(1));
        counter.set_user_id("u-explicit", Target::Id(CounterId::from("other")));

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded[0].0, CounterId::Num(1));
        assert_eq!(recorded[1].0, CounterId::Num(2));
        assert_eq!(recorded[2].0, CounterId::from("other"));
    }

    #[tokio::test]
    async fn test_positional_out_of_range_rejects() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);

        let future = counter.reach_goal("signup", GoalOptions::default(), Target::Position(7));
        assert_eq!(
            future.await,
            Err(TrackerError::UnknownTarget { position: 7, len: 2 })
        );
        // Nothing was buffered for the unresolvable call.
        assert_eq!(counter.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_positional_out_of_range_drops_plain_call() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let calls = install_remote(&queue);

        counter.set_user_id("u-1", Target::Position(7));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hit_resolves_with_url() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        install_remote(&queue);

        let resolved = counter
            .hit(
                "/checkout",
                HitOptions::default().with_title("Checkout"),
                Target::Default,
            )
            .await;
        assert_eq!(resolved, Ok(json!("/checkout")));
    }

    #[tokio::test]
    async fn test_get_client_id_resolves_with_payload() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        install_remote(&queue);

        assert_eq!(
            counter.get_client_id(Target::Default).await,
            Ok(json!("client-77"))
        );
    }

    #[tokio::test]
    async fn test_set_user_id_wire_shape() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let calls = install_remote(&queue);

        counter.set_user_id("u-1", Target::Default);
        let recorded = calls.lock().unwrap();
        assert_eq!(
            recorded[0],
            (CounterId::Num(1), Operation::SetUserId, vec![json!("u-1")])
        );
    }

    #[tokio::test]
    async fn test_add_file_extension_wire_shape() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let calls = install_remote(&queue);

        counter.add_file_extension(["epub", "mobi"], Target::Default);
        assert_eq!(
            calls.lock().unwrap()[0].2,
            vec![json!(["epub", "mobi"])]
        );
    }

    #[tokio::test]
    async fn test_call_wire_alias_reaches_goal_reporting() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);
        let calls = install_remote(&queue);

        let future = counter
            .call_wire("fireEvent", vec![json!("signup")], Target::Default)
            .expect("goal reporting is awaitable");
        assert_eq!(future.await, Ok(json!(["signup"])));
        assert_eq!(calls.lock().unwrap()[0].1, Operation::ReachGoal);
    }

    #[tokio::test]
    async fn test_call_wire_unknown_operation_is_dropped() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);

        assert!(counter
            .call_wire("selfDestruct", Vec::new(), Target::Default)
            .is_none());
        assert_eq!(counter.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_call_wire_fire_and_forget_returns_nothing() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);

        assert!(counter
            .call_wire("setUserID", vec![json!("u-1")], Target::Default)
            .is_none());
        assert_eq!(counter.buffered_len(), 1);
    }

    #[tokio::test]
    async fn test_queue_teardown_disconnects_buffered_futures() {
        let queue = Arc::new(CallQueue::new());
        let counter = counter_on(&queue);

        let future = counter.reach_goal("signup", GoalOptions::default(), Target::Default);
        drop(counter);
        drop(queue);
        assert_eq!(future.await, Err(TrackerError::Disconnected));
    }
}
