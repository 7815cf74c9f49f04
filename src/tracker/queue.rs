//! Global call queue: the well-known location every call goes through.
//!
//! Until the remote script has loaded, the queue buffers every call instead
//! of executing it. Once the remote side installs a [`RemoteBridge`], the
//! buffer drains in strict insertion order and subsequent calls forward
//! directly. Calls are never executed around the queue, so buffering and
//! replay behave uniformly whether or not loading has completed.
//!
//! If the script never loads, calls accumulate indefinitely and their
//! associated futures never settle. The queue implements no timeout; that is
//! a documented limitation of the protocol, not something this layer papers
//! over.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use tracing::{debug, warn};

use crate::tracker::config::{CounterConfig, CounterSet};
use crate::tracker::{CallArgs, CounterId, Operation};

/// The unit buffered while the remote backing object does not yet exist.
///
/// Created when the dispatcher invokes an operation; destroyed the moment the
/// installed bridge replays it. Never persisted.
#[derive(Debug)]
pub struct PendingCall {
    /// Target counter instance.
    pub id: CounterId,
    /// Operation to invoke on it.
    pub operation: Operation,
    /// Positional arguments plus the optional callback.
    pub args: CallArgs,
}

/// The seam the loaded remote side implements.
///
/// Instead of reaching remote objects through mangled global names, the
/// queue hands the bridge one [`instantiate`](RemoteBridge::instantiate) per
/// registered configuration and then every call via
/// [`dispatch`](RemoteBridge::dispatch). The bridge owns the mapping from
/// identifier to backing instance; this layer never sees it.
pub trait RemoteBridge: Send {
    /// Creates the backing instance for one registered configuration.
    ///
    /// Called once per configuration, in registration order, before any call
    /// is dispatched.
    fn instantiate(&self, config: &CounterConfig);

    /// Executes one call against the backing instance named by `call.id`.
    ///
    /// The bridge is expected to invoke `call.args.callback` (when present)
    /// exactly once after the call executes.
    fn dispatch(&self, call: PendingCall);
}

enum QueueState {
    Buffering(VecDeque<PendingCall>),
    Ready(Box<dyn RemoteBridge>),
}

/// The process-wide entry point calls are issued through.
///
/// Starts out buffering (the stub role) and switches to forwarding when a
/// [`RemoteBridge`] installs. The first install wins; later installs are
/// reported and ignored, mirroring the stub-once contract of the remote
/// loader protocol.
pub struct CallQueue {
    state: Mutex<QueueState>,
    counters: Mutex<Option<CounterSet>>,
    injected: AtomicBool,
}

impl CallQueue {
    /// Creates an isolated queue, buffering until a bridge installs.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::Buffering(VecDeque::new())),
            counters: Mutex::new(None),
            injected: AtomicBool::new(false),
        }
    }

    /// The shared process-wide queue.
    ///
    /// All dispatchers and independently-configured counters share this one
    /// entry point; calls are disambiguated by their identifier. Tests and
    /// embedders that need isolation construct their own queue with
    /// [`CallQueue::new`] instead.
    pub fn global() -> Arc<CallQueue> {
        static GLOBAL: LazyLock<Arc<CallQueue>> = LazyLock::new(|| Arc::new(CallQueue::new()));
        Arc::clone(&GLOBAL)
    }

    /// Records the configurations the eventual bridge will instantiate.
    ///
    /// The first registration wins; the set is immutable afterwards.
    pub fn register(&self, counters: CounterSet) {
        let mut slot = self.counters.lock().unwrap();
        if slot.is_some() {
            warn!("counter set already registered; keeping the first registration");
            return;
        }
        debug!(counters = %counters, "registered counter set");
        *slot = Some(counters);
    }

    /// The registered counter set, empty if registration has not happened.
    pub fn registered(&self) -> CounterSet {
        self.counters.lock().unwrap().clone().unwrap_or_default()
    }

    /// Issues a call: buffered while no bridge is installed, forwarded
    /// directly afterwards. Never blocks the caller on remote work beyond
    /// the bridge's own synchronous dispatch.
    pub fn call(&self, call: PendingCall) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            QueueState::Buffering(buffer) => buffer.push_back(call),
            QueueState::Ready(bridge) => bridge.dispatch(call),
        }
    }

    /// Installs the real implementation, replacing the buffering stub.
    ///
    /// The bridge first instantiates one backing object per registered
    /// configuration, then replays the buffer in strict insertion order.
    /// New calls are held until the drain completes, so a call can never
    /// overtake one issued before it. A second install is ignored.
    pub fn install(&self, bridge: Box<dyn RemoteBridge>) {
        let counters = self.registered();
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            QueueState::Ready(_) => {
                warn!("remote bridge already installed; ignoring replacement");
            }
            QueueState::Buffering(buffer) => {
                for config in counters.iter() {
                    bridge.instantiate(config);
                }
                debug!(buffered = buffer.len(), "draining buffered calls");
                for call in buffer.drain(..) {
                    bridge.dispatch(call);
                }
                *state = QueueState::Ready(bridge);
            }
        }
    }

    /// Number of calls currently buffered.
    pub fn buffered_len(&self) -> usize {
        match &*self.state.lock().unwrap() {
            QueueState::Buffering(buffer) => buffer.len(),
            QueueState::Ready(_) => 0,
        }
    }

    /// Returns `true` once a bridge has installed.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), QueueState::Ready(_))
    }

    /// Marks the remote script as requested; only the first caller gets
    /// `true`. Backs the inject-exactly-once guarantee of the loader.
    pub(crate) fn begin_injection(&self) -> bool {
        !self.injected.swap(true, Ordering::SeqCst)
    }

    /// Snapshot of the buffered calls as plain data, for inspection.
    pub(crate) fn buffered_view(&self) -> Vec<(CounterId, Operation, Vec<serde_json::Value>)> {
        match &*self.state.lock().unwrap() {
            QueueState::Buffering(buffer) => buffer
                .iter()
                .map(|call| (call.id.clone(), call.operation, call.args.values.clone()))
                .collect(),
            QueueState::Ready(_) => Vec::new(),
        }
    }
}

impl Default for CallQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for CallQueue {
    /// Formats the queue as its state tag plus the buffered call count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock().unwrap() {
            QueueState::Buffering(buffer) => {
                write!(f, "CallQueue::Buffering({})", buffer.len())
            }
            QueueState::Ready(_) => f.write_str("CallQueue::Ready"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::CallReply;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Bridge that records instantiations and dispatches, invoking callbacks
    /// with an empty reply.
    #[derive(Default)]
    struct RecordingBridge {
        instantiated: Arc<Mutex<Vec<CounterId>>>,
        calls: Arc<Mutex<Vec<(CounterId, Operation, Vec<Value>)>>>,
    }

    impl RemoteBridge for RecordingBridge {
        fn instantiate(&self, config: &CounterConfig) {
            if let Some(id) = &config.id {
                self.instantiated.lock().unwrap().push(id.clone());
            }
        }

        fn dispatch(&self, mut call: PendingCall) {
            self.calls
                .lock()
                .unwrap()
                .push((call.id.clone(), call.operation, call.args.values.clone()));
            if let Some(callback) = call.args.callback.take() {
                callback(&CallReply::empty());
            }
        }
    }

    fn goal_call(id: u64, target: &str) -> PendingCall {
        PendingCall {
            id: CounterId::Num(id),
            operation: Operation::ReachGoal,
            args: CallArgs::new(vec![json!(target)]),
        }
    }

    #[test]
    fn test_buffers_before_install() {
        let queue = CallQueue::new();
        queue.call(goal_call(1, "signup"));
        assert_eq!(queue.buffered_len(), 1);
        assert!(!queue.is_ready());

        let view = queue.buffered_view();
        assert_eq!(
            view,
            vec![(CounterId::Num(1), Operation::ReachGoal, vec![json!("signup")])]
        );
    }

    #[test]
    fn test_install_drains_in_order() {
        let queue = CallQueue::new();
        queue.call(goal_call(1, "a"));
        queue.call(goal_call(1, "b"));
        queue.call(goal_call(2, "c"));

        let bridge = RecordingBridge::default();
        let calls = Arc::clone(&bridge.calls);
        queue.install(Box::new(bridge));

        assert!(queue.is_ready());
        assert_eq!(queue.buffered_len(), 0);
        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].2, vec![json!("a")]);
        assert_eq!(recorded[1].2, vec![json!("b")]);
        assert_eq!(recorded[2].2, vec![json!("c")]);
    }

    #[test]
    fn test_install_instantiates_registered_configs() {
        let queue = CallQueue::new();
        queue.register(CounterSet::normalize([
            CounterConfig::new(1),
            CounterConfig::new("main"),
        ]));

        let bridge = RecordingBridge::default();
        let instantiated = Arc::clone(&bridge.instantiated);
        queue.install(Box::new(bridge));

        assert_eq!(
            *instantiated.lock().unwrap(),
            vec![CounterId::Num(1), CounterId::from("main")]
        );
    }

    #[test]
    fn test_call_after_install_forwards_directly() {
        let queue = CallQueue::new();
        let bridge = RecordingBridge::default();
        let calls = Arc::clone(&bridge.calls);
        queue.install(Box::new(bridge));

        queue.call(goal_call(1, "signup"));
        assert_eq!(queue.buffered_len(), 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_second_install_is_ignored() {
        let queue = CallQueue::new();
        let first = RecordingBridge::default();
        let first_calls = Arc::clone(&first.calls);
        queue.install(Box::new(first));

        let second = RecordingBridge::default();
        let second_calls = Arc::clone(&second.calls);
        queue.install(Box::new(second));

        queue.call(goal_call(1, "signup"));
        assert_eq!(first_calls.lock().unwrap().len(), 1);
        assert!(second_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_second_registration_keeps_first() {
        let queue = CallQueue::new();
        queue.register(CounterSet::from(CounterConfig::new(1)));
        queue.register(CounterSet::from(CounterConfig::new(2)));
        assert!(queue.registered().contains(&CounterId::Num(1)));
        assert!(!queue.registered().contains(&CounterId::Num(2)));
    }

    #[test]
    fn test_begin_injection_latches() {
        let queue = CallQueue::new();
        assert!(queue.begin_injection());
        assert!(!queue.begin_injection());
    }

    #[test]
    fn test_global_queue_is_shared() {
        assert!(Arc::ptr_eq(&CallQueue::global(), &CallQueue::global()));
    }
}
