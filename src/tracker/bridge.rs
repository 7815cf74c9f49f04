//! Conversion of the remote callback convention into awaitable futures.
//!
//! The remote object reports completion by invoking a fire-and-forget
//! callback carried in the call's options. [`bridge`] composes that slot so
//! the caller's own callback (if any) still fires with the same reply, and a
//! [`CallFuture`] resolves immediately afterwards with a resolution value
//! chosen by the call site.
//!
//! The bridge never rejects a future; rejection is the dispatcher's business
//! (a target that cannot be resolved at all is a different situation from
//! one that is merely not loaded yet).
//!
//! Operations that take no options object (reading the client identifier)
//! do not go through [`bridge`]: the dispatcher passes a plain callback
//! directly and wraps the reply itself. That path is a structurally
//! different shape and deliberately kept separate.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::tracker::{CallReply, TrackerCallback, TrackerError};

/// Implemented by every options struct that carries an optional callback.
pub trait CallbackOptions {
    /// Access to the callback slot the remote convention invokes.
    fn callback_mut(&mut self) -> &mut Option<TrackerCallback>;
}

/// Replaces the callback slot of `options` with a composed callback and
/// returns the reshaped options together with the future it settles.
///
/// The composed callback, when the remote side invokes it:
///
/// 1. invokes the original caller-supplied callback (if any) with the same
///    [`CallReply`] binding, then
/// 2. resolves the future with `resolution`.
///
/// The options are consumed and returned, never mutated behind the caller's
/// back; a caller that wants to reuse an options value builds a fresh one
/// per call, since each call's future must settle independently. The
/// composed callback is `FnOnce`, so a second invocation is unrepresentable.
pub fn bridge<O: CallbackOptions>(mut options: O, resolution: Value) -> (O, CallFuture) {
    let original = options.callback_mut().take();
    let (tx, rx) = oneshot::channel();
    let composed: TrackerCallback = Box::new(move |reply: &CallReply| {
        if let Some(callback) = original {
            callback(reply);
        }
        let _ = tx.send(Ok(resolution));
    });
    *options.callback_mut() = Some(composed);
    (options, CallFuture::waiting(rx))
}

enum FutureState {
    /// Outcome known at creation time (dispatcher-side rejection, mostly).
    Settled(Option<Result<Value, TrackerError>>),
    /// Waiting for the composed callback to fire.
    Waiting(oneshot::Receiver<Result<Value, TrackerError>>),
}

/// The awaitable half of a bridged call.
///
/// Resolves with the call-site-chosen resolution value once the remote side
/// has executed the call and invoked its callback. While the call sits in
/// the buffer the future stays pending; if the script never loads it stays
/// pending forever. If the queue is dropped with the call still buffered,
/// the future settles with [`TrackerError::Disconnected`].
pub struct CallFuture {
    state: FutureState,
}

impl CallFuture {
    pub(crate) fn waiting(rx: oneshot::Receiver<Result<Value, TrackerError>>) -> Self {
        Self {
            state: FutureState::Waiting(rx),
        }
    }

    /// A future that is already rejected. Used by the dispatcher when the
    /// target cannot be resolved at call time.
    pub(crate) fn rejected(error: TrackerError) -> Self {
        Self {
            state: FutureState::Settled(Some(Err(error))),
        }
    }
}

impl Future for CallFuture {
    type Output = Result<Value, TrackerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Settled(outcome) => match outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => panic!("CallFuture polled after completion"),
            },
            FutureState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(TrackerError::Disconnected))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeOptions {
        callback: Option<TrackerCallback>,
    }

    impl CallbackOptions for FakeOptions {
        fn callback_mut(&mut self) -> &mut Option<TrackerCallback> {
            &mut self.callback
        }
    }

    #[tokio::test]
    async fn test_resolves_with_resolution_value() {
        let (mut options, future) = bridge(FakeOptions::default(), json!({"goal": "signup"}));
        let callback = options.callback_mut().take().unwrap();
        callback(&CallReply::empty());
        assert_eq!(future.await, Ok(json!({"goal": "signup"})));
    }

    #[tokio::test]
    async fn test_original_callback_fires_before_settlement() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&fired);
        let options = FakeOptions {
            callback: Some(Box::new(move |_| {
                observer.fetch_add(1, Ordering::SeqCst);
            })),
        };

        let (mut options, mut future) = bridge(options, json!("done"));
        assert!((&mut future).now_or_never().is_none());

        let composed = options.callback_mut().take().unwrap();
        composed(&CallReply::empty());

        // The original callback has already run by the time the future can
        // settle, and it ran exactly once.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(future.await, Ok(json!("done")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_original_callback_sees_the_reply() {
        let seen = Arc::new(Mutex::new(None));
        let observer = Arc::clone(&seen);
        let options = FakeOptions {
            callback: Some(Box::new(move |reply: &CallReply| {
                *observer.lock().unwrap() = reply.payload().cloned();
            })),
        };

        let (mut options, future) = bridge(options, json!(null));
        let composed = options.callback_mut().take().unwrap();
        composed(&CallReply::with_payload(json!("client-77")));

        assert_eq!(*seen.lock().unwrap(), Some(json!("client-77")));
        assert!(future.await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_until_callback_runs() {
        let (_options, mut future) = bridge(FakeOptions::default(), json!(1));
        assert!((&mut future).now_or_never().is_none());
        assert!((&mut future).now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_dropped_callback_disconnects() {
        let (options, future) = bridge(FakeOptions::default(), json!(1));
        drop(options);
        assert_eq!(future.await, Err(TrackerError::Disconnected));
    }

    #[tokio::test]
    async fn test_rejected_future() {
        let future = CallFuture::rejected(TrackerError::UnknownTarget { position: 3, len: 1 });
        assert_eq!(
            future.await,
            Err(TrackerError::UnknownTarget { position: 3, len: 1 })
        );
    }
}
