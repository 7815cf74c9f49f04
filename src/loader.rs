//! Loader: registers the counter set, arms the buffering stub, and requests
//! the remote script exactly once.
//!
//! The literal `<script>` insertion belongs to the embedding environment;
//! this module only guarantees the protocol around it: the queue is
//! buffering *before* the script is requested, the script is requested at
//! most once per queue, and the injector receives the registered
//! configurations so the remote script can create one backing instance per
//! counter.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::tracker::config::{CounterConfig, CounterSet};
use crate::tracker::dispatcher::Counter;
use crate::tracker::queue::CallQueue;
use crate::tracker::CounterId;

/// Where the remote counter script is served from by default.
pub const DEFAULT_SCRIPT_URL: &str = "https://mc.yandex.ru/metrika/tag.js";

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Location of the remote counter script.
    pub script_url: Url,
    /// Whether the injected script tag should carry the `defer` attribute.
    pub defer: bool,
    /// When `false`, the script is never requested; calls keep buffering and
    /// the API keeps working, which is the intended shape for non-production
    /// builds.
    pub enabled: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            script_url: Url::parse(DEFAULT_SCRIPT_URL).expect("default script url is well-formed"),
            defer: true,
            enabled: true,
        }
    }
}

/// Everything an injector needs to request the remote script.
#[derive(Debug)]
pub struct ScriptRequest<'a> {
    /// Location of the script.
    pub url: &'a Url,
    /// Whether to defer execution.
    pub defer: bool,
    /// The registered configurations; the remote script instantiates one
    /// backing object per entry, addressed by the entry's identifier.
    pub counters: &'a CounterSet,
}

/// Environment-specific script insertion.
///
/// Implementations insert a script tag (or whatever the host environment
/// uses) pointing at `request.url`. The loader calls this at most once per
/// queue, after the stub is armed, so calls issued while the script loads
/// are buffered rather than lost.
pub trait ScriptInjector {
    /// Requests the remote script.
    fn inject(&self, request: &ScriptRequest<'_>);
}

/// Injector that does nothing. Used by tests and as the placeholder in
/// environments where something else owns script insertion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInjector;

impl ScriptInjector for NoopInjector {
    fn inject(&self, _request: &ScriptRequest<'_>) {}
}

/// Wires a counter set to a queue and produces the [`Counter`] dispatcher.
pub struct Loader {
    settings: LoaderSettings,
    injector: Box<dyn ScriptInjector + Send + Sync>,
}

impl Loader {
    /// Creates a loader with the given settings and a [`NoopInjector`].
    pub fn new(settings: LoaderSettings) -> Self {
        Self {
            settings,
            injector: Box::new(NoopInjector),
        }
    }

    /// Replaces the injector, returning `self` for method chaining.
    pub fn with_injector(mut self, injector: Box<dyn ScriptInjector + Send + Sync>) -> Self {
        self.injector = injector;
        self
    }

    /// Registers `configs` on `queue`, resolves the default identifier from
    /// `hint`, requests the remote script (first attach only, and only when
    /// enabled), and returns the dispatcher.
    ///
    /// Never fails: configuration problems degrade with diagnostics, exactly
    /// as [`CounterSet::normalize`] and [`CounterSet::resolve_default`]
    /// document.
    pub fn attach(
        &self,
        queue: Arc<CallQueue>,
        configs: impl IntoIterator<Item = CounterConfig>,
        hint: Option<CounterId>,
    ) -> Counter {
        let counters = CounterSet::normalize(configs);
        if counters.is_empty() {
            warn!("attaching with an empty counter set; calls will target a degraded default");
        }
        let default_id = counters.resolve_default(hint.as_ref());
        queue.register(counters.clone());

        if !self.settings.enabled {
            debug!("tracking disabled; remote script not requested");
        } else if queue.begin_injection() {
            let request = ScriptRequest {
                url: &self.settings.script_url,
                defer: self.settings.defer,
                counters: &counters,
            };
            debug!(url = %self.settings.script_url, "requesting remote counter script");
            self.injector.inject(&request);
        }

        Counter::new(queue, counters, default_id)
    }
}

impl Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
