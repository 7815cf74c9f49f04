//! Demo showing the full pre-load / install / drain lifecycle.
//!
//! Run with:
//! ```bash
//! cargo run --example demo --features demo -- --goal signup
//! ```

use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use metrica::loader::{Loader, LoaderSettings, ScriptInjector, ScriptRequest};
use metrica::snapshot::TrackerSnapshot;
use metrica::tracker::config::CounterConfig;
use metrica::tracker::dispatcher::{GoalOptions, HitOptions, Target};
use metrica::tracker::queue::{CallQueue, PendingCall, RemoteBridge};
use metrica::tracker::CallReply;

/// Exercise the counter bridge against a simulated remote script.
#[derive(Debug, Parser)]
struct Args {
    /// Counter identifier to register.
    #[arg(long, default_value_t = 26812653)]
    counter_id: u64,

    /// Goal name to report.
    #[arg(long, default_value = "signup")]
    goal: String,

    /// Page URL to report a view for.
    #[arg(long, default_value = "/landing")]
    page: String,

    /// Pretty-print the state snapshots.
    #[arg(long)]
    pretty: bool,
}

/// Stands in for the embedding page: just prints what would be inserted.
struct PrintingInjector;

impl ScriptInjector for PrintingInjector {
    fn inject(&self, request: &ScriptRequest<'_>) {
        println!(
            "[inject] <script src=\"{}\"{}> for counters [{}]",
            request.url,
            if request.defer { " defer" } else { "" },
            request.counters
        );
    }
}

/// Stands in for the loaded remote script: prints every dispatch and honors
/// the callback contract.
struct PrintingRemote;

impl RemoteBridge for PrintingRemote {
    fn instantiate(&self, config: &CounterConfig) {
        println!("[remote] instantiate {:?}", config);
    }

    fn dispatch(&self, mut call: PendingCall) {
        println!(
            "[remote] {} -> {} {:?}",
            call.id,
            call.operation,
            call.args.values
        );
        if let Some(callback) = call.args.callback.take() {
            callback(&CallReply::with_payload(json!("demo-client-id")));
        }
    }
}

fn print_snapshot(label: &str, snapshot: &TrackerSnapshot, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(snapshot)
    } else {
        serde_json::to_string(snapshot)
    }
    .expect("snapshot serializes");
    println!("[state] {}: {}", label, rendered);
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let args = Args::parse();

    let queue = Arc::new(CallQueue::new());
    let counter = Loader::new(LoaderSettings::default())
        .with_injector(Box::new(PrintingInjector))
        .attach(
            Arc::clone(&queue),
            [CounterConfig::new(args.counter_id).with_option("webvisor", true)],
            None,
        );

    // Issue calls while the "script" is still loading; everything buffers.
    let goal = counter.reach_goal(
        &args.goal,
        GoalOptions::default()
            .with_params(json!({"source": "demo"}))
            .with_callback(|_| println!("[caller] goal callback fired")),
        Target::Default,
    );
    let hit = counter.hit(&args.page, HitOptions::default(), Target::Default);
    let client_id = counter.get_client_id(Target::Default);
    counter.set_user_id("demo-user", Target::Default);

    print_snapshot("before install", &TrackerSnapshot::capture(&counter), args.pretty);

    // The remote script "arrives" and replays the buffer in order.
    queue.install(Box::new(PrintingRemote));

    println!("[caller] goal resolved: {:?}", goal.await);
    println!("[caller] hit resolved: {:?}", hit.await);
    println!("[caller] client id: {:?}", client_id.await);

    print_snapshot("after install", &TrackerSnapshot::capture(&counter), args.pretty);
}
