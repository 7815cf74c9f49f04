//! # Metrica - Future-Returning Bridge for Asynchronously Loaded Counters
//!
//! A Rust library for driving remotely-loaded web analytics counters through
//! a uniform, future-returning API, even though the backing object (a) may
//! not exist yet when a call is made, (b) reports completion through
//! fire-and-forget callbacks rather than futures, and (c) is addressed by an
//! opaque identifier chosen by the remote script, not by calling code.
//!
//! ## The Problem
//!
//! Analytics scripts load asynchronously, late, and sometimes never. Code
//! that reports a conversion the moment the page becomes interactive races
//! the script tag: call too early and the event vanishes; poll for readiness
//! and you either lose events anyway or block rendering. On top of that, the
//! remote object's API is callback-based, so awaiting a report (for example,
//! before navigating away) means hand-wiring a future around every call.
//!
//! ## The Solution
//!
//! This library installs a buffering queue in front of the remote object.
//! Calls issued before the script has loaded are recorded, not executed;
//! once the remote side installs itself, the buffer drains in strict
//! insertion order. Every operation that supports the callback convention is
//! bridged into a future that resolves when its call actually executes, and
//! a caller-supplied callback keeps working alongside the future.
//!
//! ```text
//!   issue call ──► target resolution ──► callback bridge ──► queue
//!                                                              │
//!                       remote not loaded: buffer (FIFO) ◄─────┤
//!                       remote installed:  forward ◄───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use metrica::loader::{Loader, LoaderSettings};
//! use metrica::tracker::config::CounterConfig;
//! use metrica::tracker::dispatcher::{GoalOptions, Target};
//! use metrica::tracker::queue::CallQueue;
//!
//! // One queue per page; counters share it and are disambiguated by id.
//! let queue = Arc::new(CallQueue::new());
//!
//! let counter = Loader::new(LoaderSettings::default()).attach(
//!     Arc::clone(&queue),
//!     [
//!         CounterConfig::new(26812653).with_option("webvisor", true),
//!         CounterConfig::new(26812654),
//!     ],
//!     None, // default target: the first counter
//! );
//!
//! // Safe to call immediately; the remote script has not loaded yet, so the
//! // call buffers and the returned future settles once it executes.
//! let reported = counter.reach_goal("signup", GoalOptions::default(), Target::Default);
//! assert_eq!(counter.buffered_len(), 1);
//! # drop(reported);
//! ```
//!
//! Awaiting a report:
//!
//! ```rust,ignore
//! counter
//!     .reach_goal("checkout", GoalOptions::default(), Target::Default)
//!     .await?;
//! // The goal has been handed to the remote object; safe to navigate away.
//! ```
//!
//! ## Targeting
//!
//! Every method takes a [`Target`](tracker::dispatcher::Target) as its last
//! parameter: an explicit identifier, a position in the registered set, or
//! the registration-time default. The default itself is resolved from an
//! optional hint with positional-beats-literal semantics; see
//! [`tracker::config`] for the exact rules.
//!
//! ## Failure Model
//!
//! Nothing here throws. Configuration problems degrade with diagnostics at
//! registration; an unresolvable positional target settles the returned
//! future with an error; a script that never loads leaves futures pending
//! forever (no timeout is imposed - that is the protocol's documented
//! shape, not an oversight).
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tracker`] | Core bridge: configuration, queue, callback bridge, dispatcher |
//! | [`loader`] | Stub arming and one-shot script injection |
//! | [`snapshot`] | Serializable state snapshots for diagnostics |
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `demo` | Enables the `clap`-driven demo example |

pub mod loader;
pub mod snapshot;
pub mod tracker;
