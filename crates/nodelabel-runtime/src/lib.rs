//! `nodelabel-runtime` – the long-running side of the worker.
//!
//! # Modules
//!
//! - [`worker`] – [`Worker`][worker::Worker]: the discovery scheduler.  Runs
//!   discovery and publish passes on a timer, reconfigures on config-file
//!   changes, reconnects the publisher on credential rotation and stops on
//!   cancellation.
//! - [`watch`] – [`Watcher`][watch::Watcher]: filesystem watch actor with
//!   cancel-then-replace semantics.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with optional OTLP span export.

pub mod telemetry;
pub mod watch;
pub mod worker;

pub use worker::{PUBLISH_TIMEOUT, Triggers, Worker, WorkerArgs};
