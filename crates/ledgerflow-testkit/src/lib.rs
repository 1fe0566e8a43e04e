//! Scripted mocks and fixtures for testing the ledgerflow stack.
//!
//! Provides an in-memory journal, a fully scriptable coordinator backend,
//! and a tracing initializer for tests that want log output.

#![forbid(unsafe_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod backend;
pub mod journal;

pub use backend::ScriptedBackend;
pub use journal::MemoryJournal;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a compact tracing subscriber once per process. Respects
/// `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}
