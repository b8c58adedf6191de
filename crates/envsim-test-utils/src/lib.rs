//! Test utilities and fixtures for envsim development.
//!
//! Provides a fixed start time ([`t0`]), a probe modality that records
//! what it is asked to apply ([`ProbeModality`]), payload builders, and
//! a one-shot tracing initializer for tests.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::Once;

use chrono::{DateTime, TimeZone, Utc};
use envsim_core::Environment;
use serde_json::{json, Value};

pub use fixtures::{ProbeInput, ProbeModality, ProbeUndo};

/// Fixed simulation start: 2024-01-01T09:00:00Z.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// Environment at [`t0`] holding a fresh [`ProbeModality`].
pub fn probe_environment() -> Environment {
    Environment::new(t0())
        .with_modality(ProbeModality::new(t0()))
        .expect("empty environment accepts the probe")
}

/// Payload that makes the probe record `label`.
pub fn record(label: &str) -> Value {
    json!({ "op": "record", "label": label })
}

/// Payload that makes the probe reject the input with `reason`.
pub fn fail(reason: &str) -> Value {
    json!({ "op": "fail", "reason": reason })
}

static TRACING: Once = Once::new();

/// Install a test-writer `tracing` subscriber filtered by `RUST_LOG`.
/// Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsim_core::ModalityState;

    #[test]
    fn probe_records_and_undoes() {
        let mut env = probe_environment();
        let probe = env.get_mut(ProbeModality::NAME).unwrap();
        let undo = probe.create_undo_data(&record("a")).unwrap();
        probe.apply_input(&record("a"), t0()).unwrap();
        probe.apply_undo(&undo).unwrap();
        assert!(env.state::<ProbeModality>().unwrap().applied.is_empty());
    }

    #[test]
    fn probe_rejects_fail_payload() {
        let mut probe = ProbeModality::new(t0());
        let err = ModalityState::apply_input(&mut probe, &fail("nope"), t0()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
