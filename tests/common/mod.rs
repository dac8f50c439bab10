//! Shared helpers for the GPU integration tests.
//!
//! Tests that need a device call [`gpu`] first.  Without an adapter they
//! print a note and return early, unless `WGPU_BY_EXAMPLE_REQUIRE_GPU` is
//! set, in which case the missing device is a failure.

#![allow(dead_code)]

use wgpu_by_example::{GpuContext, GpuError};

pub fn require_gpu() -> bool {
    let Ok(raw) = std::env::var("WGPU_BY_EXAMPLE_REQUIRE_GPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_gpu() {
        panic!("WGPU_BY_EXAMPLE_REQUIRE_GPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// A fresh device for `test_name`, or `None` when the test should skip.
pub fn gpu(test_name: &str) -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    match GpuContext::new_blocking() {
        Ok(context) => Some(context),
        Err(GpuError::UnsupportedBackend(reason)) => {
            skip_or_panic(test_name, &reason);
            None
        }
        Err(err) => panic!("failed to create GPU context: {err}"),
    }
}

/// Fraction of positions where `a` and `b` differ by more than `tolerance`.
pub fn mismatch_fraction(a: &[u8], b: &[u8], tolerance: u8) -> f64 {
    assert_eq!(a.len(), b.len());
    let bad = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.abs_diff(**y) > tolerance)
        .count();
    bad as f64 / a.len() as f64
}
