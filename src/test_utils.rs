//! Test utilities for smart-launch
//!
//! This module provides common test utilities including temporary directory
//! management, test file creation, environments and assertion helpers.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use url::Url;

use crate::env::HeadlessEnvironment;
use crate::error::SmartError;

/// Create a temporary directory for testing
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Headless environment at `url` backed by fresh in-memory storage
pub fn headless_env(url: &str) -> Arc<HeadlessEnvironment> {
    Arc::new(HeadlessEnvironment::with_memory_storage(
        Url::parse(url).expect("valid test url"),
    ))
}

/// Assert that an error is a [`SmartError`] matching `predicate`
///
/// # Panics
///
/// Panics if the error is not a `SmartError` or the predicate fails
pub fn assert_smart_error(err: &anyhow::Error, predicate: impl FnOnce(&SmartError) -> bool) {
    match err.downcast_ref::<SmartError>() {
        Some(e) => assert!(predicate(e), "unexpected SmartError variant: {:?}", e),
        None => panic!("Expected SmartError, got: {:?}", err),
    }
}
