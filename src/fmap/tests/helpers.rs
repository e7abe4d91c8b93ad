use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::fmap::FmapEngine;

/// Initialize tracing controlled by `RUST_LOG`. Safe to call multiple
/// times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fixed-width 16-byte key from a counter.
pub fn key16(i: u64) -> Vec<u8> {
    format!("key{i:013}").into_bytes()
}

/// Standard 2 MiB pool config.
pub fn create_cfg(path: &Path) -> Config {
    init_tracing();
    Config::new()
        .put_path(path.to_string_lossy())
        .put_size(2 << 20)
        .put_create_if_missing(true)
}

/// Minimum-size pool, for exhaustion tests.
pub fn tiny_cfg(path: &Path) -> Config {
    init_tracing();
    Config::new()
        .put_path(path.to_string_lossy())
        .put_size(64 * 1024)
        .put_create_if_missing(true)
}

/// Open (or reopen) an engine at `path`.
pub fn open_engine(path: &Path) -> FmapEngine {
    FmapEngine::open(create_cfg(path)).expect("fmap open")
}
