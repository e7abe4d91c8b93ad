use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::comparator::Comparator;
use crate::config::Config;
use crate::engine::Engine;
use crate::tree3::Tree3Engine;

/// Initialize tracing controlled by `RUST_LOG`. Safe to call multiple
/// times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Standard 2 MiB pool config.
pub fn create_cfg(path: &Path) -> Config {
    init_tracing();
    Config::new()
        .put_path(path.to_string_lossy())
        .put_size(2 << 20)
        .put_create_if_missing(true)
}

/// Open (or reopen) an engine at `path` with the default comparator.
pub fn open_engine(path: &Path) -> Tree3Engine {
    Tree3Engine::open(create_cfg(path)).expect("tree3 open")
}

/// Byte-reversed lexicographic order, for comparator scenarios.
#[derive(Debug, Default)]
pub struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn name(&self) -> &str {
        "reverse_lex"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

/// Open (or reopen) an engine at `path` under the reverse comparator.
pub fn open_reverse_engine(path: &Path) -> crate::status::Result<Tree3Engine> {
    init_tracing();
    let cfg = create_cfg(path).put_comparator(Arc::new(ReverseComparator));
    Tree3Engine::open(cfg)
}

/// Collects `get_all` into key/value vectors.
pub fn collect_all(engine: &dyn Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    engine
        .get_all(&mut |key, value| {
            out.push((key.to_vec(), value.to_vec()));
            ControlFlow::Continue(())
        })
        .expect("get_all");
    out
}

/// Collects just the keys of a streaming query.
pub fn collect_keys(
    run: impl FnOnce(crate::engine::Visitor<'_>) -> crate::status::Result<()>,
) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    run(&mut |key, _| {
        out.push(key.to_vec());
        ControlFlow::Continue(())
    })
    .expect("streaming query");
    out
}
