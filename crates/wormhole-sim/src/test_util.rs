use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonically increasing counter for generating unique scratch directories.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a fresh, not-yet-created directory path under the system temp dir.
///
/// Combines the prefix, process ID, and an atomic counter so tests running
/// in parallel never share an artifact directory.
pub fn unique_scratch_dir(prefix: &str) -> PathBuf {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    std::env::temp_dir().join(format!("wormhole-{prefix}-{pid:x}-{seq}"))
}
