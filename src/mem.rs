//! Low-overhead memory watcher. Identifier registries and the hypergraph side tables
//! are fully in memory, so long runs check available RAM between lines.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use sysinfo::{System, SystemExt};

struct MemState {
    sys: System,
    last_check: Instant,
    last_frac: f64, // available / total (0.0..1.0)
}

static STATE: OnceLock<Mutex<MemState>> = OnceLock::new();
static WARNED: AtomicBool = AtomicBool::new(false);
const REFRESH_EVERY: Duration = Duration::from_millis(500);

/// Returns a recent estimate of available memory fraction (0.0..1.0).
pub fn available_memory_fraction() -> f64 {
    let m = STATE.get_or_init(|| {
        let mut s = System::new();
        s.refresh_memory();
        Mutex::new(MemState {
            sys: s,
            last_check: Instant::now() - REFRESH_EVERY * 2,
            last_frac: 1.0,
        })
    });
    let mut st = m.lock();
    let now = Instant::now();
    if now.duration_since(st.last_check) >= REFRESH_EVERY {
        st.sys.refresh_memory();
        let total = st.sys.total_memory() as f64;
        let avail = st.sys.available_memory() as f64;
        st.last_frac = if total > 0.0 { (avail / total).clamp(0.0, 1.0) } else { 1.0 };
        st.last_check = now;
    }
    st.last_frac
}

/// Returns true if the cached available-memory fraction is below `threshold` (e.g., 0.10 for 10%).
pub fn is_low_memory(threshold: f64) -> bool {
    available_memory_fraction() < threshold
}

/// Cooperative backoff: yields briefly when under the threshold and warns once per process.
pub fn maybe_throttle_low_memory(threshold: f64) {
    if is_low_memory(threshold) {
        if !WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                available = available_memory_fraction(),
                "Low memory: identifier tables are held in RAM; consider TwoPass dating or a smaller run"
            );
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}
