#![forbid(unsafe_code)]

//! Zero-cost debug tracing controlled by environment variable.
//!
//! Set `FTUI_MOUNT_DEBUG_TRACE=1` to print lane hops, frame ticks and
//! transaction boundaries to stderr. When disabled (the default) each call
//! site is a single static bool load.
//!
//! ```ignore
//! ftui_lanes::debug_trace!("tick {} at {:?}", frame.frame_index, frame.timestamp);
//! ```

use std::sync::LazyLock;
use std::time::Instant;

static DEBUG_TRACE_ENABLED: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("FTUI_MOUNT_DEBUG_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Check if debug tracing is enabled.
#[inline]
pub fn is_enabled() -> bool {
    *DEBUG_TRACE_ENABLED
}

/// Milliseconds since the first trace call, for correlating lanes.
#[inline]
pub fn elapsed_ms() -> u64 {
    START_TIME.elapsed().as_millis() as u64
}

/// Print a timestamped line to stderr when `FTUI_MOUNT_DEBUG_TRACE=1`.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug_trace::is_enabled() {
            eprintln!(
                "[MOUNT {:>8}ms {:?}] {}",
                $crate::debug_trace::elapsed_ms(),
                $crate::current_lane(),
                format_args!($($arg)*)
            );
        }
    };
}
