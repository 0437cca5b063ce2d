#![forbid(unsafe_code)]

//! Session configuration.
//!
//! Every struct here has a `Default` that matches production behaviour and
//! `with_*` builders for overrides. [`MountConfig::from_env`] layers
//! environment overrides on top of the defaults:
//!
//! | Variable                | Effect                                   |
//! |-------------------------|------------------------------------------|
//! | `FTUI_MOUNT_REFRESH_HZ` | nominal refresh rate for the frame clock |
//! | `FTUI_MOUNT_PREALLOC`   | `0`/`false` disables preallocation       |

use std::time::Duration;

use ftui_lanes::FrameClockConfig;

/// Default share of the frame period that must remain before building
/// another preallocated instance.
pub const DEFAULT_MIN_REMAINING_FRACTION: f64 = 0.5;

/// Controls the idle-time instance builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreallocationConfig {
    /// Accept and process preallocation requests.
    pub enabled: bool,
    /// Stop building once less than this share of the period remains
    /// before the next frame deadline.
    pub min_remaining_fraction: f64,
    /// Keep instances hidden until their first non-empty layout.
    pub suppress_unlaid_instances: bool,
}

impl Default for PreallocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_remaining_fraction: DEFAULT_MIN_REMAINING_FRACTION,
            suppress_unlaid_instances: true,
        }
    }
}

impl PreallocationConfig {
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the remaining-time fraction; clamped to `[0, 1]` when used.
    #[must_use]
    pub fn with_min_remaining_fraction(mut self, fraction: f64) -> Self {
        self.min_remaining_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_suppress_unlaid_instances(mut self, suppress: bool) -> Self {
        self.suppress_unlaid_instances = suppress;
        self
    }

    /// Time that must remain before the deadline to keep building.
    pub fn min_remaining(&self, period: Duration) -> Duration {
        let fraction = if self.min_remaining_fraction.is_finite() {
            self.min_remaining_fraction.clamp(0.0, 1.0)
        } else {
            DEFAULT_MIN_REMAINING_FRACTION
        };
        period.mul_f64(fraction)
    }
}

/// What the coordinator does with several batches queued before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// Apply every pending batch in submission order.
    ///
    /// The pending queue is unbounded: while the UI lane is stalled it holds
    /// every batch submitted in the meantime.
    #[default]
    ApplyAll,
    /// Apply only the newest pending batch; older ones are dropped.
    ///
    /// Only sound when every batch is a complete description of the tree.
    LatestOnly,
}

/// Top-level configuration for a [`MountSession`](crate::MountSession).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MountConfig {
    pub frame_clock: FrameClockConfig,
    pub preallocation: PreallocationConfig,
    pub coalesce: CoalescePolicy,
}

impl MountConfig {
    #[must_use]
    pub fn with_frame_clock(mut self, frame_clock: FrameClockConfig) -> Self {
        self.frame_clock = frame_clock;
        self
    }

    #[must_use]
    pub fn with_preallocation(mut self, preallocation: PreallocationConfig) -> Self {
        self.preallocation = preallocation;
        self
    }

    #[must_use]
    pub fn with_coalesce(mut self, coalesce: CoalescePolicy) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("FTUI_MOUNT_REFRESH_HZ") {
            match raw.trim().parse::<f64>() {
                Ok(hz) => self.frame_clock = self.frame_clock.with_refresh_rate(hz),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid FTUI_MOUNT_REFRESH_HZ"),
            }
        }
        if let Some(raw) = lookup("FTUI_MOUNT_PREALLOC") {
            let value = raw.trim();
            if value == "0" || value.eq_ignore_ascii_case("false") {
                self.preallocation.enabled = false;
            } else if value == "1" || value.eq_ignore_ascii_case("true") {
                self.preallocation.enabled = true;
            } else {
                tracing::warn!(value = %raw, "ignoring invalid FTUI_MOUNT_PREALLOC");
            }
        }
        self
    }
}
