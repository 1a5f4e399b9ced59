pub mod bootstrap;
pub mod config_cmd;
pub mod watch;

use std::time::Duration;

/// Render an optional duration as milliseconds, or "-" when unmeasured.
pub(crate) fn fmt_ms(d: Option<Duration>) -> String {
    d.map_or_else(|| "-".into(), |d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
}
