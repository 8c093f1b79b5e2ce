/// Component-gated report line.
///
/// Forwards to `log::debug!` with the given target only when the component's
/// bit is set in the process-wide reporting mask. The metrics table and the
/// run banners never go through this macro.
macro_rules! report {
    ($bit:expr, $target:expr, $($arg:tt)*) => {
        if $crate::report::enabled($bit) {
            log::debug!(target: $target, $($arg)*);
        }
    };
}
