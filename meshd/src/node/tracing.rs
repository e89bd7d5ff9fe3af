/// Peering-specific tracing macros that automatically include the
/// proto="ibgp" field for log categorization and filtering.

/// Log an info-level message with proto="ibgp" field
#[macro_export]
macro_rules! ibgp_info {
    ($($arg:tt)*) => {
        tracing::info!(proto = "ibgp", $($arg)*)
    };
}

/// Log a warning-level message with proto="ibgp" field
#[macro_export]
macro_rules! ibgp_warn {
    ($($arg:tt)*) => {
        tracing::warn!(proto = "ibgp", $($arg)*)
    };
}

/// Log an error-level message with proto="ibgp" field
#[macro_export]
macro_rules! ibgp_error {
    ($($arg:tt)*) => {
        tracing::error!(proto = "ibgp", $($arg)*)
    };
}

/// Log a debug-level message with proto="ibgp" field
#[macro_export]
macro_rules! ibgp_debug {
    ($($arg:tt)*) => {
        tracing::debug!(proto = "ibgp", $($arg)*)
    };
}
