//! Role-specific client behavior

pub mod app;
pub mod browser_cdt;
pub mod cdt;
pub mod cli;

/// Reply sent to a debugger socket that has nothing to talk to.
pub(crate) const NO_DEBUG_TARGET: &str =
    "There is no valid app or plugin session applicable for this CDT client.";
