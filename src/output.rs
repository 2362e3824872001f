//! Output formatting module.

pub mod report;
pub mod rollback;
pub mod table;

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

pub use report::save_report;
pub use rollback::print_rollback_guidance;
pub use table::*;

/// Spinner for waits of unknown length. Hidden when stdout is not a terminal.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
