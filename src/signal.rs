//! Ctrl+C handling. The handler only flips a shared flag; the pipeline checks
//! it between files, so no file is ever left half deleted or half moved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit code after an interruption (128 + SIGINT)
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Install the Ctrl+C handler and return the flag it sets.
pub fn install_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);

    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            // Second Ctrl+C: give up immediately
            std::process::exit(EXIT_CODE_INTERRUPTED);
        }
        eprintln!("\nInterrupted. Finishing the current file and saving progress...");
    })?;

    Ok(flag)
}
