//! Logging setup for the `dedup` binary.
//!
//! Records go through the `log` facade to an `env_logger` backend. The level
//! comes from `RUST_LOG` when set, otherwise from the CLI flags: `--quiet`
//! shows errors only, the default is info, `-v` is debug and `-vv` trace.

use std::env;
use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Initialize logging once, at the start of `main`.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();

    if env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            buf.timestamp_seconds(),
            record.level(),
            record.args()
        )
    });

    // A second initialisation (tests) is not an error worth surfacing
    let _ = builder.try_init();
}

fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
