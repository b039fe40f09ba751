//! Terminal logging shared by the server and the command-line tools.

use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// HTTP stacks whose records are dropped unless the level is `TRACE`.
const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "tower", "axum"];

/// Where records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Errors to stderr, everything else to stdout.
    Mixed,
    /// Everything to stderr, leaving stdout for program output.
    Stderr,
}

/// Install the global logger. Fails when one is already installed.
pub fn init(level: LevelFilter, output: Output) -> Result<(), SetLoggerError> {
    let mode = match output {
        Output::Mixed => TerminalMode::Mixed,
        Output::Stderr => TerminalMode::Stderr,
    };

    let mut builder = ConfigBuilder::new();
    builder.set_time_format_rfc3339();
    for module in ignored_modules(level) {
        builder.add_filter_ignore_str(module);
    }

    TermLogger::init(level, builder.build(), mode, ColorChoice::Auto)
}

/// Server logging at `LOG_LEVEL_FILTER`.
pub fn init_from_config(config: &Config) -> Result<(), SetLoggerError> {
    init(config.log_level_filter, Output::Mixed)
}

fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
    if level == LevelFilter::Trace {
        &[]
    } else {
        NOISY_MODULES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_shows_dependency_records() {
        assert!(ignored_modules(LevelFilter::Trace).is_empty());
    }

    #[test]
    fn lower_levels_hide_http_stacks() {
        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
        ] {
            let ignored = ignored_modules(level);
            for module in ["hyper", "reqwest", "rustls", "axum"] {
                assert!(ignored.contains(&module), "{module} shown at {level}");
            }
        }
    }

    #[test]
    fn own_crates_are_never_hidden() {
        // Filters match on module path prefixes.
        for module in NOISY_MODULES {
            assert!(!"session_auth::router".starts_with(module));
            assert!(!"sessiongate".starts_with(module));
        }
    }
}
