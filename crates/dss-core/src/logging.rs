//! Logging setup on top of env_logger

use std::io::IsTerminal;

/// Padded label for a log level. Trace is folded into debug.
fn level_label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug | log::Level::Trace => "DEBUG",
    }
}

/// ANSI color for a level on a terminal; info stays uncolored.
fn level_color(level: log::Level) -> Option<&'static str> {
    match level {
        log::Level::Error => Some("\x1b[31m"),
        log::Level::Warn => Some("\x1b[33m"),
        log::Level::Info => None,
        log::Level::Debug | log::Level::Trace => Some("\x1b[2m"),
    }
}

/// Initialize logging. `RUST_LOG` overrides the default level.
///
/// On a terminal lines carry a millisecond timestamp, the thread name and a
/// colored level; otherwise a plain `[LEVEL] message` format is used for
/// log aggregation.
pub fn init_logging(quiet: bool, debug: bool) {
    use std::io::Write;

    let default_level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if std::io::stderr().is_terminal() {
        builder.format(|buf, record| {
            let label = level_label(record.level());
            let thread = std::thread::current();
            let thread = thread.name().unwrap_or("-");
            let ts = buf.timestamp_millis();
            match level_color(record.level()) {
                Some(ansi) => writeln!(
                    buf,
                    "{ts} [{ansi}{label}\x1b[0m] [{thread}] {}",
                    record.args()
                ),
                None => writeln!(buf, "{ts} [{label}] [{thread}] {}", record.args()),
            }
        });
    } else {
        builder.format(|buf, record| {
            writeln!(buf, "[{}] {}", level_label(record.level()), record.args())
        });
    }

    if builder.try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_padded() {
        assert_eq!(level_label(log::Level::Warn), "WARN ");
        assert_eq!(level_label(log::Level::Trace), "DEBUG");
    }

    #[test]
    fn only_problems_and_debug_are_colored() {
        assert_eq!(level_color(log::Level::Error), Some("\x1b[31m"));
        assert_eq!(level_color(log::Level::Info), None);
        assert_eq!(level_color(log::Level::Trace), level_color(log::Level::Debug));
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging(true, false);
        init_logging(false, true);
    }
}
