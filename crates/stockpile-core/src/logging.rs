//! Logging setup: env_logger, routed through indicatif on a TTY

use indicatif::MultiProgress;

/// Noisy dependencies capped at `warn` unless RUST_LOG says otherwise
const QUIET_TARGETS: &[&str] = &["rdkafka", "object_store", "reqwest", "hyper"];

/// ANSI color and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Default filter string: our level, with chatty client crates held at warn
fn default_filter(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    let mut filter = level.to_string();
    for target in QUIET_TARGETS {
        filter.push_str(&format!(",{target}=warn"));
    }
    filter
}

/// Logger that prints above the status spinner instead of through it
pub struct SpinnerLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl SpinnerLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for SpinnerLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize logging.
///
/// With `multi` (TTY) lines go through the progress display; otherwise
/// plain timestamped lines for log aggregation.
pub fn init_logging(debug: bool, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(default_filter(debug));

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env).build();
        let max_level = logger.filter();

        if log::set_boxed_logger(Box::new(SpinnerLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "{} [{label}] {}", buf.timestamp_millis(), record.args())
            })
            .try_init();
    }
}
