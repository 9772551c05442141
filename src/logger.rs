use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::constants::HOTPLUG_NAME;

// Logs to stderr, which udev captures into the journal for RUN+= programs.
struct HookLogger {
    level: AtomicUsize,
}

impl HookLogger {
    const fn new() -> Self {
        Self {
            level: AtomicUsize::new(LevelFilter::Warn as usize),
        }
    }

    fn current_level(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn store_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }
}

impl Log for HookLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.current_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(io::stderr(), "{}", format_record(record));
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn format_record(record: &Record) -> String {
    format!(
        "{}[{}]: [{}] {}",
        HOTPLUG_NAME,
        std::process::id(),
        record.level(),
        record.args()
    )
}

static LOGGER: HookLogger = HookLogger::new();

pub fn init_logger(level: Level) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    set_log_level(level);
    Ok(())
}

pub fn set_log_level(level: Level) {
    LOGGER.store_level(level.to_level_filter());
}

/// The level used when the hook is not asked for debug output.
pub fn level_for(debug: bool) -> Level {
    if debug { Level::Debug } else { Level::Warn }
}
