use std::{env, fmt::Display};

use colored::{Color, Colorize};
use log::{Level, LevelFilter, Metadata, SetLoggerError};

/// Overrides how verbose the tonedeaf crates are, e.g. `debug`
pub const LOG_LEVEL_VARIABLE: &str = "TONEDEAF_LOG";

/// External crates only need to log warnings and errors
const EXTERNAL_LEVEL: LevelFilter = LevelFilter::Warn;
const DEFAULT_LEVEL: LevelFilter = LevelFilter::Info;

/// Crate name, label and label color of every tonedeaf crate
const LOCAL_TARGETS: [(&str, &str, Color); 4] = [
    ("tonedeaf", "MAIN", Color::BrightCyan),
    ("tonedeaf_server", "SERVER", Color::BrightGreen),
    ("tonedeaf_collab", "COLLAB", Color::BrightMagenta),
    ("tonedeaf_core", "CORE", Color::Blue),
];

/// Installs the global logger. Fails if one is already installed.
///
/// Warnings and errors go to stderr, everything else to stdout.
pub fn init_logger() -> Result<(), SetLoggerError> {
    let local_level = env::var(LOG_LEVEL_VARIABLE)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_LEVEL);

    let quiet = fern::Dispatch::new()
        .filter(|meta| meta.level() > Level::Warn)
        .chain(std::io::stdout());

    let loud = fern::Dispatch::new()
        .filter(|meta| meta.level() <= Level::Warn)
        .chain(std::io::stderr());

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{:^5} {} {:^8} {}",
                level_badge(record.level()),
                chrono::Local::now()
                    .format("%H:%M:%S")
                    .to_string()
                    .bright_black(),
                Target::of(record.target()),
                message
            ))
        })
        .filter(move |meta| is_enabled(meta, local_level))
        .chain(quiet)
        .chain(loud)
        .apply()
}

fn is_enabled(meta: &Metadata, local_level: LevelFilter) -> bool {
    match Target::of(meta.target()) {
        Target::Local { .. } => meta.level() <= local_level,
        Target::External(_) => meta.level() <= EXTERNAL_LEVEL,
    }
}

#[derive(Debug, PartialEq)]
enum Target<'a> {
    Local { label: &'static str, color: Color },
    External(&'a str),
}

impl<'a> Target<'a> {
    fn of(target: &'a str) -> Self {
        let module = target.split("::").next().unwrap_or_default();

        LOCAL_TARGETS
            .iter()
            .find(|(name, _, _)| *name == module)
            .map(|&(_, label, color)| Self::Local { label, color })
            .unwrap_or(Self::External(module))
    }
}

impl Display for Target<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Self::Local { label, color } => label.color(*color),
            Self::External(module) => module.clear(),
        };

        Display::fmt(&result, f)
    }
}

fn level_badge(level: Level) -> String {
    match level {
        Level::Error => " ERR ".black().on_red().bold().to_string(),
        Level::Warn => " WRN ".black().on_yellow().bold().to_string(),
        Level::Info => " INF ".black().on_blue().bold().to_string(),
        Level::Debug => " DBG ".white().on_black().to_string(),
        Level::Trace => " TRC ".to_string(),
    }
}
