use anyhow::{Context, Result};
use std::any::Any;
use std::fs;
use std::panic::{self, Location};
use std::path::PathBuf;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MAKEME_LOG";
pub const LOG_FILE: &str = "makeme.log";

pub fn log_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not determine data directory")?;
    Ok(base.join("makeme"))
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the file logger. The terminal belongs to the editor, so nothing
/// is written to stdout. Keep the guard alive until exit or buffered lines
/// are lost.
pub fn init() -> Result<Option<WorkerGuard>> {
    let dir = log_dir()?;
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Ok(Some(guard)),
        // already installed
        Err(_) => Ok(None),
    }
}

/// Routes panic messages to the log. The default hook writes to stderr, which
/// would land on top of the editor's alternate screen.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        error!(target: "panic", "{}", panic_record(info.payload(), info.location()));
    }));
}

pub fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

fn panic_record(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> String {
    match location {
        Some(at) => format!("panicked at {}:{}: {}", at.file(), at.line(), panic_reason(payload)),
        None => format!("panicked: {}", panic_reason(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_from_str_and_string_payloads() {
        let literal = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_reason(&*literal), "boom");
        let formatted = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_reason(&*formatted), "code 7");
        let other = panic::catch_unwind(|| panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_reason(&*other), "unknown");
    }

    #[test]
    fn record_names_the_location() {
        let payload = panic::catch_unwind(|| panic!("bad table")).unwrap_err();
        let here = Location::caller();
        let record = panic_record(&*payload, Some(here));
        assert!(record.starts_with(&format!("panicked at {}:", here.file())));
        assert!(record.ends_with(": bad table"));
        assert_eq!(panic_record(&*payload, None), "panicked: bad table");
    }
}
