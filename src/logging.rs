use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Default directive applied on top of `RUST_LOG`
const DEFAULT_DIRECTIVE: &str = "sales_etl=info";

/// Install console logging plus a JSON log file rotated daily under `log_dir`.
///
/// Console output goes to stderr so stdout stays free for reports. Keep the
/// returned guard alive until exit or buffered file lines are lost.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Option<WorkerGuard> {
    let log_dir = log_dir.as_ref();

    let filter = EnvFilter::from_default_env().add_directive(
        DEFAULT_DIRECTIVE
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );

    // Console only when the log directory is unusable
    let (file_layer, guard) = match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "sales_etl.log");
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().json().with_writer(non_blocking_writer)), Some(guard))
        }
        Err(_) => (None, None),
    };

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_writes_to_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        let guard = init_logging(&log_dir);
        tracing::info!("logging initialised");

        assert!(guard.is_some());
        assert!(log_dir.is_dir());
    }
}
