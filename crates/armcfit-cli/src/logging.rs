use crate::error::{CliError, Result};
use std::fs::File;
use std::path::Path;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self},
    prelude::*,
};

/// `-q` wins over `-v`: a quiet fit still reports fatal errors such as a failed seed evaluation.
fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Compact stderr output plus an optional log file that keeps targets and thread ids, so
/// events from rayon workers and the engine process runner can be told apart.
fn build_subscriber(
    verbosity: u8,
    quiet: bool,
    log_file: Option<File>,
) -> impl Subscriber + Send + Sync + 'static {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(level_filter(verbosity, quiet))
        .with(stderr_layer)
        .with(file_layer)
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let file = log_file
        .map(|path| File::create(path).map_err(CliError::Io))
        .transpose()?;
    build_subscriber(verbosity, quiet, file).init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing::{debug, error, info, trace, warn};

    fn capture(verbosity: u8, quiet: bool, emit: impl FnOnce()) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.log");
        let file = File::create(&path).unwrap();
        tracing::subscriber::with_default(build_subscriber(verbosity, quiet, Some(file)), emit);
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(9, false), LevelFilter::TRACE);
    }

    #[test]
    fn quiet_overrides_verbosity_and_keeps_only_errors() {
        assert_eq!(level_filter(0, true), LevelFilter::ERROR);
        assert_eq!(level_filter(3, true), LevelFilter::ERROR);

        let content = capture(3, true, || {
            warn!(consecutive = 3, "Repeated evaluation failures.");
            info!("Block finished.");
            error!("Seed evaluation failed.");
        });
        assert!(content.contains("Seed evaluation failed."));
        assert!(!content.contains("Repeated evaluation failures."));
        assert!(!content.contains("Block finished."));
    }

    #[test]
    fn debug_log_file_records_step_fields() {
        let content = capture(2, false, || {
            debug!(step = 7, accepted = true, phi = 1.5, "Step evaluated.");
            trace!("Cache hit.");
        });
        assert!(content.contains("Step evaluated."));
        assert!(content.contains("step=7"));
        assert!(content.contains("accepted=true"));
        assert!(content.contains("ThreadId"));
        assert!(!content.contains("Cache hit."));
    }

    #[test]
    fn default_verbosity_shows_warnings_but_not_block_progress() {
        let content = capture(0, false, || {
            info!(iteration = 0, acceptance_rate = 0.5, "Block finished.");
            warn!("iter_len is not a multiple of sub_iter_len; trailing iterations are dropped.");
        });
        assert!(content.contains("trailing iterations are dropped"));
        assert!(!content.contains("Block finished."));
    }

    #[test]
    #[serial]
    fn invalid_log_file_path_propagates_error() {
        let invalid_path = Path::new("/");

        if cfg!(unix) && invalid_path.is_dir() {
            let result = setup_logging(0, false, Some(invalid_path));
            assert!(matches!(result, Err(CliError::Io(_))));
        }
    }
}
