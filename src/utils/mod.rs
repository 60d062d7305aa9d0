//! Utility modules for the scanner

pub mod file_input;
pub mod target_parser;

pub use file_input::read_target_file;
pub use target_parser::{expand, TargetSpec};

/// Initialize the global logger.
///
/// `RUST_LOG` still takes precedence when set.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

/// Raise the open file limit so every worker can hold a socket (Unix only)
#[cfg(unix)]
pub fn raise_fd_limit(workers: usize) -> u64 {
    use rlimit::Resource;

    let wanted = workers as u64 + 256;
    let (soft, hard) = match Resource::NOFILE.get() {
        Ok(limits) => limits,
        Err(e) => {
            log::warn!("Could not get file descriptor limit: {}", e);
            return 0;
        }
    };

    if soft >= wanted {
        return soft;
    }

    let target = wanted.min(hard);
    match Resource::NOFILE.set(target, hard) {
        Ok(()) => {
            log::debug!("Raised file descriptor limit from {} to {}", soft, target);
            target
        }
        Err(e) => {
            log::warn!("Failed to raise file descriptor limit to {}: {}", target, e);
            soft
        }
    }
}

#[cfg(not(unix))]
pub fn raise_fd_limit(_workers: usize) -> u64 {
    0
}
