use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub verbose: bool,
    /// Append log records here instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    fn default_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else if self.log_file.is_some() {
            log::LevelFilter::Info
        } else {
            // Status messages already reach the console through observers.
            log::LevelFilter::Off
        }
    }
}

pub fn init(cfg: &LogConfig) {
    use env_logger::Target;
    use std::fs;
    use std::io;

    // If the log file cannot be opened, fall back to stderr.
    let mut file_error = None;
    let target = match cfg.log_file {
        Some(ref path) => (|| -> io::Result<Target> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Ok(Target::Pipe(Box::new(file)))
        })()
        .unwrap_or_else(|err| {
            file_error = Some(err);
            Target::Stderr
        }),
        None => Target::Stderr,
    };

    let level = if file_error.is_some() {
        log::LevelFilter::Warn.max(cfg.default_level())
    } else {
        cfg.default_level()
    };

    // RUST_LOG takes precedence over the computed default.
    let initialised = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(target)
        .try_init()
        .is_ok();

    if let (true, Some(err), Some(path)) = (initialised, file_error, cfg.log_file.as_ref()) {
        log::warn!(
            "Unable to open log file {}: {}; logging to stderr",
            path.display(),
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_logging_is_quiet_unless_verbose() {
        assert_eq!(LogConfig::default().default_level(), log::LevelFilter::Off);
        let verbose = LogConfig {
            verbose: true,
            log_file: None,
        };
        assert_eq!(verbose.default_level(), log::LevelFilter::Debug);
        let to_file = LogConfig {
            verbose: false,
            log_file: Some(PathBuf::from("/tmp/uniflash.log")),
        };
        assert_eq!(to_file.default_level(), log::LevelFilter::Info);
    }
}
