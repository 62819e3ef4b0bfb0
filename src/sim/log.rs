use log::LevelFilter;

#[derive(PartialEq, PartialOrd, Debug, Default, Clone, Copy)]
pub enum LogLevel {
    #[default]
    NONE,
    INFO,
    DEBUG,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            // protocol errors and dropped messages still surface
            LogLevel::NONE => LevelFilter::Warn,
            LogLevel::INFO => LevelFilter::Info,
            LogLevel::DEBUG => LevelFilter::Debug,
        }
    }
}

pub fn to_loglevel(ulevel: u64) -> LogLevel {
    match ulevel {
        0 => LogLevel::NONE,
        1 => LogLevel::INFO,
        2 => LogLevel::DEBUG,
        _ => LogLevel::NONE,
    }
}

/// Install the global logger at the configured level. `RUST_LOG`, if set, takes precedence.
/// Calling this more than once is harmless; only the first call installs a logger.
pub fn init(ulevel: u64) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(to_loglevel(ulevel).filter())
        .format_timestamp(None)
        .parse_default_env();
    let _ = builder.try_init();
}
