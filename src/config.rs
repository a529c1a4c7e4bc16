//! Typed configuration recognized by the crate.
//!
//! There is no bundled file-format parser here: loading a config file from
//! disk is a front-end concern. This type is the in-memory shape every
//! front-end (CLI, GUI, service) constructs and hands in.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub verbose_logging: bool,
    pub log_level: LogLevel,
    pub io_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub chunk_size: Option<u32>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: f64,
    pub demo_mode: bool,
    pub real_only: bool,
    pub trace_usb: bool,
    pub trace_mtp: bool,
    pub trace_transfer: bool,
    pub force_chunked: bool,
    pub disable_partial: bool,
    pub vendor_override: Option<u16>,
    pub product_override: Option<u16>,
    pub cache_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose_logging: false,
            log_level: LogLevel::Info,
            io_timeout_ms: 5_000,
            connect_timeout_ms: 3_000,
            session_timeout_ms: 30_000,
            chunk_size: None,
            max_retries: 3,
            retry_delay_ms: 200,
            retry_backoff: 2.0,
            demo_mode: false,
            real_only: false,
            trace_usb: false,
            trace_mtp: false,
            trace_transfer: false,
            force_chunked: false,
            disable_partial: false,
            vendor_override: None,
            product_override: None,
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("mtp-core")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_conservative() {
        let cfg = Config::default();
        assert!(!cfg.demo_mode);
        assert!(!cfg.real_only);
        assert_eq!(cfg.max_retries, 3);
        assert!(cfg.chunk_size.is_none());
    }

    #[test]
    fn log_level_orders_by_verbosity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}
