use flexi_logger::{colored_default_format, FlexiLoggerError, Logger, LoggerHandle};

/// Initialises logging from `RUST_LOG` (or "info" when unset).
///
/// The returned handle must stay alive for the duration of the process.
pub fn init() -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str("info")?
        .format(colored_default_format)
        .start()
}
