use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};

/// Installs a terminal logger at `level`.
///
/// Returns false when a global logger is already installed; the existing
/// logger is kept in that case.
pub fn init_logging(level: LevelFilter) -> bool {
    CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialization_keeps_first_logger() {
        // Other tests may have installed a logger already; only the second
        // call is guaranteed to be rejected.
        let _ = init_logging(LevelFilter::Warn);
        assert!(!init_logging(LevelFilter::Debug));
        log::warn!("logger installed");
    }
}
