use crate::config_loader::MasterConfig;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::str::FromStr;

/// Level from `--debug`, then `application.log_level`, then info. The second
/// value is the configured string when it was not a level name.
pub fn resolve_level(cli_debug: bool, configured: Option<&str>) -> (LevelFilter, Option<String>) {
    if cli_debug {
        return (LevelFilter::Debug, None);
    }
    match configured.map(str::trim) {
        None | Some("") => (LevelFilter::Info, None),
        Some(name) => match LevelFilter::from_str(name) {
            Ok(level) => (level, None),
            Err(_) => (LevelFilter::Info, Some(name.to_string())),
        },
    }
}

/// Installs env_logger once. `RUST_LOG`, when set, is applied on top so single
/// modules can be turned up, e.g. `RUST_LOG=camarray::operations::pipeline_op=trace`.
pub fn initialize_logging(config: Option<&MasterConfig>, cli_matches: &clap::ArgMatches) {
    let configured = config.and_then(|c| c.app_settings.log_level.as_deref());
    let (level, unrecognized) = resolve_level(cli_matches.get_flag("debug"), configured);

    let mut builder = Builder::new();
    builder.filter_level(level).parse_default_env().format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            std::thread::current().name().unwrap_or("main"),
            record.args()
        )
    });

    if let Err(e) = builder.try_init() {
        eprintln!("Failed to initialize logger: {}. Logging might not work as expected.", e);
    }
    if let Some(name) = unrecognized {
        log::warn!("⚠️ Unrecognized log level '{}', defaulting to info.", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins() {
        assert_eq!(resolve_level(true, Some("error")), (LevelFilter::Debug, None));
    }

    #[test]
    fn configured_level_is_case_insensitive() {
        assert_eq!(resolve_level(false, Some("WARN")), (LevelFilter::Warn, None));
        assert_eq!(resolve_level(false, None), (LevelFilter::Info, None));
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(resolve_level(false, Some("loud")), (LevelFilter::Info, Some("loud".to_string())));
    }
}
