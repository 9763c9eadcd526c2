use clap::{Arg, ArgAction, Command};
use log::debug;
use std::time::Instant;

pub fn build_cli() -> Command {
    debug!("⚙️ Building CLI interface...");
    let start_time = Instant::now();
    let cmd = Command::new("camarray")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Synchronized acquisition from an array of triggered machine-vision cameras.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets a custom configuration file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("run")
                .about("Resolves the camera set, flushes it and runs acquisition until stopped")
                .arg(
                    Arg::new("frames")
                        .long("frames")
                        .value_name("N")
                        .help("Stop after N frames per camera (0 runs until stopped)")
                        .value_parser(clap::value_parser!(u64))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("max-rate")
                        .long("max-rate")
                        .help("Use the free-running producer/consumer pipeline")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("flush").about("Runs only the buffer flush sequence, then releases the cameras"))
        .subcommand(Command::new("list-cameras").about("Lists detected cameras and how they map to the configuration"));
    debug!("✅ CLI interface built in {:?}", start_time.elapsed());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn global_flags_parse() {
        let matches = build_cli().get_matches_from(["camarray", "-c", "rig.yaml", "-d", "flush"]);
        assert_eq!(matches.get_one::<String>("config").map(String::as_str), Some("rig.yaml"));
        assert!(matches.get_flag("debug"));
        assert_eq!(matches.subcommand_name(), Some("flush"));
    }
}
