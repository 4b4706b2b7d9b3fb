//! CLI argument definitions for `soundroom`.

use clap::{Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("soundroom")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Spatial playback across multiple sound cards")
        .arg_required_else_help(true)
        .subcommand(Command::new("devices").about("List available output devices"))
        .subcommand(Command::new("config").about("Print the default mixer configuration as JSON"))
        .subcommand(
            Command::new("play")
                .about("Run a session file")
                .arg(
                    Arg::new("SESSION")
                        .help("Path to a JSON session file")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .short('s')
                        .value_name("SECONDS")
                        .value_parser(clap::value_parser!(f64))
                        .help("Stop after this many seconds even if scenarios are still playing"),
                )
                .arg(
                    Arg::new("headless")
                        .long("headless")
                        .action(ArgAction::SetTrue)
                        .help("Write to virtual outputs instead of sound cards"),
                )
                .arg(
                    Arg::new("no-warmup")
                        .long("no-warmup")
                        .action(ArgAction::SetTrue)
                        .help("Skip the warmup battery"),
                )
                .arg(
                    Arg::new("tick-ms")
                        .long("tick-ms")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Override the mixer tick period"),
                ),
        )
}
