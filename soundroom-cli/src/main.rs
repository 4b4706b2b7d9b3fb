//! # Soundroom
//!
//! Command-line front end for running spatial playback sessions.

use log::error;

mod cli;
mod logging;
mod runner;
mod session;

fn main() {
    logging::init();
    let args = cli::args::build_cli().get_matches();

    let code = match runner::run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            -1
        }
    };

    std::process::exit(code)
}
