use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install the global tracing subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    // Tests may install a subscriber more than once.
    let _ = res;
}

pub fn print_warning(message: &str) {
    eprintln!("{}", format!("WARNING: {message}").yellow());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("ERROR: {message}").red());
}

pub fn print_success(message: &str) {
    println!("{}", message.green());
}

pub fn print_failure(message: &str) {
    println!("{}", message.red());
}
