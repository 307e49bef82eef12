use std::{env, process::exit};

use args::{ArgumentsRequest, StartupArguments};
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;

fn main() {
    let arguments = match args::parse_arguments(env::args()) {
        Err(err) => {
            eprintln!("{err}\n\nType 'portal-relay --help' for a help menu");
            exit(1);
        }
        Ok(arguments) => arguments,
    };

    let startup_args = match arguments {
        ArgumentsRequest::Version => {
            println!("{}", args::get_version_string());
            println!("Two legs, one tunnel");
            return;
        }
        ArgumentsRequest::Help => {
            println!("{}", args::get_help_string());
            return;
        }
        ArgumentsRequest::Run(startup_args) => startup_args,
    };

    init_logging(&startup_args);

    let runtime_result = tokio::runtime::Builder::new_current_thread().enable_all().build();

    let result = match runtime_result {
        Ok(runtime) => LocalSet::new().block_on(&runtime, portal_relay::server::run_server(startup_args.server_config)),
        Err(err) => {
            eprintln!("Failed to start Tokio runtime: {err}");
            exit(1);
        }
    };

    match result {
        Ok(()) => info!("Relay stopped"),
        Err(error) => {
            eprintln!("Program finished with error: {error}\n\nDebug print: {error:?}");
            exit(1);
        }
    }
}

fn init_logging(startup_args: &StartupArguments) {
    let default_level = match (startup_args.verbose, startup_args.silent) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
