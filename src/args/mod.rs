use portal_relay::server::ServerConfig;

mod addresses;
mod numbers;
mod parser;

pub use addresses::*;
pub use numbers::*;
pub use parser::*;

/// Gets a small string with this program's name and version.
pub fn get_version_string() -> String {
    format!(
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), " ({} {})"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Gets a string with this program's help documentation.
pub fn get_help_string() -> &'static str {
    concat!(
        "Usage: portal-relay [options...]\n",
        "Options:\n",
        "  -h, --help                      Display this help menu and exit\n",
        "  -V, --version                   Display the version number and exit\n",
        "  -v, --verbose                   Display additional information while running\n",
        "  -s, --silent                    Do not print logs to stdout\n",
        "  -l, --listen <address>          Specify a socket address to listen for SOCKS5 applications on\n",
        "  --buffer-size <bytes>           Specify the largest chunk read at once from either side of a tunnel\n",
        "  --handshake-timeout <seconds>   Specify how long applications get to choose a destination\n",
        "\n",
        "Socket addresses may be specified as an IPv4 or IPv6 address, or a domainname, and may include a\n",
        "port number. If no port is specified, then the default of 1080 will be used. If no --listen\n",
        "parameter is specified, then the default of 127.0.0.1:1080 will be used.\n",
        "\n",
        "Unless RUST_LOG is set, --verbose and --silent pick how much gets logged.\n",
    )
}

/// The result of parsing the program's arguments.
#[derive(Debug, PartialEq)]
pub enum ArgumentsRequest {
    /// Print the help menu to stdout and exit.
    Help,

    /// Print this program's version to stdout and exit.
    Version,

    /// Run with the provided arguments.
    Run(StartupArguments),
}

/// Specifies the information on how the program should run.
#[derive(Debug, PartialEq)]
pub struct StartupArguments {
    /// Whether to log additional information.
    pub verbose: bool,

    /// Whether to log nothing but errors.
    pub silent: bool,

    /// Where to listen and how to run each tunnel.
    pub server_config: ServerConfig,
}

impl StartupArguments {
    pub const fn new(verbose: bool, silent: bool, server_config: ServerConfig) -> Self {
        Self {
            verbose,
            silent,
            server_config,
        }
    }
}
