use std::{fmt, time::Duration};

use portal_relay::{
    server::{ListenAddress, ServerConfig, DEFAULT_SOCKS5_PORT},
    tunnel::TunnelConfig,
};

use super::{
    parse_buffer_size_arg, parse_listen_arg, parse_timeout_arg, ArgumentsRequest, ListenErrorType, NumberErrorType, StartupArguments,
};

#[derive(Debug, PartialEq, Eq)]
pub enum ArgumentsError {
    UnknownArgument(String),
    ListenError(ListenErrorType),
    BufferSizeError(NumberErrorType),
    HandshakeTimeoutError(NumberErrorType),
    VerboseAndSilent,
}

impl fmt::Display for ArgumentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownArgument(arg) => write!(f, "Unknown argument: {arg}"),
            Self::ListenError(listen_error) => listen_error.fmt(f),
            Self::BufferSizeError(size_error) => size_error.fmt(f),
            Self::HandshakeTimeoutError(timeout_error) => timeout_error.fmt(f),
            Self::VerboseAndSilent => write!(f, "Cannot be both verbose and silent"),
        }
    }
}

struct StartupArgumentsParser {
    verbose: bool,
    silent: bool,
    listen_addresses: Vec<ListenAddress>,
    read_buffer_size: Option<usize>,
    handshake_timeout: Option<Duration>,
}

impl StartupArgumentsParser {
    const fn new() -> Self {
        Self {
            verbose: false,
            silent: false,
            listen_addresses: Vec::new(),
            read_buffer_size: None,
            handshake_timeout: None,
        }
    }

    fn complete(mut self) -> Result<StartupArguments, ArgumentsError> {
        if self.verbose && self.silent {
            return Err(ArgumentsError::VerboseAndSilent);
        }

        if self.listen_addresses.is_empty() {
            self.listen_addresses.push(ListenAddress::default());
        }

        let defaults = TunnelConfig::default();
        let tunnel = TunnelConfig {
            read_buffer_size: self.read_buffer_size.unwrap_or(defaults.read_buffer_size),
            handshake_timeout: self.handshake_timeout.unwrap_or(defaults.handshake_timeout),
        };

        let server_config = ServerConfig {
            listen_addresses: self.listen_addresses,
            tunnel,
        };

        Ok(StartupArguments::new(self.verbose, self.silent, server_config))
    }
}

fn try_parse_general_argument(result: &mut StartupArgumentsParser, maybe_arg: &mut Option<String>) -> Result<bool, ArgumentsError> {
    let arg = match maybe_arg.take() {
        Some(s) => s,
        None => return Ok(false),
    };

    if arg.eq("-v") || arg.eq_ignore_ascii_case("--verbose") {
        result.verbose = true;
    } else if arg.eq("-s") || arg.eq_ignore_ascii_case("--silent") {
        result.silent = true;
    } else {
        *maybe_arg = Some(arg);
    }

    Ok(maybe_arg.is_none())
}

fn try_parse_server_argument<F>(
    result: &mut StartupArgumentsParser,
    maybe_arg: &mut Option<String>,
    get_next_arg: F,
) -> Result<bool, ArgumentsError>
where
    F: FnOnce() -> Option<String>,
{
    let arg = match maybe_arg.take() {
        Some(s) => s,
        None => return Ok(false),
    };

    if arg.eq("-l") || arg.eq_ignore_ascii_case("--listen") {
        parse_listen_arg(&mut result.listen_addresses, arg, get_next_arg(), DEFAULT_SOCKS5_PORT).map_err(ArgumentsError::ListenError)?;
    } else {
        *maybe_arg = Some(arg);
    }

    Ok(maybe_arg.is_none())
}

fn try_parse_tunnel_argument<F>(
    result: &mut StartupArgumentsParser,
    maybe_arg: &mut Option<String>,
    get_next_arg: F,
) -> Result<bool, ArgumentsError>
where
    F: FnOnce() -> Option<String>,
{
    let arg = match maybe_arg.take() {
        Some(s) => s,
        None => return Ok(false),
    };

    if arg.eq_ignore_ascii_case("--buffer-size") {
        let size = parse_buffer_size_arg(arg, get_next_arg()).map_err(ArgumentsError::BufferSizeError)?;
        result.read_buffer_size = Some(size);
    } else if arg.eq_ignore_ascii_case("--handshake-timeout") {
        let timeout = parse_timeout_arg(arg, get_next_arg()).map_err(ArgumentsError::HandshakeTimeoutError)?;
        result.handshake_timeout = Some(timeout);
    } else {
        *maybe_arg = Some(arg);
    }

    Ok(maybe_arg.is_none())
}

pub fn parse_arguments<T>(mut args: T) -> Result<ArgumentsRequest, ArgumentsError>
where
    T: Iterator<Item = String>,
{
    let mut result = StartupArgumentsParser::new();

    // Ignore the first argument, as it's by convention the name of the program
    args.next();

    while let Some(arg) = args.next() {
        if arg.is_empty() {
            continue;
        } else if arg.eq("-h") || arg.eq_ignore_ascii_case("--help") {
            return Ok(ArgumentsRequest::Help);
        } else if arg.eq("-V") || arg.eq_ignore_ascii_case("--version") {
            return Ok(ArgumentsRequest::Version);
        }

        let mut maybe_arg = Some(arg);
        let _ = !try_parse_general_argument(&mut result, &mut maybe_arg)?
            && !try_parse_server_argument(&mut result, &mut maybe_arg, || args.next())?
            && !try_parse_tunnel_argument(&mut result, &mut maybe_arg, || args.next())?;

        if let Some(arg) = maybe_arg {
            return Err(ArgumentsError::UnknownArgument(arg));
        }
    }

    let result = result.complete()?;
    Ok(ArgumentsRequest::Run(result))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use portal_relay::request::Host;

    use super::*;

    fn parse(args: &[&str]) -> Result<ArgumentsRequest, ArgumentsError> {
        let args = std::iter::once("portal-relay").chain(args.iter().copied()).map(String::from);
        parse_arguments(args)
    }

    #[test]
    fn defaults() {
        let expected = StartupArguments::new(false, false, ServerConfig::default());
        assert_eq!(parse(&[]), Ok(ArgumentsRequest::Run(expected)));
    }

    #[test]
    fn help_and_version_win() {
        assert_eq!(parse(&["-v", "--help"]), Ok(ArgumentsRequest::Help));
        assert_eq!(parse(&["-V", "--bogus"]), Ok(ArgumentsRequest::Version));
    }

    #[test]
    fn full_configuration() {
        let result = parse(&[
            "--verbose",
            "-l",
            "0.0.0.0:9050",
            "--listen",
            "localhost",
            "-l",
            "0.0.0.0:9050",
            "--buffer-size",
            "4096",
            "--handshake-timeout",
            "5",
        ]);

        let server_config = ServerConfig {
            listen_addresses: vec![
                ListenAddress::new(Host::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), 9050),
                ListenAddress::new(Host::Domain("localhost".to_string()), DEFAULT_SOCKS5_PORT),
            ],
            tunnel: TunnelConfig {
                read_buffer_size: 4096,
                handshake_timeout: Duration::from_secs(5),
            },
        };

        assert_eq!(result, Ok(ArgumentsRequest::Run(StartupArguments::new(true, false, server_config))));
    }

    #[test]
    fn errors() {
        assert_eq!(parse(&["--frobnicate"]), Err(ArgumentsError::UnknownArgument("--frobnicate".to_string())));
        assert_eq!(parse(&["-v", "-s"]), Err(ArgumentsError::VerboseAndSilent));
        assert_eq!(
            parse(&["--listen"]),
            Err(ArgumentsError::ListenError(ListenErrorType::UnexpectedEnd("--listen".to_string())))
        );
        assert_eq!(
            parse(&["--buffer-size", "0"]),
            Err(ArgumentsError::BufferSizeError(NumberErrorType::Zero("--buffer-size".to_string())))
        );
    }
}
