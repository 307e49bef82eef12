use std::{fmt, time::Duration};

#[derive(Debug, PartialEq, Eq)]
pub enum NumberErrorType {
    UnexpectedEnd(String),
    InvalidValue(String, String),
    Zero(String),
}

impl fmt::Display for NumberErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd(arg) => write!(f, "Expected a number after {arg}"),
            Self::InvalidValue(arg, arg2) => write!(f, "Invalid number after {arg}: {arg2}"),
            Self::Zero(arg) => write!(f, "The value after {arg} must be greater than zero"),
        }
    }
}

fn parse_positive_arg(arg: String, maybe_arg2: Option<String>) -> Result<u64, NumberErrorType> {
    let arg2 = match maybe_arg2 {
        Some(value) => value,
        None => return Err(NumberErrorType::UnexpectedEnd(arg)),
    };

    match arg2.parse::<u64>() {
        Ok(0) => Err(NumberErrorType::Zero(arg)),
        Ok(value) => Ok(value),
        Err(_) => Err(NumberErrorType::InvalidValue(arg, arg2)),
    }
}

/// Parses a buffer size in bytes. Zero is not allowed.
pub(super) fn parse_buffer_size_arg(arg: String, maybe_arg2: Option<String>) -> Result<usize, NumberErrorType> {
    let value = parse_positive_arg(arg.clone(), maybe_arg2.clone())?;
    usize::try_from(value).map_err(|_| NumberErrorType::InvalidValue(arg, maybe_arg2.unwrap_or_default()))
}

/// Parses a timeout in whole seconds. Zero is not allowed.
pub(super) fn parse_timeout_arg(arg: String, maybe_arg2: Option<String>) -> Result<Duration, NumberErrorType> {
    parse_positive_arg(arg, maybe_arg2).map(Duration::from_secs)
}
