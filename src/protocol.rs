//! Line protocol spoken on the command socket
//!
//! A request is a 4 byte ASCII decimal length followed by that many bytes of
//! `"<prefix> <exposure_us> <count> <gain>"`. The reply is a single token.

use crate::error::ProtocolError;

/// Width of the ASCII length header.
pub const SIZE_HEADER_LEN: usize = 4;

/// Gain used when the client sends something that is not an integer.
pub const DEFAULT_GAIN: i32 = 10;

/// A fully validated burst, consumed once by the trigger controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstRequest {
    pub prefix: String,
    pub exposure_us: u32,
    pub count: u32,
    pub gain: i32,
}

/// Terminal status token sent before the server closes the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Error,
    Done,
}

impl Reply {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Reply::Error => b"ERROR",
            Reply::Done => b"DONE!",
        }
    }

    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"ERROR" => Some(Reply::Error),
            b"DONE!" => Some(Reply::Done),
            _ => None,
        }
    }
}

/// Decode the length header. Surrounding whitespace is tolerated so that
/// right-aligned headers like `"  17"` work.
pub fn parse_size(header: &[u8]) -> Result<usize, ProtocolError> {
    let text = String::from_utf8_lossy(header);
    text.trim()
        .parse::<usize>()
        .map_err(|_| ProtocolError::MalformedSize(text.to_string()))
}

/// Validate a command body and build the burst it asks for.
///
/// Only leading spaces are stripped and words are split on single spaces,
/// so doubled spaces produce empty words and fail the arity check. An
/// unparsable gain falls back to [`DEFAULT_GAIN`] instead of rejecting the
/// whole command.
pub fn parse_command(body: &[u8]) -> Result<BurstRequest, ProtocolError> {
    let text = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidEncoding)?;
    let words: Vec<&str> = text.trim_start_matches(' ').split(' ').collect();
    let [prefix, exposure, count, gain] = words.as_slice() else {
        return Err(ProtocolError::WrongArity(words.len()));
    };

    if prefix.contains(['/', '\\', '\0']) {
        return Err(ProtocolError::InvalidPrefix(prefix.to_string()));
    }

    let exposure_us = exposure
        .trim()
        .parse::<u32>()
        .map_err(|_| ProtocolError::InvalidExposure(exposure.to_string()))?;
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|_| ProtocolError::InvalidCount(count.to_string()))?;
    let gain = match gain.trim().parse::<i32>() {
        Ok(gain) => gain,
        Err(_) => {
            tracing::warn!("'{}' not a valid gain, using {}", gain, DEFAULT_GAIN);
            DEFAULT_GAIN
        }
    };

    Ok(BurstRequest {
        prefix: prefix.to_string(),
        exposure_us,
        count,
        gain,
    })
}

/// Encode a request the way a client puts it on the wire.
pub fn encode_request(request: &BurstRequest) -> anyhow::Result<Vec<u8>> {
    let body = format!(
        "{} {} {} {}",
        request.prefix, request.exposure_us, request.count, request.gain
    );
    if body.len() > 9999 {
        anyhow::bail!("command of {} bytes does not fit the size header", body.len());
    }
    let mut out = format!("{:>width$}", body.len(), width = SIZE_HEADER_LEN).into_bytes();
    out.extend_from_slice(body.as_bytes());
    Ok(out)
}
