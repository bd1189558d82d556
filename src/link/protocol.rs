//! Line protocol between the coordinator and the nodes.
//!
//! # Outbound (coordinator → every node, once per round)
//!
//! ```text
//! T,<tick:u32>,<mode:u8>,<noise:2dp>\n
//! ```
//!
//! # Inbound (node → coordinator, on request)
//!
//! ```text
//! compact:  O,<tick:8 hex>,<bitmask:4 hex>,<loss:4 hex>,<noise:2 hex>
//! verbose:  O,<tick>,<bitmask>,<loss>,<noise:float>,<seed>
//! ```
//!
//! Replies are bounded to [`MAX_REPLY_LEN`] bytes and end at the first
//! `\n`, `\r` or NUL. Compact is tried first. The compact noise byte maps to
//! `[0, 1]` by dividing by 255; verbose noise is clamped to that range.

use std::fmt;
use std::str::FromStr;

use super::error::ParseError;

pub const MAX_REPLY_LEN: usize = 32;
pub const OBSERVATION_TAG: &str = "O";
pub const COMMAND_TAG: &str = "T";

const COMPACT_FIELDS: usize = 4;
const VERBOSE_FIELDS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireFormat {
    Compact,
    Verbose,
}

/// One decoded reply.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub tick: u32,
    pub bitmask: u16,
    pub loss: u16,
    /// In `[0, 1]`.
    pub noise: f32,
    /// Only the verbose format carries a seed.
    pub seed: Option<u32>,
    pub format: WireFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    /// Neither format decoded; one error per attempt.
    Malformed {
        compact: ParseError,
        verbose: ParseError,
    },
    /// Decoded, but answering a different round.
    Stale { claimed: u32, expected: u32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed { compact, verbose } => {
                write!(f, "malformed reply (compact: {compact}; verbose: {verbose})")
            }
            Rejection::Stale { claimed, expected } => {
                write!(f, "stale reply for tick {claimed}, expected {expected}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Compact(Observation),
    Verbose(Observation),
    Rejected(Rejection),
}

impl Decoded {
    pub fn observation(&self) -> Option<&Observation> {
        match self {
            Decoded::Compact(obs) | Decoded::Verbose(obs) => Some(obs),
            Decoded::Rejected(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Observation, Rejection> {
        match self {
            Decoded::Compact(obs) | Decoded::Verbose(obs) => Ok(obs),
            Decoded::Rejected(rejection) => Err(rejection),
        }
    }
}

/// The per-round command broadcast to every node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub tick: u32,
    pub mode: u8,
    pub noise: f32,
}

impl Command {
    pub fn encode(&self) -> String {
        format!(
            "{COMMAND_TAG},{},{},{:.2}\n",
            self.tick,
            self.mode,
            self.noise.clamp(0.0, 1.0)
        )
    }

    /// Node-side decode of an encoded command.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim_end_matches(['\n', '\r']).split(',');
        if parts.next()? != COMMAND_TAG {
            return None;
        }
        let tick = parts.next()?.parse().ok()?;
        let mode = parts.next()?.parse().ok()?;
        let noise: f32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !noise.is_finite() {
            return None;
        }
        Some(Self { tick, mode, noise })
    }
}

/// Cut `raw` at its first terminator. The payload may be at most
/// [`MAX_REPLY_LEN`] bytes; the terminator does not count.
pub fn frame(raw: &[u8]) -> Result<&[u8], ParseError> {
    let window = &raw[..raw.len().min(MAX_REPLY_LEN + 1)];
    match window.iter().position(|&b| matches!(b, b'\n' | b'\r' | 0)) {
        Some(end) => Ok(&window[..end]),
        None if raw.len() > MAX_REPLY_LEN => Err(ParseError::Overlong { max: MAX_REPLY_LEN }),
        None => Ok(raw),
    }
}

/// Decode a raw reply and check that it answers `expected_tick`.
pub fn parse(raw: &[u8], expected_tick: u32) -> Decoded {
    let line = match frame(raw).and_then(|b| std::str::from_utf8(b).map_err(|_| ParseError::NotText)) {
        Ok(line) => line,
        Err(err) => {
            return Decoded::Rejected(Rejection::Malformed {
                compact: err.clone(),
                verbose: err,
            });
        }
    };

    let decoded = match parse_compact(line) {
        Ok(obs) => Decoded::Compact(obs),
        Err(compact) => match parse_verbose(line) {
            Ok(obs) => Decoded::Verbose(obs),
            Err(verbose) => return Decoded::Rejected(Rejection::Malformed { compact, verbose }),
        },
    };

    match decoded.observation() {
        Some(obs) if obs.tick != expected_tick => Decoded::Rejected(Rejection::Stale {
            claimed: obs.tick,
            expected: expected_tick,
        }),
        _ => decoded,
    }
}

/// Check the tag and split the remaining `N` fields.
fn fields<const N: usize>(line: &str) -> Result<[&str; N], ParseError> {
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parts = line.split(',');
    let tag = parts.next().unwrap_or_default();
    if tag != OBSERVATION_TAG {
        return Err(ParseError::WrongTag {
            found: tag.to_string(),
        });
    }
    let mut out = [""; N];
    let mut got = 0;
    for part in parts {
        if got < N {
            out[got] = part;
        }
        got += 1;
    }
    if got != N {
        return Err(ParseError::FieldCount { expected: N, got });
    }
    Ok(out)
}

fn hex_field(text: &str, field: &'static str, digits: usize) -> Result<u32, ParseError> {
    if text.len() != digits {
        return Err(ParseError::FieldWidth {
            field,
            expected: digits,
            got: text.len(),
        });
    }
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidNumber { field });
    }
    u32::from_str_radix(text, 16).map_err(|_| ParseError::InvalidNumber { field })
}

fn decimal_field<T: FromStr>(text: &str, field: &'static str) -> Result<T, ParseError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidNumber { field });
    }
    text.parse().map_err(|_| ParseError::InvalidNumber { field })
}

fn parse_compact(line: &str) -> Result<Observation, ParseError> {
    let [tick, bitmask, loss, noise] = fields::<COMPACT_FIELDS>(line)?;
    let tick = hex_field(tick, "tick", 8)?;
    let bitmask = hex_field(bitmask, "bitmask", 4)? as u16;
    let loss = hex_field(loss, "loss", 4)? as u16;
    let noise = hex_field(noise, "noise", 2)? as f32 / 255.0;
    Ok(Observation {
        tick,
        bitmask,
        loss,
        noise,
        seed: None,
        format: WireFormat::Compact,
    })
}

fn parse_verbose(line: &str) -> Result<Observation, ParseError> {
    let [tick, bitmask, loss, noise, seed] = fields::<VERBOSE_FIELDS>(line)?;
    let tick = decimal_field(tick, "tick")?;
    let bitmask = decimal_field(bitmask, "bitmask")?;
    let loss = decimal_field(loss, "loss")?;
    let noise: f32 = noise
        .parse()
        .map_err(|_| ParseError::InvalidNumber { field: "noise" })?;
    if !noise.is_finite() {
        return Err(ParseError::NonFiniteNoise);
    }
    let seed = decimal_field(seed, "seed")?;
    Ok(Observation {
        tick,
        bitmask,
        loss,
        noise: noise.clamp(0.0, 1.0),
        seed: Some(seed),
        format: WireFormat::Verbose,
    })
}

#[cfg(test)]
mod tests {
    use super::{Command, Decoded, MAX_REPLY_LEN, Rejection, WireFormat, frame, parse};
    use crate::link::error::ParseError;

    #[test]
    fn compact_reply_decodes() {
        let decoded = parse(b"O,0000007B,00FF,0000,80", 123);
        let Decoded::Compact(obs) = decoded else {
            panic!("expected compact, got {decoded:?}");
        };
        assert_eq!(obs.tick, 123);
        assert_eq!(obs.bitmask, 255);
        assert_eq!(obs.loss, 0);
        assert!((obs.noise - 0.502).abs() < 1e-3);
        assert_eq!(obs.format, WireFormat::Compact);
        assert_eq!(obs.seed, None);
    }

    #[test]
    fn compact_reply_for_other_tick_is_stale() {
        assert_eq!(
            parse(b"O,0000007B,00FF,0000,80", 124),
            Decoded::Rejected(Rejection::Stale {
                claimed: 123,
                expected: 124
            })
        );
    }

    #[test]
    fn verbose_reply_decodes() {
        let decoded = parse(b"O,123,255,0,0.50,99999\n", 123);
        let Decoded::Verbose(obs) = decoded else {
            panic!("expected verbose, got {decoded:?}");
        };
        assert_eq!((obs.tick, obs.bitmask, obs.loss), (123, 255, 0));
        assert!((obs.noise - 0.5).abs() < 1e-6);
        assert_eq!(obs.seed, Some(99999));
    }

    #[test]
    fn wrong_tag_fails_both_formats() {
        let decoded = parse(b"X,123,255,0,0.50,99999", 123);
        let Decoded::Rejected(Rejection::Malformed { compact, verbose }) = decoded else {
            panic!("expected malformed, got {decoded:?}");
        };
        assert!(matches!(compact, ParseError::WrongTag { .. }));
        assert!(matches!(verbose, ParseError::WrongTag { .. }));
    }

    #[test]
    fn compact_requires_exact_widths() {
        let decoded = parse(b"O,7B,00FF,0000,80", 123);
        let Decoded::Rejected(Rejection::Malformed { compact, verbose }) = decoded else {
            panic!("expected malformed, got {decoded:?}");
        };
        assert_eq!(
            compact,
            ParseError::FieldWidth {
                field: "tick",
                expected: 8,
                got: 2
            }
        );
        assert_eq!(
            verbose,
            ParseError::FieldCount {
                expected: 5,
                got: 4
            }
        );
    }

    #[test]
    fn lowercase_hex_is_accepted() {
        let obs = parse(b"O,0000007b,00ff,000a,ff", 123)
            .into_result()
            .expect("decodes");
        assert_eq!(obs.loss, 10);
        assert!((obs.noise - 1.0).abs() < 1e-6);
    }

    #[test]
    fn verbose_noise_is_clamped_and_must_be_finite() {
        let obs = parse(b"O,5,1,2,1.75,3", 5).into_result().expect("decodes");
        assert_eq!(obs.noise, 1.0);
        let decoded = parse(b"O,5,1,2,NaN,3", 5);
        assert!(matches!(
            decoded,
            Decoded::Rejected(Rejection::Malformed {
                verbose: ParseError::NonFiniteNoise,
                ..
            })
        ));
    }

    #[test]
    fn verbose_rejects_signs_and_overflow() {
        assert!(parse(b"O,+5,1,2,0.1,3", 5).observation().is_none());
        assert!(parse(b"O,5,70000,2,0.1,3", 5).observation().is_none());
    }

    #[test]
    fn terminators_cut_the_reply() {
        assert_eq!(frame(b"O,1\r\njunk").expect("framed"), b"O,1");
        assert_eq!(frame(b"O,1\0\0\0").expect("framed"), b"O,1");
        let obs = parse(b"O,0000007B,00FF,0000,80\0garbage", 123);
        assert!(matches!(obs, Decoded::Compact(_)));
    }

    #[test]
    fn overlong_reply_is_rejected() {
        let long = [b'1'; MAX_REPLY_LEN + 1];
        assert_eq!(
            frame(&long),
            Err(ParseError::Overlong { max: MAX_REPLY_LEN })
        );
        assert_eq!(frame(&long[..MAX_REPLY_LEN]).expect("fits").len(), MAX_REPLY_LEN);
    }

    #[test]
    fn terminator_is_not_counted_against_the_bound() {
        let mut line = [b'1'; MAX_REPLY_LEN + 1];
        line[MAX_REPLY_LEN] = b'\n';
        assert_eq!(frame(&line).expect("fits").len(), MAX_REPLY_LEN);

        let mut long = [b'1'; MAX_REPLY_LEN + 2];
        long[MAX_REPLY_LEN + 1] = b'\n';
        assert_eq!(
            frame(&long),
            Err(ParseError::Overlong { max: MAX_REPLY_LEN })
        );
    }

    #[test]
    fn empty_and_binary_replies_are_malformed() {
        assert!(matches!(
            parse(b"", 1),
            Decoded::Rejected(Rejection::Malformed {
                compact: ParseError::Empty,
                ..
            })
        ));
        assert!(matches!(
            parse(&[0xFF, 0xFE, b','], 1),
            Decoded::Rejected(Rejection::Malformed {
                compact: ParseError::NotText,
                ..
            })
        ));
    }

    #[test]
    fn command_round_trips_through_node_decode() {
        let line = Command {
            tick: 42,
            mode: 3,
            noise: 0.256,
        }
        .encode();
        assert_eq!(line, "T,42,3,0.26\n");
        let parsed = Command::parse(&line).expect("parses");
        assert_eq!((parsed.tick, parsed.mode), (42, 3));
        assert!(Command::parse("O,1,2,3").is_none());
    }
}
