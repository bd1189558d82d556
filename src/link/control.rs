//! Host control lines.
//!
//! ```text
//! @HELLO
//! @PARAM N=<noise> M=<mode> B=<ambient bias>
//! @GET K=<rounds> STRIDE=<keep every nth> BURN=<rounds to skip first>
//! @RESET
//! @ROUND
//! ```
//!
//! Keys may appear in any order; unknown keys are ignored.

use std::str::FromStr;

use super::error::ControlError;
use crate::sample::Batch;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ParamUpdate {
    pub noise: Option<f32>,
    pub mode: Option<u8>,
    pub ambient_bias: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlCommand {
    Hello,
    Param(ParamUpdate),
    /// Collect a batch of completed rounds, then finish.
    Get(Batch),
    /// Reseed the board and forget loop history.
    Reset,
    /// Start a round now if none is in flight.
    Round,
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        let body = line.strip_prefix('@').ok_or(ControlError::MissingPrefix)?;
        let mut words = body.split_whitespace();
        let name = words.next().unwrap_or_default();
        match name.to_ascii_uppercase().as_str() {
            "HELLO" => Ok(ControlCommand::Hello),
            "RESET" => Ok(ControlCommand::Reset),
            "ROUND" => Ok(ControlCommand::Round),
            "PARAM" => {
                let mut update = ParamUpdate::default();
                for (key, value) in pairs(words) {
                    match key {
                        "N" => update.noise = Some(finite(key, value)?.clamp(0.0, 1.0)),
                        "M" => update.mode = Some(number(key, value)?),
                        "B" => update.ambient_bias = Some(finite(key, value)?.clamp(-1.0, 1.0)),
                        _ => {}
                    }
                }
                Ok(ControlCommand::Param(update))
            }
            "GET" => {
                let (mut rounds, mut stride, mut burn) = (None, 1, 0);
                for (key, value) in pairs(words) {
                    match key {
                        "K" => rounds = Some(number(key, value)?),
                        "STRIDE" => stride = number(key, value)?,
                        "BURN" => burn = number(key, value)?,
                        _ => {}
                    }
                }
                let rounds = rounds.ok_or_else(|| ControlError::BadValue {
                    key: "K".to_string(),
                })?;
                if stride == 0 {
                    return Err(ControlError::BadValue {
                        key: "STRIDE".to_string(),
                    });
                }
                Ok(ControlCommand::Get(
                    Batch::new(rounds).with_stride(stride).with_burn(burn),
                ))
            }
            _ => Err(ControlError::Unknown(name.to_string())),
        }
    }
}

fn pairs<'a>(words: impl Iterator<Item = &'a str>) -> impl Iterator<Item = (&'a str, &'a str)> {
    words.filter_map(|word| word.split_once('='))
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, ControlError> {
    value.parse().map_err(|_| ControlError::BadValue {
        key: key.to_string(),
    })
}

fn finite(key: &str, value: &str) -> Result<f32, ControlError> {
    let v: f32 = number(key, value)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ControlError::BadValue {
            key: key.to_string(),
        })
    }
}
