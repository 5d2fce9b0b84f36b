//! Token validity windows.
//!
//! The bounds of a token's validity are given either as absolute RFC 3339
//! timestamps or as durations relative to the moment of minting, such as
//! `-1m`, `5m`, `1.5h` or `2h45m`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, SubsecRound, Utc};

use crate::{
    commons::error::Error,
    constants::{DFLT_TOKEN_CLOCK_SKEW_SECS, DFLT_TOKEN_LIFETIME_SECS},
};

const NANOS_PER_MICRO: i128 = 1_000;
const NANOS_PER_MILLI: i128 = 1_000_000;
const NANOS_PER_SEC: i128 = 1_000_000_000;

//------------ TimeSpec ------------------------------------------------------

/// A point in time, absolute or relative to "now".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeSpec {
    Absolute(DateTime<Utc>),
    Relative(Duration),
}

impl TimeSpec {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        match self {
            TimeSpec::Absolute(time) => Ok(*time),
            TimeSpec::Relative(duration) => now
                .checked_add_signed(*duration)
                .ok_or_else(|| Error::invalid_time_window(format!("{} from now is out of range", self))),
        }
    }

    fn is_negative(&self) -> bool {
        matches!(self, TimeSpec::Relative(d) if *d < Duration::zero())
    }
}

impl FromStr for TimeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(time) = DateTime::parse_from_rfc3339(s) {
            return Ok(TimeSpec::Absolute(time.with_timezone(&Utc)));
        }
        parse_duration(s).map(TimeSpec::Relative).map_err(|reason| {
            Error::invalid_time_window(format!(
                "'{}' is neither an RFC 3339 time nor a duration: {}",
                s, reason
            ))
        })
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeSpec::Absolute(time) => write!(f, "{}", time.to_rfc3339()),
            TimeSpec::Relative(duration) => write!(f, "{}s", duration.num_seconds()),
        }
    }
}

/// Parses a duration like `300ms`, `-1.5h` or `2h45m`.
///
/// A duration is an optionally signed sequence of decimal numbers, each
/// with optional fraction and a unit suffix. Valid units are `ns`, `us`
/// (or `µs`), `ms`, `s`, `m` and `h`. A bare `0` needs no unit.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let (negative, mut rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("invalid number in '{}'", s));
        }

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let unit_nanos = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "" => return Err(format!("missing unit in '{}'", s)),
            other => return Err(format!("unknown unit '{}' in '{}'", other, s)),
        };

        let int_value: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| format!("number out of range in '{}'", s))?
        };
        total = int_value
            .checked_mul(unit_nanos)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration '{}' out of range", s))?;

        // Digits beyond nanosecond precision do not matter for any unit.
        let frac_part = &frac_part[..frac_part.len().min(18)];
        if !frac_part.is_empty() {
            let frac_value: i128 = frac_part.parse().map_err(|_| format!("invalid fraction in '{}'", s))?;
            let scale = 10i128.pow(frac_part.len() as u32);
            total += frac_value * unit_nanos / scale;
        }
    }

    let total = if negative { -total } else { total };
    i64::try_from(total)
        .map(Duration::nanoseconds)
        .map_err(|_| format!("duration '{}' out of range", s))
}

//------------ TokenLifetime -------------------------------------------------

/// Defaults used when a token's window is not fully specified.
#[derive(Clone, Copy, Debug)]
pub struct TokenLifetime {
    /// How long a token is valid when no `notAfter` is given.
    pub lifetime: Duration,

    /// How far `notBefore` is backdated when it is not given, to allow for
    /// clocks that are slightly off.
    pub clock_skew: Duration,
}

impl Default for TokenLifetime {
    fn default() -> Self {
        TokenLifetime {
            lifetime: Duration::seconds(DFLT_TOKEN_LIFETIME_SECS),
            clock_skew: Duration::seconds(DFLT_TOKEN_CLOCK_SKEW_SECS),
        }
    }
}

//------------ TokenWindow ---------------------------------------------------

/// The resolved validity window of a token, in whole seconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TokenWindow {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl TokenWindow {
    /// Creates a window from absolute bounds.
    ///
    /// Fails unless `not_before` lies strictly before `not_after` once both
    /// are truncated to whole seconds.
    pub fn new(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Result<Self, Error> {
        let not_before = not_before.trunc_subsecs(0);
        let not_after = not_after.trunc_subsecs(0);
        if not_before < not_after {
            Ok(TokenWindow { not_before, not_after })
        } else {
            Err(Error::invalid_time_window(format!(
                "notBefore {} is not before notAfter {}",
                not_before.to_rfc3339(),
                not_after.to_rfc3339()
            )))
        }
    }

    /// Resolves the window against `now`, filling in defaults.
    ///
    /// Without `not_before` the token is valid from `now` minus the clock
    /// skew allowance. Without `not_after` it expires one lifetime after
    /// `now` or `not_before`, whichever is later.
    pub fn resolve(
        not_before: Option<&TimeSpec>,
        not_after: Option<&TimeSpec>,
        now: DateTime<Utc>,
        lifetime: &TokenLifetime,
    ) -> Result<Self, Error> {
        let nbf = match not_before {
            Some(spec) => spec.resolve(now)?,
            None => now - lifetime.clock_skew,
        };
        let exp = match not_after {
            Some(spec) => spec.resolve(now)?,
            None => nbf.max(now) + lifetime.lifetime,
        };

        Self::new(nbf, exp).map_err(|e| match not_after {
            Some(spec) if spec.is_negative() => Error::invalid_time_window(format!(
                "notAfter {} lies in the past and not after notBefore",
                spec
            )),
            _ => e,
        })
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns whether this window lies entirely within the given bounds.
    pub fn fits_within(&self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> bool {
        not_before <= self.not_before && self.not_after <= not_after
    }
}

//------------ Tests ---------------------------------------------------------
