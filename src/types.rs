use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// How `push` ships packaged exposures to the remote host.
///
/// - `Serial`: one file at a time, blocking.
/// - `Parallel`: every file goes to the bounded worker pool.
/// - `Bundle`: groups of up to `nbundle`; all but the last run in the pool,
///   the last runs inline and acts as a barrier.
/// - `EndOfNight`: one-shot reconciliation against the remote listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum PushMethod {
    Serial,
    Parallel,
    Bundle,
    EndOfNight,
}

impl Default for PushMethod {
    fn default() -> Self {
        PushMethod::Parallel
    }
}

impl FromStr for PushMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s" | "serial" => Ok(PushMethod::Serial),
            "p" | "parallel" => Ok(PushMethod::Parallel),
            "b" | "bundle" => Ok(PushMethod::Bundle),
            "e" | "end-of-night" | "end of night" => Ok(PushMethod::EndOfNight),
            other => Err(format!(
                "invalid push method: {other} (expected (s)erial, (p)arallel, (b)undle or (e)nd-of-night)"
            )),
        }
    }
}

impl TryFrom<String> for PushMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PushMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PushMethod::Serial => "serial",
            PushMethod::Parallel => "parallel",
            PushMethod::Bundle => "bundle",
            PushMethod::EndOfNight => "end-of-night",
        };
        f.write_str(s)
    }
}

/// What arrives in the prepipe watch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalMode {
    /// Tarballs of per-CCD JPEG2000 files; untar only.
    Compress,
    /// Multi-extension exposures (optionally fpacked); split into CCD files.
    Raw,
}

impl Default for ArrivalMode {
    fn default() -> Self {
        ArrivalMode::Compress
    }
}

impl FromStr for ArrivalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compress" => Ok(ArrivalMode::Compress),
            "raw" => Ok(ArrivalMode::Raw),
            other => Err(format!(
                "invalid prepipe mode: {other} (expected \"compress\" or \"raw\")"
            )),
        }
    }
}

/// Mode for storing the processed-file ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// Append-only log on disk; survives restarts.
    File,
    /// In memory only (lost on restart).
    Memory,
}

impl Default for LedgerMode {
    fn default() -> Self {
        LedgerMode::Memory
    }
}

/// How the watcher learns that it should look at the directory again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Fixed-interval polling only.
    Poll,
    /// Polling, plus early wake-ups from OS filesystem notifications.
    Notify,
}

impl Default for WatchBackend {
    fn default() -> Self {
        WatchBackend::Poll
    }
}

/// Parse a duration string such as `"500ms"`, `"0.5s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !(c.is_ascii_digit() || c == '.'))
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: f64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs = match unit.as_str() {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 60.0 * 60.0,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };

    Duration::try_from_secs_f64(secs).map_err(|e| format!("duration '{s}' is out of range: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_method_accepts_single_letters_and_names() {
        assert_eq!("s".parse::<PushMethod>(), Ok(PushMethod::Serial));
        assert_eq!("P".parse::<PushMethod>(), Ok(PushMethod::Parallel));
        assert_eq!("bundle".parse::<PushMethod>(), Ok(PushMethod::Bundle));
        assert_eq!("e".parse::<PushMethod>(), Ok(PushMethod::EndOfNight));
        assert!("l".parse::<PushMethod>().is_err());
    }

    #[test]
    fn durations_allow_fractions() {
        assert_eq!(parse_duration("0.5s"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn oversized_durations_are_errors() {
        let err = parse_duration("1000000000000000000000h").unwrap_err();
        assert!(err.contains("out of range"), "{err}");
        let huge = format!("{}s", "9".repeat(400));
        assert!(parse_duration(&huge).is_err());
    }
}
