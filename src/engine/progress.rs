//! Parsers for ffmpeg's progress reporting.
//!
//! Total duration comes from the `Duration:` line ffmpeg prints to stderr for
//! each input. Elapsed output time comes from `-progress pipe:1`, which writes
//! `key=value` blocks terminated by a `progress=continue|end` line.

/// Parse an `HH:MM:SS(.frac)` timestamp into seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;

    if hours < 0.0 || !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Extract the input duration from an ffmpeg stderr line such as
/// `  Duration: 00:01:02.50, start: 0.000000, bitrate: 1205 kb/s`.
///
/// Returns `None` for other lines and for `Duration: N/A`.
pub fn parse_duration_banner(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let value = rest.split(',').next()?.trim();
    parse_timestamp(value).filter(|d| *d > 0.0)
}

/// Convert elapsed output time into a percentage of `duration`.
pub fn percent(out_time_secs: f64, duration_secs: f64) -> Option<f64> {
    if duration_secs <= 0.0 || !out_time_secs.is_finite() {
        return None;
    }
    Some((out_time_secs / duration_secs * 100.0).clamp(0.0, 100.0))
}

/// One completed `-progress` block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Output timestamp reached, in seconds.
    pub out_time_secs: f64,
    /// `progress=end` closed this block.
    pub finished: bool,
}

/// Incremental parser for `-progress` output.
#[derive(Debug, Default)]
pub struct ProgressParser {
    out_time_secs: Option<f64>,
}

impl ProgressParser {
    /// Feed one line; returns a sample when the line closes a block that
    /// carried an output time.
    pub fn feed(&mut self, line: &str) -> Option<ProgressSample> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key {
            // out_time_ms is microseconds too, despite its name.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.out_time_secs = Some(us as f64 / 1_000_000.0);
                    }
                }
                None
            }
            "out_time" => {
                if self.out_time_secs.is_none() {
                    self.out_time_secs = parse_timestamp(value);
                }
                None
            }
            "progress" => self.out_time_secs.take().map(|out_time_secs| ProgressSample {
                out_time_secs,
                finished: value == "end",
            }),
            _ => None,
        }
    }
}
