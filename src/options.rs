use clap::Parser;
use std::time::Duration;

/// Axpert Bridge - polls a PI30 inverter over hidraw and publishes to MQTT
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Path to the hidraw device
    #[clap(short = 'd', long = "device", default_value = "/dev/hidraw4")]
    pub device: String,

    /// Polling interval (e.g. 2s, 500ms, 1m)
    #[clap(short = 'i', long = "interval", default_value = "2s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Also poll the identification commands (QPI, QID, QVFW, QMOD, QFLAG)
    #[clap(long = "debug")]
    pub debug: bool,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts `<n>ms`, `<n>s`, `<n>m`, `<n>h`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let n: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", s))?;

    let secs = |factor: u64| {
        n.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {:?} is too large", s))
    };

    let d = match unit {
        "ms" => Duration::from_millis(n),
        "" | "s" => Duration::from_secs(n),
        "m" => secs(60)?,
        "h" => secs(3600)?,
        other => return Err(format!("unknown unit {:?} in duration {:?}", other, s)),
    };

    if d.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(d)
}
