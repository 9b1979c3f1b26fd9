//! Configuration and command-line argument parsing

use std::env;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct Config {
    // Device settings
    pub dev_index: u32,
    pub gain: i32,
    pub freq: u32,
    pub sample_rate: u32,

    // Input
    pub filename: Option<String>,
    pub loop_file: bool,

    // Processing
    pub fix_errors: bool,
    pub check_crc: bool,
    pub aggressive: bool,

    // Output
    pub raw: bool,
    pub onlyaddr: bool,
    /// Minimum messages required before an aircraft is corroborated
    pub min_messages: u64,
    /// How long an aircraft is retained with no new messages
    pub aircraft_ttl: u64,

    // Logging
    pub log_dir: Option<String>,
    pub utc: bool,
    pub verbose: bool,

    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dev_index: 0,
            gain: 999999, // Max gain
            freq: 1_090_000_000,
            sample_rate: 2_400_000,
            filename: None,
            loop_file: false,
            fix_errors: true,
            check_crc: true,
            aggressive: false,
            raw: false,
            onlyaddr: false,
            min_messages: 2,
            aircraft_ttl: 60,
            log_dir: None,
            utc: false,
            verbose: false,
            stats_interval_secs: 30,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse(env::args().collect())
    }

    fn parse(args: Vec<String>) -> Self {
        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--device" => {
                    i += 1;
                    config.dev_index = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0);
                }
                "--gain" => {
                    i += 1;
                    config.gain = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0);
                }
                "--frequency" => {
                    i += 1;
                    config.freq = args
                        .get(i)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(1_090_000_000);
                }
                "--sample-rate" => {
                    i += 1;
                    config.sample_rate = args
                        .get(i)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(2_400_000);
                }
                "--ifile" => {
                    i += 1;
                    config.filename = args.get(i).cloned();
                }
                "--loop" => config.loop_file = true,
                "--no-fix" => config.fix_errors = false,
                "--no-crc-check" => config.check_crc = false,
                "--raw" => config.raw = true,
                "--onlyaddr" => config.onlyaddr = true,
                "--aggressive" => config.aggressive = true,
                "--min-messages" => {
                    i += 1;
                    config.min_messages = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(2);
                }
                "--log-dir" => {
                    i += 1;
                    config.log_dir = args.get(i).cloned();
                }
                "--utc" => config.utc = true,
                "--verbose" => config.verbose = true,
                "--version" => {
                    println!("modes1090 {}", VERSION);
                    std::process::exit(0);
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        config
    }
}

fn print_help() {
    println!(
        r#"modes1090 - Mode S / ADS-B 1090ES receiver

Usage: modes1090 [OPTIONS]

Options:
  --device <N>           Select RTL-SDR device index (default: 0)
  --gain <db-tenths>      Tuner gain in dB*10 (default: 0, meaning auto)
  --frequency <hz>        Tuner frequency (default: 1090000000)
  --sample-rate <hz>      Sample rate (default: 2400000)
  --ifile <filename>      Read samples from file (use '-' for stdin)
  --loop                  With --ifile, read the same file in a loop
  --raw                   Print only raw message hex values
  --onlyaddr              Print only ICAO addresses
  --no-fix                Disable single/two-bit error correction
  --no-crc-check          Disable CRC validation (discouraged)
  --aggressive            Attempt two-bit correction on DF17/18
  --min-messages <N>      Min messages before an aircraft is reported (default: 2)
  --log-dir <path>        Directory for rotating SBS log output
  --utc                   Rotate logs at UTC midnight instead of local midnight
  --verbose               Emit debug-level diagnostics
  --version               Print version and exit
  --help                  Show this help
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.freq, 1_090_000_000);
        assert_eq!(config.sample_rate, 2_400_000);
        assert!(config.fix_errors);
    }

    #[test]
    fn test_parse_frequency_and_gain() {
        let args: Vec<String> = ["modes1090", "--frequency", "1091000000", "--gain", "496"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = Config::parse(args);
        assert_eq!(config.freq, 1_091_000_000);
        assert_eq!(config.gain, 496);
    }

    #[test]
    fn test_parse_ifile_and_loop() {
        let args: Vec<String> = ["modes1090", "--ifile", "capture.bin", "--loop"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = Config::parse(args);
        assert_eq!(config.filename.as_deref(), Some("capture.bin"));
        assert!(config.loop_file);
    }

    #[test]
    fn test_parse_log_dir_and_utc() {
        let args: Vec<String> = ["modes1090", "--log-dir", "/var/log/modes1090", "--utc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = Config::parse(args);
        assert_eq!(config.log_dir.as_deref(), Some("/var/log/modes1090"));
        assert!(config.utc);
    }
}
