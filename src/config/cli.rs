//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(name = "webble", version, author)]
#[clap(about = "Scan for BLE devices and walk their GATT tree")]
pub struct CliArgs {
    /// Bluetooth adapter name (default adapter when omitted)
    #[clap(short, long)]
    pub adapter: Option<String>,

    /// Service UUID or name to filter on; may be repeated
    #[clap(short = 's', long = "service")]
    pub services: Vec<String>,

    /// Exact advertised device name
    #[clap(long)]
    pub name: Option<String>,

    /// Advertised device name prefix
    #[clap(long)]
    pub name_prefix: Option<String>,

    /// Scan window in milliseconds
    #[clap(long, default_value = "10240")]
    pub scan_time_ms: u64,

    /// Report every device found in the window instead of the first one
    #[clap(long)]
    pub all: bool,

    /// Connect and list services, characteristics and descriptors
    #[clap(long)]
    pub connect: bool,

    /// Print devices as JSON
    #[clap(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_repeated_services() {
        let args = CliArgs::parse_from([
            "webble",
            "-s",
            "heart_rate",
            "--service",
            "180f",
            "--name-prefix",
            "Polar",
            "--all",
        ]);

        assert_eq!(args.services, vec!["heart_rate", "180f"]);
        assert_eq!(args.name_prefix.as_deref(), Some("Polar"));
        assert_eq!(args.scan_time_ms, 10240);
        assert!(args.all);
        assert!(!args.connect);
    }
}
