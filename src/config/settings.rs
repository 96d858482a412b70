//! Runtime settings

use std::time::Duration;

use crate::{
    config::CliArgs,
    core::{
        scanner::DEFAULT_SCAN_TIME,
        types::{RequestDeviceOptions, ScanFilter},
    },
};

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Scan window for requests that do not carry one
    pub default_scan_time: Duration,
    pub adapter: Option<String>,
    pub options: RequestDeviceOptions,
    pub all: bool,
    pub connect: bool,
    pub json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_scan_time: DEFAULT_SCAN_TIME,
            adapter: None,
            options: RequestDeviceOptions::default(),
            all: false,
            connect: false,
            json: false,
        }
    }
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        let scan_time = Duration::from_millis(args.scan_time_ms);

        // All command-line constraints form a single filter
        let mut filter = ScanFilter::services(args.services);
        filter.name = args.name;
        filter.name_prefix = args.name_prefix;

        let mut options = RequestDeviceOptions::new().with_scan_time(scan_time);
        if filter != ScanFilter::default() {
            options = options.with_filter(filter);
        }

        Settings {
            default_scan_time: scan_time,
            adapter: args.adapter,
            options,
            all: args.all,
            connect: args.connect,
            json: args.json,
        }
    }
}
