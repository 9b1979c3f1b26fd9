//! Fatal receiver errors
//!
//! Non-fatal decode-path failures (rejected frames, sample overruns, log
//! write failures) are tracked as plain counters in [`crate::stats::Stats`];
//! only conditions that stop the receiver outright get a variant here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("RTL-SDR device {index} unavailable: {source}")]
    DeviceUnavailable {
        index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to configure RTL-SDR device {index}: {reason}")]
    DeviceConfiguration { index: u32, reason: String },
}
