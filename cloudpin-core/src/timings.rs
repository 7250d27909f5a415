//! Per-message timing attribute attached to video-frame messages as they
//! cross the bridge, grounded in `VideoFrameTimings` from the original
//! `savant_cloudpin.services._video_frame` module.
//!
//! The attribute is a flat, alternating `[label, timestamp, ...]` sequence.
//! `Client::Source` truncates (starts a fresh cycle); the other three hops
//! append.

use std::time::{SystemTime, UNIX_EPOCH};

pub const ATTR_NAMESPACE: &str = "CloudPin";
pub const ATTR_NAME: &str = "timings";

pub const LABEL_CLIENT_SOURCE: &str = "client_source_timestamp";
pub const LABEL_SERVER_SINK: &str = "server_sink_timestamp";
pub const LABEL_SERVER_SOURCE: &str = "server_source_timestamp";
pub const LABEL_CLIENT_SINK: &str = "client_sink_timestamp";

/// One `(label, unix timestamp in seconds)` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingEntry {
    pub label: &'static str,
    pub timestamp: f64,
}

/// The full timing sequence carried on a single video-frame message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrameTimings {
    entries: Vec<TimingEntry>,
}

fn now_unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl VideoFrameTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a previously-decoded sequence (e.g. read back off an
    /// application message's attribute store).
    pub fn from_entries(entries: Vec<TimingEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TimingEntry] {
        &self.entries
    }

    /// Record `label` at the current time. When `truncate` is set, the
    /// sequence is discarded first -- this is how the Client-source hop
    /// resets the cycle for the next round trip.
    pub fn append_timing(&mut self, label: &'static str, truncate: bool) {
        if truncate {
            self.entries.clear();
        }
        self.entries.push(TimingEntry {
            label,
            timestamp: now_unix_timestamp(),
        });
    }

    /// Elapsed seconds between the first occurrence of `start_label` and the
    /// first occurrence of `end_label` after it, or `None` if either label
    /// was never recorded.
    pub fn get_delay(&self, start_label: &str, end_label: &str) -> Option<f64> {
        let start = self.entries.iter().find(|e| e.label == start_label)?;
        let end = self
            .entries
            .iter()
            .rev()
            .find(|e| e.label == end_label)?;
        Some(end.timestamp - start.timestamp)
    }
}

/// The four delay pairs the measurement layer reports, named by which two
/// hops they span.
pub const DELAY_PAIRS: &[(&str, &str, &str)] = &[
    ("client_to_server", LABEL_CLIENT_SOURCE, LABEL_SERVER_SINK),
    ("server_processing", LABEL_SERVER_SINK, LABEL_SERVER_SOURCE),
    ("server_to_client", LABEL_SERVER_SOURCE, LABEL_CLIENT_SINK),
    ("round_trip", LABEL_CLIENT_SOURCE, LABEL_CLIENT_SINK),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_resets_the_sequence() {
        let mut t = VideoFrameTimings::new();
        t.append_timing(LABEL_CLIENT_SOURCE, true);
        t.append_timing(LABEL_SERVER_SINK, false);
        assert_eq!(t.entries().len(), 2);
        t.append_timing(LABEL_CLIENT_SOURCE, true);
        assert_eq!(t.entries().len(), 1);
    }

    #[test]
    fn missing_label_yields_no_delay() {
        let t = VideoFrameTimings::new();
        assert_eq!(t.get_delay(LABEL_CLIENT_SOURCE, LABEL_SERVER_SINK), None);
    }

    #[test]
    fn delay_is_non_negative_for_well_ordered_entries() {
        let mut t = VideoFrameTimings::new();
        t.append_timing(LABEL_CLIENT_SOURCE, true);
        std::thread::sleep(std::time::Duration::from_millis(1));
        t.append_timing(LABEL_SERVER_SINK, false);
        let delay = t.get_delay(LABEL_CLIENT_SOURCE, LABEL_SERVER_SINK).unwrap();
        assert!(delay >= 0.0);
    }
}
