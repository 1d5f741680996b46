//! Progress reporting.
//!
//! Pipelines report raw events at whatever rate their loops run. Before
//! they reach the UI, [`ThrottledProgress`] drops every event that arrives
//! within the throttle interval of the previous emission, unless the phase
//! changed.

use crate::ui::UiBridge;
use conduit_model::CardId;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    /// Looking up objects in the local cache.
    CacheCheck,
    /// Downloading object payloads (bytes).
    DownloadBytes,
    /// Decoding objects (count).
    Deserialize,
    /// Uploading object payloads (bytes).
    UploadBytes,
    /// Resolving an object's closure (count).
    FindChildren,
    /// Converting host objects (count).
    Conversion,
    /// Creating host objects (count).
    Baking,
}

impl ProgressKind {
    /// Human readable phase name.
    pub fn label(self) -> &'static str {
        match self {
            ProgressKind::CacheCheck => "Checking cache",
            ProgressKind::DownloadBytes => "Downloading",
            ProgressKind::Deserialize => "Deserializing",
            ProgressKind::UploadBytes => "Uploading",
            ProgressKind::FindChildren => "Finding children",
            ProgressKind::Conversion => "Converting",
            ProgressKind::Baking => "Baking",
        }
    }

    /// Returns true if counts are byte amounts.
    pub fn is_bytes(self) -> bool {
        matches!(self, ProgressKind::DownloadBytes | ProgressKind::UploadBytes)
    }
}

/// A raw progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Phase.
    pub kind: ProgressKind,
    /// Items or bytes done so far.
    pub count: u64,
    /// Expected total, when known.
    pub total: Option<u64>,
}

impl ProgressEvent {
    /// Creates an event.
    pub fn new(kind: ProgressKind, count: u64, total: Option<u64>) -> Self {
        Self { kind, count, total }
    }

    /// Completed fraction in `[0, 1]`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.count as f64 / total as f64).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// Progress snapshot shown on a card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardProgress {
    /// Status line, e.g. "Uploading (1.5 MiB/s)".
    pub status: String,
    /// Completed fraction, if known.
    pub fraction: Option<f64>,
}

/// Receiver of raw progress events.
pub trait ProgressSink: Send + Sync {
    /// Reports one event.
    fn report(&self, event: ProgressEvent);
}

/// Sink discarding every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[derive(Debug)]
struct ThrottleState {
    started: Instant,
    last_emit: Option<Instant>,
    last_kind: Option<ProgressKind>,
}

/// Throttles one operation's events into [`CardProgress`] updates on the UI.
#[derive(Debug)]
pub struct ThrottledProgress {
    card_id: CardId,
    interval: Duration,
    ui: UiBridge,
    state: Mutex<ThrottleState>,
}

impl ThrottledProgress {
    /// Starts the operation stopwatch.
    pub fn new(card_id: CardId, interval: Duration, ui: UiBridge) -> Self {
        Self {
            card_id,
            interval,
            ui,
            state: Mutex::new(ThrottleState {
                started: Instant::now(),
                last_emit: None,
                last_kind: None,
            }),
        }
    }

    fn report_at(&self, event: ProgressEvent, now: Instant) -> Option<CardProgress> {
        let mut state = self.state.lock();
        let phase_changed = state.last_kind != Some(event.kind);
        let due = state
            .last_emit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if !phase_changed && !due {
            return None;
        }
        state.last_emit = Some(now);
        state.last_kind = Some(event.kind);

        let elapsed = now.saturating_duration_since(state.started);
        Some(CardProgress {
            status: status_line(&event, elapsed),
            fraction: event.fraction(),
        })
    }
}

impl ProgressSink for ThrottledProgress {
    fn report(&self, event: ProgressEvent) {
        if let Some(progress) = self.report_at(event, Instant::now()) {
            self.ui.progress(&self.card_id, progress);
        }
    }
}

fn status_line(event: &ProgressEvent, elapsed: Duration) -> String {
    let label = event.kind.label();
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || event.count == 0 {
        return label.to_string();
    }
    let rate = event.count as f64 / secs;
    if event.kind.is_bytes() {
        format!("{label} ({})", format_byte_rate(rate))
    } else {
        format!("{label} ({rate:.0} objects/s)")
    }
}

/// Formats a byte rate with binary units.
pub fn format_byte_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> ThrottledProgress {
        let (ui, _rx) = UiBridge::channel();
        ThrottledProgress::new(CardId::from("c"), Duration::from_millis(200), ui)
    }

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(ProgressEvent::new(ProgressKind::Baking, 5, Some(10)).fraction(), Some(0.5));
        assert_eq!(ProgressEvent::new(ProgressKind::Baking, 15, Some(10)).fraction(), Some(1.0));
        assert_eq!(ProgressEvent::new(ProgressKind::Baking, 5, None).fraction(), None);
        assert_eq!(ProgressEvent::new(ProgressKind::Baking, 5, Some(0)).fraction(), None);
    }

    #[test]
    fn byte_rates() {
        assert_eq!(format_byte_rate(512.0), "512 B/s");
        assert_eq!(format_byte_rate(1536.0), "1.5 KiB/s");
        assert_eq!(format_byte_rate(3.0 * 1024.0 * 1024.0), "3.0 MiB/s");
        assert_eq!(format_byte_rate(2.0 * 1024.0 * 1024.0 * 1024.0), "2.0 GiB/s");
    }

    #[test]
    fn status_includes_speed() {
        let event = ProgressEvent::new(ProgressKind::UploadBytes, 2048, None);
        assert_eq!(status_line(&event, Duration::from_secs(2)), "Uploading (1.0 KiB/s)");

        let event = ProgressEvent::new(ProgressKind::Deserialize, 50, Some(100));
        assert_eq!(status_line(&event, Duration::from_secs(1)), "Deserializing (50 objects/s)");
        assert_eq!(status_line(&event, Duration::ZERO), "Deserializing");
    }

    #[test]
    fn throttles_within_interval() {
        let progress = throttle();
        let start = progress.state.lock().started;
        let event = ProgressEvent::new(ProgressKind::Deserialize, 1, Some(10));

        assert!(progress.report_at(event, start).is_some());
        assert!(progress.report_at(event, start + Duration::from_millis(100)).is_none());
        assert!(progress.report_at(event, start + Duration::from_millis(200)).is_some());
    }

    #[test]
    fn phase_change_emits_immediately() {
        let progress = throttle();
        let start = progress.state.lock().started;

        let cache = ProgressEvent::new(ProgressKind::CacheCheck, 1, None);
        let download = ProgressEvent::new(ProgressKind::DownloadBytes, 1, None);
        assert!(progress.report_at(cache, start).is_some());
        assert!(progress
            .report_at(download, start + Duration::from_millis(1))
            .is_some());
    }

    #[test]
    fn emission_rate_is_bounded() {
        let progress = throttle();
        let start = progress.state.lock().started;

        let emitted = (0..1000u64)
            .filter(|i| {
                let event = ProgressEvent::new(ProgressKind::UploadBytes, i * 100, Some(100_000));
                progress
                    .report_at(event, start + Duration::from_millis(*i))
                    .is_some()
            })
            .count();

        assert!(emitted >= 1);
        assert!(emitted <= 1000 / 200 + 2, "emitted {emitted}");
    }

    #[tokio::test]
    async fn report_reaches_ui() {
        let (ui, mut rx) = UiBridge::channel();
        let progress = ThrottledProgress::new(CardId::from("c"), Duration::from_millis(200), ui);

        progress.report(ProgressEvent::new(ProgressKind::Conversion, 1, Some(4)));

        match rx.recv().await.unwrap() {
            crate::ui::CardEvent::Progress { card_id, progress } => {
                assert_eq!(card_id, CardId::from("c"));
                assert_eq!(progress.fraction, Some(0.25));
                assert!(progress.status.starts_with("Converting"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
