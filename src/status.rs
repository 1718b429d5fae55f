use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver, Sender};
use parking_lot::Mutex;

/// Default sampling interval for status reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Default age after which an in-flight scan is reported as slow.
pub const DEFAULT_SLOW_SCAN: Duration = Duration::from_secs(10);

/// Cumulative counters for a [`Walker`](crate::Walker), across all walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Prefixes traversed inline because the worker pool was full.
    pub synchronous_scans: u64,

    /// Prefixes handed to [`Handler::prefix`](crate::Handler::prefix).
    pub prefixes: u64,

    /// Entries delivered to [`Handler::contents`](crate::Handler::contents).
    pub entries: u64,
}

/// A progress snapshot, emitted periodically while a walk is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Running count of forced-synchronous scans.
    pub synchronous_scans: u64,

    /// The longest-running prefix whose scan has exceeded the slow-scan
    /// threshold, if any.
    pub slow_prefix: Option<String>,

    /// How long `slow_prefix` has been in flight. Zero when there is none.
    pub slow_for: Duration,
}

/// How often to report and what counts as slow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub interval: Duration,
    pub slow_scan: Duration,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REPORT_INTERVAL,
            slow_scan: DEFAULT_SLOW_SCAN,
        }
    }
}

/// Where and how a walker reports [`Status`].
pub(crate) struct Reporting {
    pub sink: Sender<Status>,
    pub options: ReportOptions,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Counters {
    pub synchronous_scans: AtomicU64,
    pub prefixes: AtomicU64,
    pub entries: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            synchronous_scans: self.synchronous_scans.load(Ordering::Relaxed),
            prefixes: self.prefixes.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight registry
// ---------------------------------------------------------------------------

/// Prefixes currently being traversed, with their start times. Only
/// populated when reporting is configured.
pub(crate) struct InFlight {
    enabled: bool,
    next_id: AtomicU64,
    scans: Mutex<HashMap<u64, (String, Instant)>>,
}

pub(crate) struct InFlightGuard<'a> {
    registry: &'a InFlight,
    id: Option<u64>,
}

impl InFlight {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(0),
            scans: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn enter(&self, prefix: &str) -> InFlightGuard<'_> {
        let id = self.enabled.then(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.scans
                .lock()
                .insert(id, (prefix.to_owned(), Instant::now()));
            id
        });
        InFlightGuard { registry: self, id }
    }

    /// The oldest in-flight prefix, if it has been running at least `threshold`.
    pub(crate) fn slowest(&self, threshold: Duration) -> Option<(String, Duration)> {
        let now = Instant::now();
        let scans = self.scans.lock();
        scans
            .values()
            .map(|(prefix, started)| (prefix, now.saturating_duration_since(*started)))
            .filter(|(_, age)| *age >= threshold)
            .max_by_key(|(_, age)| *age)
            .map(|(prefix, age)| (prefix.clone(), age))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.scans.lock().len()
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.registry.scans.lock().remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter loop
// ---------------------------------------------------------------------------

/// Emit a [`Status`] every interval until `stop` disconnects.
///
/// Sends race against `stop`, so a sink nobody drains can delay status
/// delivery but never the end of the walk.
pub(crate) fn report_loop(
    reporting: &Reporting,
    stop: &Receiver<()>,
    counters: &Counters,
    in_flight: &InFlight,
) {
    let ticker = tick(reporting.options.interval);
    loop {
        select! {
            recv(stop) -> _ => return,
            recv(ticker) -> _ => {}
        }

        let (slow_prefix, slow_for) = match in_flight.slowest(reporting.options.slow_scan) {
            Some((prefix, age)) => (Some(prefix), age),
            None => (None, Duration::ZERO),
        };
        let status = Status {
            synchronous_scans: counters.synchronous_scans.load(Ordering::Relaxed),
            slow_prefix,
            slow_for,
        };

        select! {
            send(reporting.sink, status) -> res => {
                if res.is_err() {
                    tracing::debug!("status sink closed, reporter exiting");
                    return;
                }
            }
            recv(stop) -> _ => return,
        }
    }
}
