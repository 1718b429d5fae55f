use std::time::Duration;

use crossbeam_channel::Sender;

use crate::engine::{Walker, DEFAULT_CONCURRENCY, DEFAULT_SCAN_SIZE, MAX_CONCURRENCY};
use crate::error::{Result, WalkError};
use crate::pool::TokenPool;
use crate::status::{Counters, ReportOptions, Reporting, Status};
use crate::traits::{FileSystem, Handler};

// ---------------------------------------------------------------------------
// WalkerBuilder
// ---------------------------------------------------------------------------

/// Configures a [`Walker`].
///
/// Created via [`Walker::builder`]. Configure with chained builder methods,
/// then call [`build()`](WalkerBuilder::build) to validate.
///
/// # Example
///
/// ```rust,ignore
/// let (tx, rx) = crossbeam_channel::bounded(16);
/// let walker = Walker::builder(fs, handler)
///     .scan_size(500)
///     .concurrency(32)
///     .report(tx)
///     .slow_scan_threshold(Duration::from_secs(5))
///     .build()?;
/// walker.walk(&Context::background(), &["/data"])?;
/// ```
pub struct WalkerBuilder<F, H> {
    fs: F,
    handler: H,
    scan_size: usize,
    concurrency: usize,
    sink: Option<Sender<Status>>,
    report: ReportOptions,
}

impl<F, H> WalkerBuilder<F, H>
where
    F: FileSystem,
    H: Handler,
{
    pub fn new(fs: F, handler: H) -> Self {
        Self {
            fs,
            handler,
            scan_size: DEFAULT_SCAN_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            sink: None,
            report: ReportOptions::default(),
        }
    }

    // ── Traversal ─────────────────────────────────────────────────────────

    /// Entries requested from the level scanner per call, and therefore the
    /// largest batch a single [`Handler::contents`] call sees.
    pub fn scan_size(mut self, n: usize) -> Self {
        self.scan_size = n;
        self
    }

    /// Maximum number of prefixes traversed on their own threads at once.
    ///
    /// When every slot is busy, sub-prefixes are traversed inline by the
    /// thread that found them instead of waiting.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    // ── Reporting ─────────────────────────────────────────────────────────

    /// Send periodic [`Status`] snapshots to `sink` while a walk runs.
    ///
    /// A sink that is never drained delays status delivery, never the walk.
    pub fn report(mut self, sink: Sender<Status>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report.interval = interval;
        self
    }

    /// In-flight scans older than this are named in [`Status::slow_prefix`].
    pub fn slow_scan_threshold(mut self, threshold: Duration) -> Self {
        self.report.slow_scan = threshold;
        self
    }

    // ── Build ─────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Rejects a zero scan size, a pool size outside `1..=MAX_CONCURRENCY`
    /// and a zero report interval.
    pub fn build(self) -> Result<Walker<F, H>> {
        if self.scan_size == 0 {
            return Err(WalkError::InvalidScanSize(self.scan_size));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(WalkError::InvalidConcurrency(self.concurrency));
        }
        if self.sink.is_some() && self.report.interval.is_zero() {
            return Err(WalkError::InvalidThreshold(
                "report interval must be non-zero".into(),
            ));
        }

        Ok(Walker {
            fs: self.fs,
            handler: self.handler,
            scan_size: self.scan_size,
            slots: TokenPool::new(self.concurrency),
            reporting: self.sink.map(|sink| Reporting {
                sink,
                options: self.report,
            }),
            counters: Counters::default(),
        })
    }
}
