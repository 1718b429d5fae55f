//! Adaptive per-entry metadata resolution.
//!
//! Small batches are resolved with a plain loop. Larger ones fan out to at
//! most `max_concurrency` worker threads pulling positions from a queue.
//! Every fetch is admitted by a token from a pool shared across every
//! [`Issuer::process`] call, and the results are replayed in input order
//! through a [`Sequencer`](crate::sequencer::Sequencer).

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, trace};

use crate::context::Context;
use crate::entry::Entry;
use crate::error::{Result, WalkError};
use crate::info::{Info, InfoList};
use crate::pool::TokenPool;
use crate::sequencer::{sequencer, SequencerSender};
use crate::traits::FileSystem;

/// Batches smaller than this are resolved synchronously.
pub const DEFAULT_ASYNC_THRESHOLD: usize = 10;

/// Default cap on concurrent metadata fetches across an issuer's lifetime.
pub const DEFAULT_MAX_ASYNC_STATS: usize = 100;

/// Upper bound accepted for `max_concurrency`.
pub const MAX_ASYNC_STATS: usize = 4096;

/// Which metadata call the issuer makes for each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatKind {
    /// Follow symbolic links; a link to a prefix is reported as a prefix.
    Stat,

    /// Do not follow links.
    #[default]
    Lstat,
}

/// Hooks around every metadata call, for latency measurement.
///
/// Called concurrently from the fan-out workers.
pub trait LatencyTracker: Send + Sync {
    fn before(&self, _path: &str) {}
    fn after(&self, _path: &str, _elapsed: Duration) {}
}

/// The default tracker: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl LatencyTracker for NoopTracker {}

/// Receives every per-entry resolution failure. Failures never abort
/// [`Issuer::process`]; this is the only place they surface.
pub type ErrorCallback = Arc<dyn Fn(&str, &WalkError) + Send + Sync>;

/// The outcome of resolving one batch.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    /// Entries that resolved to prefixes, in input order.
    pub children: Vec<Entry>,

    /// Every successfully resolved entry, in input order.
    pub all: InfoList,
}

pub struct Issuer<F> {
    fs: F,
    async_threshold: usize,
    stat_kind: StatKind,
    tokens: TokenPool,
    on_error: ErrorCallback,
    tracker: Arc<dyn LatencyTracker>,
}

impl<F: FileSystem> Issuer<F> {
    pub fn builder(fs: F) -> IssuerBuilder<F> {
        IssuerBuilder::new(fs)
    }

    /// Resolve every entry of `prefix`'s batch to full metadata.
    ///
    /// Output order matches `entries` regardless of completion order. Entries
    /// that fail to resolve are left out of both lists and reported to the
    /// error callback.
    ///
    /// # Errors
    ///
    /// Only cancellation of `ctx` (or a failure to start a thread) aborts
    /// the call.
    pub fn process(&self, ctx: &Context, prefix: &str, entries: &[Entry]) -> Result<Resolved> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if entries.len() < self.async_threshold {
            trace!(prefix, entries = entries.len(), "resolving synchronously");
            self.process_sync(ctx, prefix, entries)
        } else {
            trace!(prefix, entries = entries.len(), "resolving concurrently");
            self.process_async(ctx, prefix, entries)
        }
    }

    pub fn stat_kind(&self) -> StatKind {
        self.stat_kind
    }

    pub fn async_threshold(&self) -> usize {
        self.async_threshold
    }

    pub fn max_concurrency(&self) -> usize {
        self.tokens.capacity()
    }

    /// Metadata fetches currently holding a token.
    pub fn outstanding(&self) -> usize {
        self.tokens.outstanding()
    }

    fn process_sync(&self, ctx: &Context, prefix: &str, entries: &[Entry]) -> Result<Resolved> {
        let mut resolved = Resolved::default();
        for entry in entries {
            let path = self.fs.join(&[prefix, &entry.name]);
            let res = self.resolve(ctx, &path);
            self.collect(ctx, &mut resolved, &path, res)?;
        }
        Ok(resolved)
    }

    fn process_async(&self, ctx: &Context, prefix: &str, entries: &[Entry]) -> Result<Resolved> {
        let paths: Vec<String> = entries
            .iter()
            .map(|e| self.fs.join(&[prefix, &e.name]))
            .collect();
        let (results, mut seq) = sequencer(paths.len());

        // Every position is queued up front; workers stop once it runs dry.
        let (jobs_tx, jobs) = bounded(paths.len());
        for position in 0..paths.len() {
            let _ = jobs_tx.try_send(position);
        }
        drop(jobs_tx);
        let workers = self.tokens.capacity().min(paths.len());

        // Returning early from the scope still joins every worker; they
        // observe the same cancellation and finish promptly.
        thread::scope(|s| -> Result<Resolved> {
            for worker in 0..workers {
                let (jobs, results, paths) = (jobs.clone(), results.clone(), &paths);
                thread::Builder::new()
                    .name(format!("prefixwalk-stat-{worker}"))
                    .spawn_scoped(s, move || self.stat_worker(ctx, paths, &jobs, &results))
                    .map_err(|e| WalkError::from_io(prefix, e))?;
            }
            drop(results);

            let mut resolved = Resolved::default();
            while let Some(res) = seq.recv(ctx)? {
                let path = &paths[seq.released() - 1];
                self.collect(ctx, &mut resolved, path, res)?;
            }
            Ok(resolved)
        })
    }

    /// Resolve queued positions one token at a time.
    fn stat_worker(
        &self,
        ctx: &Context,
        paths: &[String],
        jobs: &Receiver<usize>,
        results: &SequencerSender<Result<Info>>,
    ) {
        for position in jobs.iter() {
            let Ok(_token) = self.tokens.acquire(ctx) else {
                return;
            };
            if !results.send(position, self.resolve(ctx, &paths[position])) {
                return;
            }
        }
    }

    fn resolve(&self, ctx: &Context, path: &str) -> Result<Info> {
        self.tracker.before(path);
        let started = Instant::now();
        let res = match self.stat_kind {
            StatKind::Stat => self.fs.stat(ctx, path),
            StatKind::Lstat => self.fs.lstat(ctx, path),
        };
        self.tracker.after(path, started.elapsed());
        res
    }

    fn collect(
        &self,
        ctx: &Context,
        resolved: &mut Resolved,
        path: &str,
        res: Result<Info>,
    ) -> Result<()> {
        match res {
            Ok(info) => {
                if info.is_dir() {
                    resolved.children.push(info.to_entry());
                }
                resolved.all.push(info);
                Ok(())
            }
            Err(err) => {
                if let Some(cancelled) = ctx.err() {
                    return Err(cancelled);
                }
                (self.on_error)(path, &err);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// IssuerBuilder
// ---------------------------------------------------------------------------

/// Configures an [`Issuer`]. Settings are fixed once built.
///
/// ```rust
/// use prefixwalk::{Issuer, MemFs, StatKind};
///
/// let issuer = Issuer::builder(MemFs::builder().build())
///     .async_threshold(32)
///     .max_concurrency(8)
///     .stat_kind(StatKind::Stat)
///     .build()
///     .unwrap();
/// assert_eq!(issuer.max_concurrency(), 8);
/// ```
pub struct IssuerBuilder<F> {
    fs: F,
    async_threshold: usize,
    max_concurrency: usize,
    stat_kind: StatKind,
    on_error: Option<ErrorCallback>,
    tracker: Option<Arc<dyn LatencyTracker>>,
}

impl<F: FileSystem> IssuerBuilder<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            async_threshold: DEFAULT_ASYNC_THRESHOLD,
            max_concurrency: DEFAULT_MAX_ASYNC_STATS,
            stat_kind: StatKind::default(),
            on_error: None,
            tracker: None,
        }
    }

    /// Batches with fewer entries than this are resolved in a simple loop.
    pub fn async_threshold(mut self, n: usize) -> Self {
        self.async_threshold = n;
        self
    }

    /// Maximum metadata fetches in flight at once, across all `process` calls.
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn stat_kind(mut self, kind: StatKind) -> Self {
        self.stat_kind = kind;
        self
    }

    /// Receive per-entry resolution failures. The default logs them at debug level.
    pub fn on_error(mut self, f: impl Fn(&str, &WalkError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn tracker(mut self, tracker: impl LatencyTracker + 'static) -> Self {
        self.tracker = Some(Arc::new(tracker));
        self
    }

    pub fn build(self) -> Result<Issuer<F>> {
        if self.max_concurrency == 0 || self.max_concurrency > MAX_ASYNC_STATS {
            return Err(WalkError::InvalidConcurrency(self.max_concurrency));
        }

        let on_error: ErrorCallback = match self.on_error {
            Some(f) => f,
            None => Arc::new(log_failure),
        };
        let tracker: Arc<dyn LatencyTracker> = match self.tracker {
            Some(t) => t,
            None => Arc::new(NoopTracker),
        };

        Ok(Issuer {
            fs: self.fs,
            async_threshold: self.async_threshold,
            stat_kind: self.stat_kind,
            tokens: TokenPool::new(self.max_concurrency),
            on_error,
            tracker,
        })
    }
}

fn log_failure(path: &str, err: &WalkError) {
    debug!(path, error = %err, "metadata resolution failed");
}
