//! The traversal engine.
//!
//! Every prefix is traversed by one task: `lstat` the prefix, ask the handler
//! how to proceed, list it batch by batch, and schedule each sub-prefix the
//! handler returns. Scheduling never blocks: a child either gets a free slot
//! in the worker pool and its own thread, or joins the current thread's
//! backlog, to be traversed inline and counted as a synchronous scan.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Scope};
use std::time::Instant;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::builder::WalkerBuilder;
use crate::context::Context;
use crate::entry::Entry;
use crate::error::{Result, WalkError};
use crate::pool::{Token, TokenPool};
use crate::status::{report_loop, Counters, InFlight, Reporting, Stats};
use crate::traits::{Descent, FileSystem, Handler, LevelScanner};

/// Default number of entries requested per level-scan call.
pub const DEFAULT_SCAN_SIZE: usize = 1000;

/// Default number of prefixes traversed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Upper bound accepted for the worker pool size.
pub const MAX_CONCURRENCY: usize = 4096;

/// Concurrent walker over a [`FileSystem`], driving a [`Handler`].
pub struct Walker<F, H> {
    pub(crate) fs: F,
    pub(crate) handler: H,
    pub(crate) scan_size: usize,
    pub(crate) slots: TokenPool,
    pub(crate) reporting: Option<Reporting>,
    pub(crate) counters: Counters,
}

/// State shared by every task of one `walk` call.
struct Run {
    first_error: Mutex<Option<WalkError>>,
    /// Set on the first fatal error or `SkipAll`: nothing new is scheduled.
    halted: AtomicBool,
    in_flight: InFlight,
}

impl Run {
    fn halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    fn fail(&self, err: WalkError) {
        self.halt();
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

impl<F, H> Walker<F, H>
where
    F: FileSystem,
    H: Handler,
{
    pub fn builder(fs: F, handler: H) -> WalkerBuilder<F, H> {
        WalkerBuilder::new(fs, handler)
    }

    /// Walk every prefix reachable from `roots`.
    ///
    /// Blocks until all scheduled work has finished. Returns the first fatal
    /// error, or the context's error if `ctx` was cancelled; cancellation
    /// takes priority over anything else that went wrong.
    pub fn walk(&self, ctx: &Context, roots: &[&str]) -> Result<()> {
        let start = Instant::now();
        let before = self.counters.snapshot();
        info!(
            roots = roots.len(),
            concurrency = self.slots.capacity(),
            scan_size = self.scan_size,
            "walk starting"
        );

        let run = Run {
            first_error: Mutex::new(None),
            halted: AtomicBool::new(false),
            in_flight: InFlight::new(self.reporting.is_some()),
        };

        // The reporter runs until every traversal thread has been joined.
        let (stop_tx, stop_rx) = bounded::<()>(0);
        thread::scope(|outer| {
            if let Some(reporting) = &self.reporting {
                let (stop, counters, in_flight) = (&stop_rx, &self.counters, &run.in_flight);
                outer.spawn(move || report_loop(reporting, stop, counters, in_flight));
            }

            thread::scope(|s| {
                let mut backlog = VecDeque::new();
                for root in roots {
                    self.schedule(s, ctx, &run, (*root).to_owned(), &mut backlog);
                }
                self.drain(s, ctx, &run, backlog);
            });
            drop(stop_tx);
        });

        let after = self.counters.snapshot();
        info!(
            prefixes = after.prefixes - before.prefixes,
            entries = after.entries - before.entries,
            synchronous_scans = after.synchronous_scans - before.synchronous_scans,
            ms = start.elapsed().as_millis() as u64,
            "walk finished"
        );

        if let Some(err) = ctx.err() {
            return Err(err);
        }
        match run.first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Cumulative counters across every walk made with this walker.
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Worker-pool slots currently held by running traversals.
    pub fn active(&self) -> usize {
        self.slots.outstanding()
    }

    pub fn concurrency(&self) -> usize {
        self.slots.capacity()
    }

    pub fn scan_size(&self) -> usize {
        self.scan_size
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Start traversing `prefix` on its own thread if a pool slot is free,
    /// otherwise queue it on `backlog` for the current thread.
    fn schedule<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        ctx: &'env Context,
        run: &'env Run,
        prefix: String,
        backlog: &mut VecDeque<String>,
    ) {
        if run.halted() || ctx.is_done() {
            return;
        }
        match self.slots.try_acquire() {
            Some(token) => {
                if let Some(prefix) = self.spawn(s, ctx, run, token, prefix) {
                    backlog.push_back(prefix);
                }
            }
            None => backlog.push_back(prefix),
        }
    }

    /// Run `prefix` and everything it queues on a new pool thread. Hands
    /// `prefix` back if the thread could not be started.
    fn spawn<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        ctx: &'env Context,
        run: &'env Run,
        token: Token,
        prefix: String,
    ) -> Option<String> {
        let task_prefix = prefix.clone();
        let spawned = thread::Builder::new()
            .name("prefixwalk".into())
            .spawn_scoped(s, move || {
                let _token = token;
                let mut backlog = VecDeque::new();
                self.visit(s, ctx, run, &task_prefix, &mut backlog);
                self.drain(s, ctx, run, backlog);
            });

        match spawned {
            Ok(_) => None,
            Err(err) => {
                warn!(prefix = %prefix, error = %err, "failed to spawn walker thread, scanning inline");
                Some(prefix)
            }
        }
    }

    /// Work through prefixes that found no free slot. Each one is handed to
    /// a new thread if a slot has freed up since, and traversed inline
    /// otherwise. Sub-prefixes found inline join the same backlog, so the
    /// stack stays flat however deep the tree.
    fn drain<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        ctx: &'env Context,
        run: &'env Run,
        mut backlog: VecDeque<String>,
    ) {
        while let Some(prefix) = backlog.pop_front() {
            if run.halted() || ctx.is_done() {
                return;
            }
            let prefix = match self.slots.try_acquire() {
                Some(token) => match self.spawn(s, ctx, run, token, prefix) {
                    None => continue,
                    Some(prefix) => prefix,
                },
                None => prefix,
            };

            self.counters.synchronous_scans.fetch_add(1, Ordering::Relaxed);
            debug!(prefix = %prefix, "worker pool full, scanning synchronously");
            self.visit(s, ctx, run, &prefix, &mut backlog);
        }
    }

    /// Run the full handler lifecycle for one prefix.
    fn visit<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        ctx: &'env Context,
        run: &'env Run,
        prefix: &str,
        backlog: &mut VecDeque<String>,
    ) {
        let _in_flight = run.in_flight.enter(prefix);
        self.counters.prefixes.fetch_add(1, Ordering::Relaxed);

        let mut state = H::State::default();
        let err = match self.traverse(s, ctx, run, prefix, &mut state, backlog) {
            Ok(()) => None,
            Err(e) if e.is_skip_dir() => None,
            Err(e) if e.is_skip_all() => {
                debug!(prefix, "handler requested SkipAll");
                run.halt();
                None
            }
            Err(e) => Some(e),
        };

        match self.handler.done(ctx, &mut state, prefix, err) {
            Ok(()) => trace!(prefix, "prefix done"),
            Err(e) if e.is_skip_dir() => {}
            Err(e) if e.is_skip_all() => run.halt(),
            Err(e) => {
                if !e.is_cancellation() {
                    warn!(prefix, error = %e, "prefix failed");
                }
                run.fail(e.with_path(prefix));
            }
        }
    }

    fn traverse<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        ctx: &'env Context,
        run: &'env Run,
        prefix: &str,
        state: &mut H::State,
        backlog: &mut VecDeque<String>,
    ) -> Result<()> {
        let info = self.fs.lstat(ctx, prefix);
        match self.handler.prefix(ctx, state, prefix, info)? {
            Descent::Stop => {
                trace!(prefix, "handler stopped descent");
                return Ok(());
            }
            Descent::Children(children) => {
                debug!(prefix, children = children.len(), "using handler-supplied children");
                self.descend(s, ctx, run, prefix, children, backlog);
                return Ok(());
            }
            Descent::Scan => {}
        }

        let mut scanner = self.fs.level_scanner(prefix);
        loop {
            if let Some(err) = ctx.err() {
                return Err(err);
            }

            let more = scanner.scan(ctx, self.scan_size);
            let batch = scanner.contents();
            let err = if more { None } else { scanner.err() };
            if batch.is_empty() && err.is_none() {
                if more {
                    continue;
                }
                break;
            }

            trace!(prefix, entries = batch.len(), failed = err.is_some(), "scan batch");
            self.counters
                .entries
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            let children = self.handler.contents(ctx, state, prefix, batch, err)?;
            self.descend(s, ctx, run, prefix, children, backlog);

            if !more {
                break;
            }
        }
        Ok(())
    }

    fn descend<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        ctx: &'env Context,
        run: &'env Run,
        prefix: &str,
        children: Vec<Entry>,
        backlog: &mut VecDeque<String>,
    ) {
        for child in children {
            let path = self.fs.join(&[prefix, &child.name]);
            self.schedule(s, ctx, run, path, backlog);
        }
    }
}
