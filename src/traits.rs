use std::sync::Arc;

use crate::context::Context;
use crate::entry::Entry;
use crate::error::{Result, WalkError};
use crate::info::Info;

/// A hierarchical namespace the walker can traverse.
///
/// Implement this for local disks, HTTP-exposed trees, object stores (whose
/// "directories" are really key prefixes) or in-memory test doubles. The
/// walker and issuer only ever consume it.
///
/// # Thread Safety
///
/// `Send + Sync` are required: one backend is shared by every traversal
/// thread and every metadata fetch.
///
/// # Errors
///
/// Backends should return path-qualified errors (see
/// [`WalkError::with_path`]) and map "missing" and "forbidden" onto
/// [`WalkError::NotFound`] / [`WalkError::PermissionDenied`] so the default
/// classifiers work. Every method taking a [`Context`] must return the
/// context's error promptly once it is done.
pub trait FileSystem: Send + Sync {
    /// Cursor over the direct children of one prefix.
    type Scanner: LevelScanner;

    /// Join path components with the backend's separator. Empty components
    /// are skipped, so joining onto the root prefix `""` yields a relative name.
    fn join(&self, components: &[&str]) -> String;

    /// The final component of `path`.
    fn base(&self, path: &str) -> String;

    /// Metadata for `path`, following symbolic links.
    fn stat(&self, ctx: &Context, path: &str) -> Result<Info>;

    /// Metadata for `path` itself; a link reports as a link.
    fn lstat(&self, ctx: &Context, path: &str) -> Result<Info>;

    /// A fresh scanner positioned before the first child of `prefix`.
    /// Construction must not perform I/O.
    fn level_scanner(&self, prefix: &str) -> Self::Scanner;

    fn is_not_exist(&self, err: &WalkError) -> bool {
        err.is_not_found()
    }

    fn is_permission_error(&self, err: &WalkError) -> bool {
        err.is_permission_denied()
    }

    /// Target of the symbolic link at `path`. Optional capability.
    fn readlink(&self, _ctx: &Context, _path: &str) -> Result<String> {
        Err(WalkError::Unsupported("readlink"))
    }
}

/// A forward-only, finite cursor over one prefix's direct children.
pub trait LevelScanner: Send {
    /// Fetch up to `n` more entries. Returns `true` while further calls may
    /// yield more; `false` once the listing is exhausted or has failed.
    ///
    /// Must check `ctx` before issuing any I/O.
    fn scan(&mut self, ctx: &Context, n: usize) -> bool;

    /// Move out the entries fetched by the last `scan`.
    fn contents(&mut self) -> Vec<Entry>;

    /// Move out the first fatal error, if the listing ended early.
    fn err(&mut self) -> Option<WalkError>;
}

/// What the walker should do after [`Handler::prefix`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descent {
    /// List the prefix through its level scanner.
    Scan,

    /// Do not look inside this prefix; go straight to [`Handler::done`].
    Stop,

    /// Skip the level scan and descend into exactly these children. This is
    /// how a cache- or database-backed handler avoids re-listing unchanged
    /// subtrees. An empty list means "no sub-prefixes".
    Children(Vec<Entry>),
}

/// Caller-side policy and result sink for a walk.
///
/// [`State`](Handler::State) is per-prefix scratch data: the walker creates
/// a fresh `State::default()` immediately before `prefix` and threads it
/// through `contents` and `done` for that prefix only. It is never shared
/// between prefixes, so it needs no synchronisation.
///
/// For every prefix the walker visits, `prefix` runs exactly once, then zero
/// or more `contents` calls, then `done` exactly once. Different prefixes are
/// handled concurrently and in no particular order.
///
/// Returning [`WalkError::SkipDir`] from any method stops descent below the
/// current prefix; [`WalkError::SkipAll`] stops the whole walk without
/// reporting an error.
pub trait Handler: Send + Sync {
    /// Scratch data scoped to one prefix.
    type State: Default + Send;

    /// Decide how to treat `prefix`. `info` is the prefix's own `lstat`
    /// result; returning its error makes the failure fatal for this prefix,
    /// ignoring it treats the branch as recoverable.
    fn prefix(
        &self,
        ctx: &Context,
        state: &mut Self::State,
        prefix: &str,
        info: Result<Info>,
    ) -> Result<Descent>;

    /// Consume one scan batch and return the sub-prefixes to descend into.
    ///
    /// Called once per batch, so it must not assume it sees the whole
    /// listing. `err` carries a listing failure that ended the scan; return
    /// it to make it fatal, or `Ok` to absorb it.
    fn contents(
        &self,
        ctx: &Context,
        state: &mut Self::State,
        prefix: &str,
        entries: Vec<Entry>,
        err: Option<WalkError>,
    ) -> Result<Vec<Entry>>;

    /// Finish `prefix`. `err` is the fatal error for this prefix, if any.
    /// Whatever this returns is the prefix's final outcome.
    fn done(
        &self,
        ctx: &Context,
        state: &mut Self::State,
        prefix: &str,
        err: Option<WalkError>,
    ) -> Result<()>;
}

impl<F: FileSystem> FileSystem for Arc<F> {
    type Scanner = F::Scanner;

    fn join(&self, components: &[&str]) -> String {
        (**self).join(components)
    }

    fn base(&self, path: &str) -> String {
        (**self).base(path)
    }

    fn stat(&self, ctx: &Context, path: &str) -> Result<Info> {
        (**self).stat(ctx, path)
    }

    fn lstat(&self, ctx: &Context, path: &str) -> Result<Info> {
        (**self).lstat(ctx, path)
    }

    fn level_scanner(&self, prefix: &str) -> Self::Scanner {
        (**self).level_scanner(prefix)
    }

    fn is_not_exist(&self, err: &WalkError) -> bool {
        (**self).is_not_exist(err)
    }

    fn is_permission_error(&self, err: &WalkError) -> bool {
        (**self).is_permission_error(err)
    }

    fn readlink(&self, ctx: &Context, path: &str) -> Result<String> {
        (**self).readlink(ctx, path)
    }
}

impl<H: Handler> Handler for Arc<H> {
    type State = H::State;

    fn prefix(
        &self,
        ctx: &Context,
        state: &mut Self::State,
        prefix: &str,
        info: Result<Info>,
    ) -> Result<Descent> {
        (**self).prefix(ctx, state, prefix, info)
    }

    fn contents(
        &self,
        ctx: &Context,
        state: &mut Self::State,
        prefix: &str,
        entries: Vec<Entry>,
        err: Option<WalkError>,
    ) -> Result<Vec<Entry>> {
        (**self).contents(ctx, state, prefix, entries, err)
    }

    fn done(
        &self,
        ctx: &Context,
        state: &mut Self::State,
        prefix: &str,
        err: Option<WalkError>,
    ) -> Result<()> {
        (**self).done(ctx, state, prefix, err)
    }
}
