use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::context::Context;
use crate::entry::{Entry, EntryKind};
use crate::error::{Result, WalkError};
use crate::info::{Info, Mode};
use crate::traits::{FileSystem, LevelScanner};

/// Symlink hops followed before `stat` gives up.
const MAX_LINK_HOPS: usize = 40;

/// An in-memory namespace for tests and simulations.
///
/// Paths are `/`-separated with no leading slash; the root prefix is `""`.
/// Every operation can be slowed down or made to fail per path, and all
/// waits honour cancellation. Cloning is cheap and clones share counters.
///
/// ```rust
/// use prefixwalk::{Context, FileSystem, MemFs};
///
/// let fs = MemFs::builder()
///     .file("f0", 3)
///     .file("a0/f2", 5)
///     .build();
/// let info = fs.stat(&Context::background(), "a0/f2").unwrap();
/// assert_eq!(info.size(), 5);
/// assert!(fs.stat(&Context::background(), "a0").unwrap().is_dir());
/// ```
#[derive(Clone)]
pub struct MemFs {
    inner: Arc<Inner>,
}

struct Inner {
    nodes: BTreeMap<String, Node>,
    children: HashMap<String, Vec<Entry>>,
    stat_latency: Duration,
    scan_latency: Duration,
    stat_latency_for: HashMap<String, Duration>,
    stat_faults: HashMap<String, Fault>,
    scan_faults: HashMap<String, Fault>,
    scans: Mutex<HashMap<String, usize>>,
    stat_calls: AtomicU64,
}

#[derive(Debug, Clone)]
enum Node {
    File { size: u64 },
    Dir,
    Symlink { target: String },
}

impl Node {
    fn kind(&self) -> EntryKind {
        match self {
            Node::File { .. } => EntryKind::File,
            Node::Dir => EntryKind::Dir,
            Node::Symlink { .. } => EntryKind::Symlink,
        }
    }
}

/// A failure to inject into a [`MemFs`] operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    PermissionDenied,
    Backend(String),
}

impl Fault {
    fn to_error(&self, path: &str) -> WalkError {
        match self {
            Fault::NotFound => WalkError::NotFound(path.to_owned()),
            Fault::PermissionDenied => WalkError::PermissionDenied(path.to_owned()),
            Fault::Backend(msg) => WalkError::Backend(msg.clone()).with_path(path),
        }
    }
}

impl MemFs {
    pub fn builder() -> MemFsBuilder {
        MemFsBuilder::default()
    }

    /// How many times the listing of `prefix` has been started.
    pub fn scans(&self, prefix: &str) -> usize {
        let prefix = normalize(prefix);
        self.inner.scans.lock().get(&prefix).copied().unwrap_or(0)
    }

    /// Total `stat` + `lstat` calls served.
    pub fn stat_calls(&self) -> u64 {
        self.inner.stat_calls.load(Ordering::Relaxed)
    }

    fn metadata(&self, ctx: &Context, path: &str, follow: bool) -> Result<Info> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let path = normalize(path);
        let latency = self
            .inner
            .stat_latency_for
            .get(&path)
            .copied()
            .unwrap_or(self.inner.stat_latency);
        if !latency.is_zero() {
            ctx.sleep(latency)?;
        }
        self.inner.stat_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(fault) = self.inner.stat_faults.get(&path) {
            return Err(fault.to_error(&path));
        }
        let node = if follow {
            self.inner.resolve(&path)?
        } else {
            self.inner.lookup(&path)?
        };

        let (size, mode) = match node {
            Node::File { size } => (*size, Mode::new(EntryKind::File, 0o644)),
            Node::Dir => (0, Mode::new(EntryKind::Dir, 0o755)),
            Node::Symlink { target } => (target.len() as u64, Mode::new(EntryKind::Symlink, 0o777)),
        };
        Ok(Info::new(base(&path), size, mode, SystemTime::UNIX_EPOCH))
    }
}

impl Inner {
    fn lookup(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| WalkError::NotFound(path.to_owned()))
    }

    /// Follow symlinks from `path` to a non-link node.
    fn resolve(&self, path: &str) -> Result<&Node> {
        let mut current = path.to_owned();
        for _ in 0..MAX_LINK_HOPS {
            match self.lookup(&current)? {
                Node::Symlink { target } => current = normalize(target),
                node => return Ok(node),
            }
        }
        Err(WalkError::Backend("too many levels of symbolic links".into()).with_path(path))
    }

    /// The canonical prefix behind `path`, following links.
    fn resolve_prefix(&self, path: &str) -> Result<String> {
        let mut current = path.to_owned();
        for _ in 0..MAX_LINK_HOPS {
            match self.lookup(&current)? {
                Node::Symlink { target } => current = normalize(target),
                Node::Dir => return Ok(current),
                Node::File { .. } => {
                    return Err(WalkError::Backend("not a prefix".into()).with_path(path))
                }
            }
        }
        Err(WalkError::Backend("too many levels of symbolic links".into()).with_path(path))
    }
}

impl FileSystem for MemFs {
    type Scanner = MemScanner;

    fn join(&self, components: &[&str]) -> String {
        let parts: Vec<&str> = components
            .iter()
            .map(|c| c.trim_matches('/'))
            .filter(|c| !c.is_empty())
            .collect();
        parts.join("/")
    }

    fn base(&self, path: &str) -> String {
        base(&normalize(path))
    }

    fn stat(&self, ctx: &Context, path: &str) -> Result<Info> {
        self.metadata(ctx, path, true)
    }

    fn lstat(&self, ctx: &Context, path: &str) -> Result<Info> {
        self.metadata(ctx, path, false)
    }

    fn level_scanner(&self, prefix: &str) -> MemScanner {
        MemScanner {
            fs: Arc::clone(&self.inner),
            prefix: normalize(prefix),
            listing: None,
            cursor: 0,
            batch: Vec::new(),
            err: None,
            done: false,
        }
    }

    fn readlink(&self, ctx: &Context, path: &str) -> Result<String> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let path = normalize(path);
        match self.inner.lookup(&path)? {
            Node::Symlink { target } => Ok(target.clone()),
            _ => Err(WalkError::Backend("not a symbolic link".into()).with_path(path)),
        }
    }
}

/// Level scanner over a [`MemFs`] prefix. Children come back in name order.
pub struct MemScanner {
    fs: Arc<Inner>,
    prefix: String,
    listing: Option<Vec<Entry>>,
    cursor: usize,
    batch: Vec<Entry>,
    err: Option<WalkError>,
    done: bool,
}

impl MemScanner {
    fn fail(&mut self, err: WalkError) -> bool {
        if self.err.is_none() {
            self.err = Some(err);
        }
        self.done = true;
        false
    }

    fn open(&self) -> Result<Vec<Entry>> {
        *self.fs.scans.lock().entry(self.prefix.clone()).or_insert(0) += 1;

        if let Some(fault) = self.fs.scan_faults.get(&self.prefix) {
            return Err(fault.to_error(&self.prefix));
        }
        let target = self.fs.resolve_prefix(&self.prefix)?;
        Ok(self.fs.children.get(&target).cloned().unwrap_or_default())
    }
}

impl LevelScanner for MemScanner {
    fn scan(&mut self, ctx: &Context, n: usize) -> bool {
        self.batch.clear();
        if self.done {
            return false;
        }
        if let Some(err) = ctx.err() {
            return self.fail(err);
        }
        if !self.fs.scan_latency.is_zero() {
            if let Err(err) = ctx.sleep(self.fs.scan_latency) {
                return self.fail(err);
            }
        }

        if self.listing.is_none() {
            match self.open() {
                Ok(listing) => self.listing = Some(listing),
                Err(err) => return self.fail(err),
            }
        }
        let listing = self.listing.as_deref().unwrap_or_default();
        let end = (self.cursor + n).min(listing.len());
        self.batch.extend_from_slice(&listing[self.cursor..end]);
        self.cursor = end;

        if self.cursor >= listing.len() {
            self.done = true;
        }
        !self.done
    }

    fn contents(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.batch)
    }

    fn err(&mut self) -> Option<WalkError> {
        self.err.take()
    }
}

// ---------------------------------------------------------------------------
// MemFsBuilder
// ---------------------------------------------------------------------------

/// Builds a [`MemFs`]. Missing parent prefixes are created implicitly.
#[derive(Default)]
pub struct MemFsBuilder {
    nodes: BTreeMap<String, Node>,
    stat_latency: Duration,
    scan_latency: Duration,
    stat_latency_for: HashMap<String, Duration>,
    stat_faults: HashMap<String, Fault>,
    scan_faults: HashMap<String, Fault>,
}

impl MemFsBuilder {
    pub fn file(mut self, path: &str, size: u64) -> Self {
        self.insert(path, Node::File { size });
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.insert(path, Node::Dir);
        self
    }

    /// A link at `path` pointing at the namespace path `target`.
    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.insert(
            path,
            Node::Symlink {
                target: normalize(target),
            },
        );
        self
    }

    /// Delay applied to every `stat`/`lstat`.
    pub fn stat_latency(mut self, latency: Duration) -> Self {
        self.stat_latency = latency;
        self
    }

    /// Delay applied to `stat`/`lstat` of one path, overriding the default.
    pub fn stat_latency_for(mut self, path: &str, latency: Duration) -> Self {
        self.stat_latency_for.insert(normalize(path), latency);
        self
    }

    /// Delay applied to every `scan` call.
    pub fn scan_latency(mut self, latency: Duration) -> Self {
        self.scan_latency = latency;
        self
    }

    pub fn fail_stat(mut self, path: &str, fault: Fault) -> Self {
        self.stat_faults.insert(normalize(path), fault);
        self
    }

    pub fn fail_scan(mut self, path: &str, fault: Fault) -> Self {
        self.scan_faults.insert(normalize(path), fault);
        self
    }

    pub fn build(mut self) -> MemFs {
        self.nodes.insert(String::new(), Node::Dir);

        let mut children: HashMap<String, Vec<Entry>> = HashMap::new();
        for (path, node) in self.nodes.iter().filter(|(p, _)| !p.is_empty()) {
            children
                .entry(parent(path).to_owned())
                .or_default()
                .push(Entry::new(base(path), node.kind()));
        }

        MemFs {
            inner: Arc::new(Inner {
                nodes: self.nodes,
                children,
                stat_latency: self.stat_latency,
                scan_latency: self.scan_latency,
                stat_latency_for: self.stat_latency_for,
                stat_faults: self.stat_faults,
                scan_faults: self.scan_faults,
                scans: Mutex::new(HashMap::new()),
                stat_calls: AtomicU64::new(0),
            }),
        }
    }

    fn insert(&mut self, path: &str, node: Node) {
        let path = normalize(path);
        let mut ancestor = parent(&path);
        while !ancestor.is_empty() {
            self.nodes.entry(ancestor.to_owned()).or_insert(Node::Dir);
            ancestor = parent(ancestor);
        }
        self.nodes.insert(path, node);
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

fn base(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_owned()
}
