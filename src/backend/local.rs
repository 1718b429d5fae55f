use std::fs;
use std::iter::Peekable;
use std::path::{Path, PathBuf};

use ignore::{DirEntry, WalkBuilder};
use tracing::trace;

use crate::context::Context;
use crate::entry::{Entry, EntryKind};
use crate::error::{Result, WalkError};
use crate::info::Info;
use crate::traits::{FileSystem, LevelScanner};

/// The local disk.
///
/// Prefixes are directories; `lstat` reports symbolic links as links.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFs {
    type Scanner = LocalScanner;

    fn join(&self, components: &[&str]) -> String {
        let mut path = PathBuf::new();
        for component in components.iter().filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path.to_string_lossy().into_owned()
    }

    fn base(&self, path: &str) -> String {
        Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_owned())
    }

    fn stat(&self, ctx: &Context, path: &str) -> Result<Info> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let meta = fs::metadata(path).map_err(|e| WalkError::from_io(path, e))?;
        Ok(Info::from_metadata(self.base(path), &meta))
    }

    fn lstat(&self, ctx: &Context, path: &str) -> Result<Info> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let meta = fs::symlink_metadata(path).map_err(|e| WalkError::from_io(path, e))?;
        Ok(Info::from_metadata(self.base(path), &meta))
    }

    fn level_scanner(&self, prefix: &str) -> LocalScanner {
        LocalScanner {
            prefix: PathBuf::from(prefix),
            walk: None,
            batch: Vec::new(),
            err: None,
            done: false,
        }
    }

    fn readlink(&self, ctx: &Context, path: &str) -> Result<String> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let target = fs::read_link(path).map_err(|e| WalkError::from_io(path, e))?;
        Ok(target.to_string_lossy().into_owned())
    }
}

/// Lists one directory level, lazily, `n` entries at a time.
pub struct LocalScanner {
    prefix: PathBuf,
    walk: Option<Peekable<ignore::Walk>>,
    batch: Vec<Entry>,
    err: Option<WalkError>,
    done: bool,
}

impl LocalScanner {
    fn open(prefix: &Path) -> Peekable<ignore::Walk> {
        let mut builder = WalkBuilder::new(prefix);
        builder
            .standard_filters(false)
            .ignore(false)
            .parents(false)
            .hidden(false)
            .follow_links(false)
            .max_depth(Some(1));
        builder.build().peekable()
    }

    fn fail(&mut self, err: WalkError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
        self.done = true;
    }
}

impl LevelScanner for LocalScanner {
    fn scan(&mut self, ctx: &Context, n: usize) -> bool {
        self.batch.clear();
        if self.done {
            return false;
        }
        if let Some(err) = ctx.err() {
            self.fail(err);
            return false;
        }

        let prefix = &self.prefix;
        let walk = self.walk.get_or_insert_with(|| Self::open(prefix));
        let mut failure = None;
        let mut exhausted = false;

        while self.batch.len() < n {
            match walk.next() {
                None => {
                    exhausted = true;
                    break;
                }
                Some(Ok(dent)) if dent.depth() == 0 => {
                    if !dent.path().is_dir() {
                        failure = Some(
                            WalkError::Backend("not a directory".into())
                                .with_path(prefix.to_string_lossy()),
                        );
                        break;
                    }
                }
                Some(Ok(dent)) => self.batch.push(to_entry(&dent)),
                Some(Err(err)) => {
                    failure = Some(map_ignore_error(prefix, err));
                    break;
                }
            }
        }
        if failure.is_none() && !exhausted && walk.peek().is_none() {
            exhausted = true;
        }

        trace!(prefix = %self.prefix.display(), entries = self.batch.len(), "local scan");
        match failure {
            Some(err) => {
                self.fail(err);
                false
            }
            None if exhausted => {
                self.done = true;
                false
            }
            None => true,
        }
    }

    fn contents(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.batch)
    }

    fn err(&mut self) -> Option<WalkError> {
        self.err.take()
    }
}

fn to_entry(dent: &DirEntry) -> Entry {
    let kind = match dent.file_type() {
        Some(ft) if ft.is_dir() => EntryKind::Dir,
        Some(ft) if ft.is_symlink() => EntryKind::Symlink,
        Some(ft) if ft.is_file() => EntryKind::File,
        _ => EntryKind::Other,
    };
    Entry::new(dent.file_name().to_string_lossy().into_owned(), kind)
}

fn map_ignore_error(prefix: &Path, e: ignore::Error) -> WalkError {
    match e {
        ignore::Error::WithPath { path, err } => match *err {
            ignore::Error::Io(io_err) => WalkError::from_io(path.to_string_lossy(), io_err),
            other => WalkError::Backend(other.to_string()).with_path(path.to_string_lossy()),
        },
        ignore::Error::WithDepth { err, .. } => map_ignore_error(prefix, *err),
        ignore::Error::Loop { child, .. } => {
            WalkError::Backend("symlink loop".into()).with_path(child.to_string_lossy())
        }
        ignore::Error::Io(io_err) => WalkError::from_io(prefix.to_string_lossy(), io_err),
        other => WalkError::Backend(other.to_string()).with_path(prefix.to_string_lossy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}")), "x").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep"), "y").unwrap();
        dir
    }

    #[test]
    fn scans_one_level_in_batches() {
        let dir = tree();
        let ctx = Context::background();
        let mut scanner = LocalFs.level_scanner(dir.path().to_str().unwrap());

        let mut names = Vec::new();
        let mut calls = 0;
        loop {
            let more = scanner.scan(&ctx, 2);
            let batch = scanner.contents();
            assert!(batch.len() <= 2);
            names.extend(batch.into_iter().map(|e| e.name));
            calls += 1;
            if !more {
                break;
            }
        }
        assert!(scanner.err().is_none());
        assert!(calls >= 3);

        names.sort();
        assert_eq!(names, vec!["f0", "f1", "f2", "f3", "f4", "sub"]);
    }

    #[test]
    fn missing_prefix_reports_not_found() {
        let dir = tree();
        let missing = dir.path().join("nope");
        let mut scanner = LocalFs.level_scanner(missing.to_str().unwrap());

        assert!(!scanner.scan(&Context::background(), 10));
        assert!(scanner.contents().is_empty());
        let err = scanner.err().unwrap();
        assert!(LocalFs.is_not_exist(&err), "{err:?}");
    }

    #[test]
    fn scanning_a_file_fails() {
        let dir = tree();
        let file = dir.path().join("f0");
        let mut scanner = LocalFs.level_scanner(file.to_str().unwrap());
        assert!(!scanner.scan(&Context::background(), 10));
        assert!(scanner.err().is_some());
    }

    #[test]
    fn cancelled_scan_does_no_io() {
        let dir = tree();
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let mut scanner = LocalFs.level_scanner(dir.path().to_str().unwrap());
        assert!(!scanner.scan(&ctx, 10));
        assert!(scanner.walk.is_none());
        assert!(scanner.err().unwrap().is_cancellation());
    }

    #[cfg(unix)]
    #[test]
    fn lstat_reports_links_as_links() {
        let dir = tree();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(dir.path().join("sub"), &link).unwrap();
        let link = link.to_str().unwrap();
        let ctx = Context::background();

        assert!(LocalFs.lstat(&ctx, link).unwrap().is_symlink());
        assert!(LocalFs.stat(&ctx, link).unwrap().is_dir());
        assert!(LocalFs.readlink(&ctx, link).unwrap().ends_with("sub"));
    }

    #[test]
    fn join_and_base() {
        assert_eq!(LocalFs.join(&["", "a", "b"]), Path::new("a").join("b").to_string_lossy());
        assert_eq!(LocalFs.base("a/b/c.txt"), "c.txt");
        assert_eq!(LocalFs.base(""), "");
    }
}
