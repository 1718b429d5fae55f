use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use prefixwalk::{
    Context, Descent, Entry, FileSystem, Handler, Info, Issuer, LocalFs, Result, StatKind,
    WalkError, Walker,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a temporary directory tree for testing.
///
/// Structure:
/// ```text
/// tmp/
///   invoice_jan.txt
///   invoice_feb.txt
///   report.txt
///   .hidden
///   subdir/
///     invoice_mar.txt
///     other.rs
///     deeper/
///       notes.md
///   empty/
/// ```
fn setup_test_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::write(root.join("invoice_jan.txt"), "january invoice").unwrap();
    fs::write(root.join("invoice_feb.txt"), "february invoice").unwrap();
    fs::write(root.join("report.txt"), "quarterly report").unwrap();
    fs::write(root.join(".hidden"), "dot").unwrap();

    let sub = root.join("subdir");
    fs::create_dir_all(sub.join("deeper")).unwrap();
    fs::write(sub.join("invoice_mar.txt"), "march invoice").unwrap();
    fs::write(sub.join("other.rs"), "fn main() {}").unwrap();
    fs::write(sub.join("deeper").join("notes.md"), "some notes").unwrap();

    fs::create_dir(root.join("empty")).unwrap();

    dir
}

/// Every non-directory below `root` with its size, per walkdir.
fn walkdir_files(root: &Path) -> BTreeMap<String, u64> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| !e.file_type().is_dir())
        .map(|e| {
            let size = e.metadata().unwrap().len();
            (e.path().to_string_lossy().into_owned(), size)
        })
        .collect()
}

/// Records full paths of non-prefix entries; descends into directories only.
#[derive(Default)]
struct Files {
    found: Mutex<Vec<String>>,
    prefixes: Mutex<Vec<String>>,
}

impl Handler for Files {
    type State = ();

    fn prefix(
        &self,
        _ctx: &Context,
        _: &mut (),
        prefix: &str,
        info: Result<Info>,
    ) -> Result<Descent> {
        let info = info?;
        assert!(info.is_dir(), "{prefix} is not a directory");
        self.prefixes.lock().push(prefix.to_owned());
        Ok(Descent::Scan)
    }

    fn contents(
        &self,
        _ctx: &Context,
        _: &mut (),
        prefix: &str,
        entries: Vec<Entry>,
        err: Option<WalkError>,
    ) -> Result<Vec<Entry>> {
        if let Some(err) = err {
            return Err(err);
        }
        let (dirs, files): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(Entry::is_dir);
        self.found
            .lock()
            .extend(files.iter().map(|e| LocalFs.join(&[prefix, &e.name])));
        Ok(dirs)
    }

    fn done(
        &self,
        _ctx: &Context,
        _: &mut (),
        _prefix: &str,
        err: Option<WalkError>,
    ) -> Result<()> {
        err.map_or(Ok(()), Err)
    }
}

/// Resolves every batch through an issuer and records sizes.
struct Sizes {
    issuer: Issuer<LocalFs>,
    sizes: Mutex<BTreeMap<String, u64>>,
}

impl Handler for Sizes {
    type State = usize;

    fn prefix(
        &self,
        _ctx: &Context,
        _: &mut usize,
        _prefix: &str,
        info: Result<Info>,
    ) -> Result<Descent> {
        info?;
        Ok(Descent::Scan)
    }

    fn contents(
        &self,
        ctx: &Context,
        batches: &mut usize,
        prefix: &str,
        entries: Vec<Entry>,
        err: Option<WalkError>,
    ) -> Result<Vec<Entry>> {
        if let Some(err) = err {
            return Err(err);
        }
        *batches += 1;
        let resolved = self.issuer.process(ctx, prefix, &entries)?;
        let mut sizes = self.sizes.lock();
        for info in resolved.all.iter().filter(|i| !i.is_dir()) {
            sizes.insert(LocalFs.join(&[prefix, info.name()]), info.size());
        }
        Ok(resolved.children)
    }

    fn done(
        &self,
        _ctx: &Context,
        batches: &mut usize,
        prefix: &str,
        err: Option<WalkError>,
    ) -> Result<()> {
        assert!(*batches <= 8, "{prefix}: {batches} batches");
        err.map_or(Ok(()), Err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn walk_finds_what_walkdir_finds() {
    let dir = setup_test_dir();
    let root = dir.path().to_str().unwrap();

    let walker = Walker::builder(LocalFs, Files::default())
        .scan_size(2)
        .concurrency(4)
        .build()
        .unwrap();
    walker.walk(&Context::background(), &[root]).unwrap();

    let mut found = walker.handler().found.lock().clone();
    found.sort();
    let expected: Vec<String> = walkdir_files(dir.path()).into_keys().collect();
    assert_eq!(found, expected);

    // root, subdir, subdir/deeper, empty
    assert_eq!(walker.handler().prefixes.lock().len(), 4);
    assert_eq!(walker.stats().prefixes, 4);
    assert_eq!(walker.active(), 0);
}

#[test]
fn issuer_resolves_sizes_inside_a_walk() {
    let dir = setup_test_dir();
    let root = dir.path().to_str().unwrap();

    let issuer = Issuer::builder(LocalFs)
        .async_threshold(2)
        .max_concurrency(3)
        .stat_kind(StatKind::Lstat)
        .build()
        .unwrap();
    let handler = Sizes {
        issuer,
        sizes: Mutex::new(BTreeMap::new()),
    };
    let walker = Walker::builder(LocalFs, handler).scan_size(3).build().unwrap();
    walker.walk(&Context::background(), &[root]).unwrap();

    let sizes = walker.handler().sizes.lock().clone();
    assert_eq!(sizes, walkdir_files(dir.path()));
    assert_eq!(walker.handler().issuer.outstanding(), 0);
}

#[test]
fn missing_root_is_not_found() {
    let dir = setup_test_dir();
    let missing = dir.path().join("nope");

    let walker = Walker::builder(LocalFs, Files::default()).build().unwrap();
    let err = walker
        .walk(&Context::background(), &[missing.to_str().unwrap()])
        .unwrap_err();

    assert!(LocalFs.is_not_exist(&err), "{err:?}");
    assert!(walker.handler().found.lock().is_empty());
}

#[cfg(unix)]
#[test]
fn links_are_not_followed() {
    let dir = setup_test_dir();
    std::os::unix::fs::symlink(dir.path().join("subdir"), dir.path().join("loop")).unwrap();
    let root = dir.path().to_str().unwrap();

    let walker = Walker::builder(LocalFs, Files::default()).build().unwrap();
    walker.walk(&Context::background(), &[root]).unwrap();

    let found = walker.handler().found.lock().clone();
    let link = LocalFs.join(&[root, "loop"]);
    assert!(found.contains(&link));
    assert!(!found.iter().any(|p| p.starts_with(&format!("{link}/"))));
}

#[cfg(unix)]
#[test]
fn unreadable_directory_fails_the_walk() {
    use std::os::unix::fs::PermissionsExt;

    let dir = setup_test_dir();
    let locked = dir.path().join("subdir");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Running as root bypasses permission bits entirely.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let walker = Walker::builder(LocalFs, Files::default()).build().unwrap();
    let res = walker.walk(&Context::background(), &[dir.path().to_str().unwrap()]);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let err = res.unwrap_err();
    assert!(LocalFs.is_permission_error(&err), "{err:?}");
}
