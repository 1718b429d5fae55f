//! # prefixwalk
//!
//! Concurrent traversal engine for hierarchical namespaces: local
//! directories, HTTP-exposed trees, object-store key prefixes, or anything
//! else that organises names into *prefixes*.
//!
//! prefixwalk owns the walk engine, the contracts ([`FileSystem`],
//! [`LevelScanner`], [`Handler`]), the adaptive metadata [`Issuer`] and the
//! error type. It does **not** own traversal policy or result handling;
//! those belong to the caller's [`Handler`].
//!
//! - Parallelism is bounded by a worker pool. When it is full, sub-prefixes
//!   are traversed inline and counted in [`Stats::synchronous_scans`]
//!   rather than queued.
//! - Listings arrive in batches of a caller-chosen size.
//! - A handler can stop descent, or substitute known children for a listing.
//! - Slow prefixes are reported through an optional [`Status`] sink.
//! - Everything observes a cancellable [`Context`].
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Mutex;
//!
//! use prefixwalk::{Context, Descent, Entry, Handler, Info, MemFs, WalkError, Walker};
//!
//! /// Collects the name of every non-prefix entry.
//! #[derive(Default)]
//! struct Names(Mutex<Vec<String>>);
//!
//! impl Handler for Names {
//!     type State = ();
//!
//!     fn prefix(
//!         &self,
//!         _: &Context,
//!         _: &mut (),
//!         _: &str,
//!         info: prefixwalk::Result<Info>,
//!     ) -> prefixwalk::Result<Descent> {
//!         info?;
//!         Ok(Descent::Scan)
//!     }
//!
//!     fn contents(
//!         &self,
//!         _: &Context,
//!         _: &mut (),
//!         _: &str,
//!         entries: Vec<Entry>,
//!         err: Option<WalkError>,
//!     ) -> prefixwalk::Result<Vec<Entry>> {
//!         if let Some(err) = err {
//!             return Err(err);
//!         }
//!         let (dirs, files): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(Entry::is_dir);
//!         self.0.lock().unwrap().extend(files.into_iter().map(|e| e.name));
//!         Ok(dirs)
//!     }
//!
//!     fn done(
//!         &self,
//!         _: &Context,
//!         _: &mut (),
//!         _: &str,
//!         err: Option<WalkError>,
//!     ) -> prefixwalk::Result<()> {
//!         err.map_or(Ok(()), Err)
//!     }
//! }
//!
//! let fs = MemFs::builder()
//!     .file("f0", 1)
//!     .file("f1", 1)
//!     .file("a0/f2", 1)
//!     .build();
//!
//! let walker = Walker::builder(fs, Names::default())
//!     .scan_size(1)
//!     .build()
//!     .unwrap();
//! walker.walk(&Context::background(), &[""]).unwrap();
//!
//! let mut names = walker.handler().0.lock().unwrap().clone();
//! names.sort();
//! assert_eq!(names, ["f0", "f1", "f2"]);
//! ```
//!
//! # Metadata fan-out
//!
//! Backends whose listings carry only names can resolve each entry with an
//! [`Issuer`] from inside [`Handler::contents`]. Small batches are resolved
//! in a loop; large ones concurrently, under a token pool shared by every
//! call, with results returned in input order.

#![forbid(unsafe_code)]

pub mod backend;
pub mod engine;
pub mod sequencer;

mod builder;
mod context;
mod entry;
mod error;
mod info;
mod issuer;
mod pool;
mod status;
mod traits;

// ── Public re-exports ─────────────────────────────────────────────────────────

pub use backend::{Fault, LocalFs, MemFs};
pub use builder::WalkerBuilder;
pub use context::{CancelHandle, Context};
pub use engine::Walker;
pub use entry::{Entry, EntryKind, EntryList};
pub use error::{Result, WalkError};
pub use info::{Info, InfoList, Mode};
pub use issuer::{
    ErrorCallback, Issuer, IssuerBuilder, LatencyTracker, NoopTracker, Resolved, StatKind,
};
pub use status::{ReportOptions, Stats, Status};
pub use traits::{Descent, FileSystem, Handler, LevelScanner};
