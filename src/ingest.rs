//! Concurrent classpath ingestion.
//!
//! The scheduler enumerates every classfile under its roots and decodes them
//! on a bounded rayon pool, feeding relationship facts into the shared
//! [`DependencyGraph`]. Archives are memory-mapped once and split into
//! chunks of entries so a single large jar still spreads across workers.
//!
//! Cancellation is cooperative: every task polls the stop flag before each
//! entry, and no fact is inserted once the flag is set. A panic while
//! reading one entry is contained and counted as a failed entry.

use anyhow::Context;
use memmap2::Mmap;
use parking_lot::Mutex;
use rayon::{Scope, ThreadPoolBuilder};
use serde::Serialize;
use std::fs::File;
use std::any::Any;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::classfile::ClassFile;
use crate::error::{EntryReadError, SchedulerError};
use crate::graph::DependencyGraph;
use crate::scan::{ClasspathRoot, class_files, is_class_entry};

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PREALLOC: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub workers: usize,
    pub chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            chunk_size: 64,
        }
    }
}

pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    3 * cores
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    Cancelled,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct ScanStats {
    pub classes_parsed: Arc<AtomicU64>,
    pub entries_failed: Arc<AtomicU64>,
    pub roots_failed: Arc<AtomicU64>,
}

impl ScanStats {
    fn new() -> Self {
        Self {
            classes_parsed: Arc::new(AtomicU64::new(0)),
            entries_failed: Arc::new(AtomicU64::new(0)),
            roots_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            classes_parsed: self.classes_parsed.load(Ordering::Relaxed),
            entries_failed: self.entries_failed.load(Ordering::Relaxed),
            roots_failed: self.roots_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub classes_parsed: u64,
    pub entries_failed: u64,
    pub roots_failed: u64,
}

/// Single-use scanner: `Idle -> Scanning -> {Completed, Cancelled}`.
pub struct IngestScheduler {
    roots: Vec<ClasspathRoot>,
    graph: Arc<DependencyGraph>,
    config: IngestConfig,
    state: Arc<Mutex<ScanState>>,
    cancel: Arc<AtomicBool>,
    stats: ScanStats,
    handle: Option<JoinHandle<()>>,
}

impl IngestScheduler {
    pub fn new(roots: Vec<ClasspathRoot>, graph: Arc<DependencyGraph>, config: IngestConfig) -> Self {
        Self {
            roots,
            graph,
            config,
            state: Arc::new(Mutex::new(ScanState::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: ScanStats::new(),
            handle: None,
        }
    }

    /// Starts the scan in the background and returns immediately.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if *self.state.lock() != ScanState::Idle {
            return Err(SchedulerError::AlreadyStarted);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("class-graph-ingest-{i}"))
            .build()?;

        let ctx = ScanContext {
            graph: Arc::clone(&self.graph),
            cancel: Arc::clone(&self.cancel),
            stats: self.stats.clone(),
            chunk_size: self.config.chunk_size.max(1),
        };
        let roots = self.roots.clone();
        let state = Arc::clone(&self.state);

        *self.state.lock() = ScanState::Scanning;
        let spawned = std::thread::Builder::new()
            .name("class-graph-scan".to_string())
            .spawn(move || {
                let started = Instant::now();
                info!(roots = roots.len(), workers = pool.current_num_threads(), "scan started");

                let scanned = panic::catch_unwind(AssertUnwindSafe(|| {
                    pool.scope(|scope| {
                        for root in &roots {
                            if ctx.cancelled() {
                                break;
                            }
                            match root {
                                ClasspathRoot::Archive(jar) => schedule_archive(scope, &ctx, jar),
                                ClasspathRoot::Directory(dir) => {
                                    schedule_directory(scope, &ctx, dir)
                                }
                            }
                        }
                    })
                }));

                let outcome = match scanned {
                    Err(payload) => {
                        warn!(error = %panic_message(&*payload), "scan aborted by a panic");
                        ScanState::Cancelled
                    }
                    Ok(()) if ctx.cancelled() => ScanState::Cancelled,
                    Ok(()) => ScanState::Completed,
                };
                *state.lock() = outcome;

                let summary = ctx.stats.summary();
                info!(
                    state = ?outcome,
                    classes = summary.classes_parsed,
                    failed_entries = summary.entries_failed,
                    failed_roots = summary.roots_failed,
                    nodes = ctx.graph.node_count(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "scan finished"
                );
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ScanState::Cancelled;
                Err(SchedulerError::Spawn(e))
            }
        }
    }

    /// Requests a cooperative stop. Safe to call at any time.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Blocks until the scan reaches a terminal state.
    pub fn wait(&mut self) -> ScanState {
        if let Some(handle) = self.handle.take()
            && let Err(payload) = handle.join()
        {
            warn!(error = %panic_message(&*payload), "scan coordinator panicked");
            let mut state = self.state.lock();
            if !state.is_terminal() {
                *state = ScanState::Cancelled;
            }
        }
        self.state()
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    pub fn stats(&self) -> ScanStats {
        self.stats.clone()
    }

    pub fn roots(&self) -> &[ClasspathRoot] {
        &self.roots
    }
}

impl Drop for IngestScheduler {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

struct ScanContext {
    graph: Arc<DependencyGraph>,
    cancel: Arc<AtomicBool>,
    stats: ScanStats,
    chunk_size: usize,
}

impl ScanContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn report(&self, err: EntryReadError) {
        self.stats.entries_failed.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "skipping unreadable entry");
    }

    fn report_root(&self, root: &Path, err: &anyhow::Error) {
        self.stats.roots_failed.fetch_add(1, Ordering::Relaxed);
        warn!(root = %root.display(), error = %format!("{err:#}"), "skipping unreadable classpath root");
    }

    /// Runs one entry's read, turning an error or a panic into a failed
    /// entry.
    fn guarded(&self, root: &Path, entry: &str, read: impl FnOnce() -> Result<(), EntryReadError>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(read)).unwrap_or_else(|payload| {
            Err(EntryReadError::Panicked {
                root: root.to_path_buf(),
                entry: entry.to_string(),
                message: panic_message(&*payload),
            })
        });
        if let Err(e) = outcome {
            self.report(e);
        }
    }

    fn ingest(&self, root: &Path, entry: &str, bytes: &[u8]) -> Result<(), EntryReadError> {
        let class = ClassFile::parse(bytes).map_err(|source| EntryReadError::ClassFile {
            root: root.to_path_buf(),
            entry: entry.to_string(),
            source,
        })?;

        if self.cancelled() {
            return Ok(());
        }

        self.graph.ensure_node(&class.external_name());
        for fact in class.relationships() {
            self.graph.add_fact(&fact);
        }
        self.stats.classes_parsed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Clone)]
struct SharedMmap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMmap {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

type JarArchive = ZipArchive<Cursor<SharedMmap>>;

fn open_archive(jar: &Path) -> anyhow::Result<JarArchive> {
    let file = File::open(jar).with_context(|| format!("cannot open jar: {}", jar.display()))?;
    // SAFETY: read-only mapping of a file we do not modify; the Arc keeps it
    // alive for every archive clone handed to the workers.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("cannot mmap jar: {}", jar.display()))?;
    ZipArchive::new(Cursor::new(SharedMmap(Arc::new(mmap))))
        .with_context(|| format!("cannot read zip structure: {}", jar.display()))
}

/// Buffer reservation for an entry that declares `size` bytes. The declared
/// size is untrusted; `read_to_end` grows the buffer past the cap.
fn prealloc_len(size: u64) -> usize {
    size.min(MAX_PREALLOC) as usize
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn schedule_archive<'s>(scope: &Scope<'s>, ctx: &'s ScanContext, jar: &'s Path) {
    scope.spawn(move |scope| {
        if ctx.cancelled() {
            return;
        }
        let archive = match open_archive(jar) {
            Ok(archive) => archive,
            Err(e) => {
                ctx.report_root(jar, &e);
                return;
            }
        };

        let len = archive.len();
        debug!(root = %jar.display(), entries = len, "archive opened");
        let mut start = 0;
        while start < len {
            if ctx.cancelled() {
                return;
            }
            let end = (start + ctx.chunk_size).min(len);
            let mut archive = archive.clone();
            scope.spawn(move |_| ingest_archive_chunk(ctx, jar, &mut archive, start..end));
            start = end;
        }
    });
}

fn ingest_archive_chunk(
    ctx: &ScanContext,
    jar: &Path,
    archive: &mut JarArchive,
    range: std::ops::Range<usize>,
) {
    for index in range {
        if ctx.cancelled() {
            return;
        }
        ctx.guarded(jar, &format!("#{index}"), || {
            read_archive_entry(ctx, jar, archive, index)
        });
    }
}

fn read_archive_entry(
    ctx: &ScanContext,
    jar: &Path,
    archive: &mut JarArchive,
    index: usize,
) -> Result<(), EntryReadError> {
    let mut file = archive
        .by_index(index)
        .map_err(|source| EntryReadError::Archive {
            root: jar.to_path_buf(),
            entry: format!("#{index}"),
            source,
        })?;
    if file.is_dir() || !is_class_entry(file.name()) {
        return Ok(());
    }

    let name = file.name().to_string();
    let mut bytes = Vec::with_capacity(prealloc_len(file.size()));
    file.read_to_end(&mut bytes)
        .map_err(|source| EntryReadError::Io {
            root: jar.to_path_buf(),
            entry: name.clone(),
            source,
        })?;
    ctx.ingest(jar, &name, &bytes)
}

fn schedule_directory<'s>(scope: &Scope<'s>, ctx: &'s ScanContext, dir: &'s Path) {
    for item in class_files(dir) {
        if ctx.cancelled() {
            return;
        }
        match item {
            Ok(path) => scope.spawn(move |_| {
                if ctx.cancelled() {
                    return;
                }
                ctx.guarded(dir, &path.to_string_lossy(), || {
                    read_class_file(ctx, dir, &path)
                });
            }),
            Err(e) => {
                let message = e.to_string();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(message));
                ctx.report(EntryReadError::Io {
                    root: dir.to_path_buf(),
                    entry: String::new(),
                    source,
                });
            }
        }
    }
}

fn read_class_file(ctx: &ScanContext, dir: &Path, path: &Path) -> Result<(), EntryReadError> {
    let entry = path
        .strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    let bytes = std::fs::read(path).map_err(|source| EntryReadError::Io {
        root: dir.to_path_buf(),
        entry: entry.clone(),
        source,
    })?;
    ctx.ingest(dir, &entry, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{ClassBuilder, trailing_long_pool};
    use crate::origin::{ClassOrigin, ClassOriginResolver};
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use zip::write::{FileOptions, ZipWriter};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "class_graph_ingest_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    fn write_jar(path: &Path, entries: &[(String, Vec<u8>)]) {
        let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn scheduler_for(roots: Vec<ClasspathRoot>, workers: usize) -> IngestScheduler {
        let graph = Arc::new(DependencyGraph::new(ClassOriginResolver::new(&roots)));
        IngestScheduler::new(
            roots,
            graph,
            IngestConfig {
                workers,
                chunk_size: 8,
            },
        )
    }

    #[test]
    fn directory_scan_builds_expected_graph() {
        let base = temp_dir("dir_scan");
        let pkg = base.join("org/example");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(
            pkg.join("Foo.class"),
            ClassBuilder::new("org/example/Foo")
                .interface("java/lang/Runnable")
                .build(),
        )
        .unwrap();

        let mut scheduler = scheduler_for(vec![ClasspathRoot::Directory(base.clone())], 2);
        assert_eq!(scheduler.state(), ScanState::Idle);
        scheduler.start().unwrap();
        assert_eq!(scheduler.wait(), ScanState::Completed);

        let graph = Arc::clone(&scheduler.graph);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.get("org.example.Foo").unwrap().origin(), ClassOrigin::Application);
        assert_eq!(graph.get("java.lang.Object").unwrap().origin(), ClassOrigin::RootObject);
        assert_eq!(graph.get("java.lang.Runnable").unwrap().origin(), ClassOrigin::Platform);
        assert_eq!(graph.attraction_between("java.lang.Object", "org.example.Foo"), 4.0);
        assert_eq!(graph.attraction_between("org.example.Foo", "java.lang.Runnable"), 3.0);

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn bad_entries_are_skipped_and_scan_completes() {
        let base = temp_dir("bad_entries");
        fs::create_dir_all(&base).unwrap();
        let jar = base.join("app.jar");
        let mut entries = vec![
            (
                "a/A.class".to_string(),
                ClassBuilder::new("a/A").field("b", "La/B;").build(),
            ),
            ("a/B.class".to_string(), ClassBuilder::new("a/B").build()),
            ("a/Broken.class".to_string(), b"\xCA\xFE\xBA\xBE\0".to_vec()),
            ("META-INF/MANIFEST.MF".to_string(), b"Manifest-Version: 1.0\n".to_vec()),
        ];
        let good = ClassBuilder::new("a/C").build();
        entries.push(("a/C.class".to_string(), good[..good.len() / 2].to_vec()));
        write_jar(&jar, &entries);

        let missing_dir = base.join("gone");
        let mut scheduler = scheduler_for(
            vec![
                ClasspathRoot::Archive(jar),
                ClasspathRoot::Archive(base.join("missing.jar")),
                ClasspathRoot::Directory(missing_dir),
            ],
            3,
        );
        scheduler.start().unwrap();
        assert_eq!(scheduler.wait(), ScanState::Completed);

        let summary = scheduler.stats().summary();
        assert_eq!(summary.classes_parsed, 2);
        assert_eq!(summary.entries_failed, 3);
        assert_eq!(summary.roots_failed, 1);
        assert_eq!(scheduler.graph.attraction_between("a.B", "a.A"), 1.0);

        let Err(err) = open_archive(&base.join("missing.jar")) else {
            panic!("missing jar opened");
        };
        assert!(format!("{err:#}").contains("cannot open jar"));

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn malformed_constant_pool_fails_only_its_entry() {
        let base = temp_dir("wide_tail");
        let pkg = base.join("p");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("Bad.class"), trailing_long_pool(u16::MAX)).unwrap();
        fs::write(pkg.join("Good.class"), ClassBuilder::new("p/Good").build()).unwrap();

        let mut scheduler = scheduler_for(vec![ClasspathRoot::Directory(base.clone())], 2);
        scheduler.start().unwrap();
        assert_eq!(scheduler.wait(), ScanState::Completed);

        let summary = scheduler.stats().summary();
        assert_eq!(summary.classes_parsed, 1);
        assert_eq!(summary.entries_failed, 1);
        assert!(scheduler.graph.get("p.Good").is_some());

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn declared_entry_size_is_capped() {
        assert_eq!(prealloc_len(512), 512);
        assert_eq!(prealloc_len(0xFFFF_FFFF_FFFF_FF00), MAX_PREALLOC as usize);
    }

    #[test]
    fn panicking_entry_is_counted_as_failed() {
        let graph = Arc::new(DependencyGraph::new(ClassOriginResolver::default()));
        let ctx = ScanContext {
            graph,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: ScanStats::new(),
            chunk_size: 1,
        };

        ctx.guarded(Path::new("lib.jar"), "#0", || panic!("corrupt entry"));
        ctx.guarded(Path::new("lib.jar"), "#1", || Ok(()));

        assert_eq!(ctx.stats.summary().entries_failed, 1);
    }

    #[test]
    fn crashed_coordinator_still_leaves_a_terminal_state() {
        let mut scheduler = scheduler_for(Vec::new(), 1);
        *scheduler.state.lock() = ScanState::Scanning;
        scheduler.handle = Some(std::thread::spawn(|| panic!("coordinator died")));

        assert_eq!(scheduler.wait(), ScanState::Cancelled);
        assert!(scheduler.state().is_terminal());
    }

    #[test]
    fn scheduler_is_single_use() {
        let base = temp_dir("single_use");
        fs::create_dir_all(&base).unwrap();
        let mut scheduler = scheduler_for(vec![ClasspathRoot::Directory(base.clone())], 1);
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));
        assert_eq!(scheduler.wait(), ScanState::Completed);
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));
        assert_eq!(scheduler.graph.node_count(), 0);

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn cancel_stops_mid_archive_without_further_mutation() {
        let base = temp_dir("cancel");
        fs::create_dir_all(&base).unwrap();
        let jar = base.join("big.jar");
        let entries: Vec<(String, Vec<u8>)> = (0..5000)
            .map(|i| {
                let name = format!("big/C{i}");
                let bytes = ClassBuilder::new(&name)
                    .field("next", &format!("Lbig/C{};", i + 1))
                    .build();
                (format!("{name}.class"), bytes)
            })
            .collect();
        write_jar(&jar, &entries);

        let mut scheduler = scheduler_for(vec![ClasspathRoot::Archive(jar)], 2);
        scheduler.start().unwrap();
        scheduler.cancel();

        let started = Instant::now();
        assert_eq!(scheduler.wait(), ScanState::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));

        let nodes = scheduler.graph.node_count();
        let edges = scheduler.graph.edge_count();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.graph.node_count(), nodes);
        assert_eq!(scheduler.graph.edge_count(), edges);
        assert!(scheduler.stats().summary().classes_parsed < 5000);

        let _ = fs::remove_dir_all(base);
    }
}
