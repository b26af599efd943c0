//! The top-level database object (§4.1, §4.8): owns the backend, header, sources, and
//! archives, and orchestrates updates and state copies behind a single mutex (§5's "Coalesce
//! these into a single mutex on the database struct, taken at the public surface only").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::ensure;

use crate::archive::{self, ArcState, ArchiveDef, ArchiveHeader, ConsolidationFunction};
use crate::backend::file::{FileBackend, LockMode};
use crate::backend::memory::MemoryBackend;
use crate::backend::ByteBackend;
use crate::config::RrdDef;
use crate::datasource::{DataSource, DsDef, PdpOutcome};
use crate::error::{InvalidArgumentSnafu, InvalidTimestampSnafu, Result, UnknownArchiveSnafu, UnknownDataSourceSnafu};
use crate::header::Header;
use crate::primitives::{Double, Int, Long, SlotAllocator, Str};
use crate::robin::Robin;

struct ArchiveEntry {
    header: ArchiveHeader,
    states: Vec<ArcState>,
    robins: Vec<Robin>,
}

/// A read-only snapshot of a database's shape, used by tests and by pool/`copy_state_to`
/// callers that need a description without holding the update mutex open.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub step: i64,
    pub last_update: i64,
    pub source_names: Vec<String>,
    pub archives: Vec<(ConsolidationFunction, i32, i32)>,
}

/// The top-level RRD database: owns the backend, header, data sources, and archives.
pub struct Database {
    backend: Arc<dyn ByteBackend>,
    header: Header,
    sources: Vec<DataSource>,
    source_index: HashMap<String, usize>,
    archives: Vec<ArchiveEntry>,
    step: i64,
    mutex: Mutex<()>,
    read_only: bool,
    path: PathBuf,
}

impl Database {
    /// Computes the exact byte length a database created from `def` will occupy (§3's size
    /// invariant), independent of any backend.
    pub fn expected_size(def: &RrdDef) -> u64 {
        let d = def.sources.len() as u64;
        let header_size = Str::SIZE + Long::SIZE + Int::SIZE + Int::SIZE + Long::SIZE;
        let source_size = Str::SIZE * 2 + Long::SIZE + Double::SIZE * 5;
        let archive_header_size = Str::SIZE + Double::SIZE + Int::SIZE * 2;
        let arc_state_size = Double::SIZE + Int::SIZE;

        let mut total = header_size + d * source_size;
        for a in &def.archives {
            total += archive_header_size;
            total += d * arc_state_size;
            total += d * (Int::SIZE + 8 * a.rows as u64);
        }
        total
    }

    /// Creates a new database backed by a file at `def.path()`.
    #[tracing::instrument(skip(def), level = "trace")]
    pub fn create(def: RrdDef) -> Result<Self> {
        let size = Self::expected_size(&def);
        let backend: Arc<dyn ByteBackend> = Arc::new(FileBackend::create(def.path(), size)?);
        Self::create_on_backend(backend, &def, false)
    }

    /// Creates a new, ephemeral database backed entirely by memory.
    pub fn create_in_memory(def: RrdDef) -> Result<Self> {
        let size = Self::expected_size(&def);
        let backend: Arc<dyn ByteBackend> = Arc::new(MemoryBackend::new(size));
        Self::create_on_backend(backend, &def, false)
    }

    fn create_on_backend(backend: Arc<dyn ByteBackend>, def: &RrdDef, read_only: bool) -> Result<Self> {
        let ds_count = def.sources.len();
        let archive_rows: Vec<usize> = def.archives.iter().map(|a| a.rows as usize).collect();

        let mut alloc = SlotAllocator::new();
        let (header, _) = Header::allocate(&mut alloc, backend.clone());
        let sources = Self::allocate_sources(&mut alloc, &backend, ds_count);
        let archive_headers = Self::allocate_archive_headers(&mut alloc, &backend, def.archives.len());
        let states = Self::allocate_arc_states(&mut alloc, &backend, def.archives.len(), ds_count);
        let robins = Self::allocate_robins(&mut alloc, &backend, &archive_rows, ds_count);

        header.init(
            "",
            def.step(),
            ds_count as i32,
            def.archives.len() as i32,
            def.start_time(),
        )?;
        for (ds, d) in sources.iter().zip(&def.sources) {
            ds.init(d, def.start_time(), def.step())?;
        }
        for (i, h) in archive_headers.iter().enumerate() {
            h.init(&def.archives[i])?;
            for s in &states[i] {
                s.init()?;
            }
            for r in &robins[i] {
                r.init()?;
            }
        }

        let archives = archive_headers
            .into_iter()
            .zip(states)
            .zip(robins)
            .map(|((header, states), robins)| ArchiveEntry { header, states, robins })
            .collect();

        let source_index = Self::build_source_index(&sources)?;

        Ok(Self {
            backend,
            header,
            sources,
            source_index,
            archives,
            step: def.step(),
            mutex: Mutex::new(()),
            read_only,
            path: def.path().to_path_buf(),
        })
    }

    /// Opens an existing database, re-binding the stored layout without writing anything.
    #[tracing::instrument(level = "trace")]
    pub fn open<P: AsRef<Path> + std::fmt::Debug>(path: P, read_only: bool, lock_mode: LockMode) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let backend: Arc<dyn ByteBackend> = Arc::new(FileBackend::open(path, read_only, lock_mode)?);
        Self::open_on_backend(backend, read_only, path_buf)
    }

    fn open_on_backend(backend: Arc<dyn ByteBackend>, read_only: bool, path: PathBuf) -> Result<Self> {
        let mut alloc = SlotAllocator::new();
        let (header, _) = Header::allocate(&mut alloc, backend.clone());
        header.validate_signature()?;

        let ds_count = header.ds_count()? as usize;
        let arc_count = header.arc_count()? as usize;
        let step = header.step()?;

        let sources = Self::allocate_sources(&mut alloc, &backend, ds_count);
        let archive_headers = Self::allocate_archive_headers(&mut alloc, &backend, arc_count);
        let archive_rows: Vec<usize> = archive_headers
            .iter()
            .map(|h| h.rows().map(|r| r as usize))
            .collect::<Result<_>>()?;
        let states = Self::allocate_arc_states(&mut alloc, &backend, arc_count, ds_count);
        let robins = Self::allocate_robins(&mut alloc, &backend, &archive_rows, ds_count);

        let archives = archive_headers
            .into_iter()
            .zip(states)
            .zip(robins)
            .map(|((header, states), robins)| ArchiveEntry { header, states, robins })
            .collect();

        let source_index = Self::build_source_index(&sources)?;

        Ok(Self {
            backend,
            header,
            sources,
            source_index,
            archives,
            step,
            mutex: Mutex::new(()),
            read_only,
            path,
        })
    }

    fn allocate_sources(alloc: &mut SlotAllocator, backend: &Arc<dyn ByteBackend>, count: usize) -> Vec<DataSource> {
        (0..count).map(|_| DataSource::allocate(alloc, backend.clone()).0).collect()
    }

    fn allocate_archive_headers(
        alloc: &mut SlotAllocator,
        backend: &Arc<dyn ByteBackend>,
        count: usize,
    ) -> Vec<ArchiveHeader> {
        (0..count).map(|_| ArchiveHeader::allocate(alloc, backend.clone()).0).collect()
    }

    fn allocate_arc_states(
        alloc: &mut SlotAllocator,
        backend: &Arc<dyn ByteBackend>,
        archive_count: usize,
        ds_count: usize,
    ) -> Vec<Vec<ArcState>> {
        (0..archive_count)
            .map(|_| (0..ds_count).map(|_| ArcState::allocate(alloc, backend.clone()).0).collect())
            .collect()
    }

    fn allocate_robins(
        alloc: &mut SlotAllocator,
        backend: &Arc<dyn ByteBackend>,
        archive_rows: &[usize],
        ds_count: usize,
    ) -> Vec<Vec<Robin>> {
        archive_rows
            .iter()
            .map(|&rows| (0..ds_count).map(|_| Robin::allocate(alloc, backend.clone(), rows).0).collect())
            .collect()
    }

    fn build_source_index(sources: &[DataSource]) -> Result<HashMap<String, usize>> {
        let mut map = HashMap::with_capacity(sources.len());
        for (i, s) in sources.iter().enumerate() {
            map.insert(s.name()?, i);
        }
        Ok(map)
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn last_update_time(&self) -> Result<i64> {
        self.header.last_update()
    }

    pub fn data_source_names(&self) -> Result<Vec<String>> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn source_index(&self, name: &str) -> Result<usize> {
        self.source_index
            .get(name)
            .copied()
            .ok_or_else(|| UnknownDataSourceSnafu { name: name.to_string() }.build())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Read-only descriptions of each archive: `(cf, steps, rows)`.
    pub fn archives(&self) -> Result<Vec<(ConsolidationFunction, i32, i32)>> {
        self.archives
            .iter()
            .map(|a| Ok((a.header.cf()?, a.header.steps()?, a.header.rows()?)))
            .collect()
    }

    pub fn info(&self) -> Result<DatabaseInfo> {
        Ok(DatabaseInfo {
            step: self.step,
            last_update: self.last_update_time()?,
            source_names: self.data_source_names()?,
            archives: self.archives()?,
        })
    }

    pub(crate) fn archive_window(&self, archive_idx: usize) -> Result<(i64, i64, i64)> {
        let entry = self
            .archives
            .get(archive_idx)
            .ok_or_else(|| UnknownArchiveSnafu { reason: format!("no archive at index {archive_idx}") }.build())?;
        let steps = entry.header.steps()? as i64;
        let rows = entry.header.rows()? as i64;
        let archive_step = steps * self.step;
        let last_update = self.last_update_time()?;
        let end = crate::util::step_floor(last_update, archive_step);
        let start = end - archive_step * (rows - 1);
        Ok((start, end, archive_step))
    }

    fn archive_def_for(&self, archive_idx: usize) -> Result<ArchiveDef> {
        let entry = &self.archives[archive_idx];
        Ok(ArchiveDef {
            cf: entry.header.cf()?,
            xff: entry.header.xff()?,
            steps: entry.header.steps()?,
            rows: entry.header.rows()?,
        })
    }

    fn archive_count(&self) -> usize {
        self.archives.len()
    }

    pub(crate) fn robin_value_at(&self, archive_idx: usize, source_idx: usize, ts: i64) -> Result<f64> {
        let (start, end, archive_step) = self.archive_window(archive_idx)?;
        if ts < start || ts > end {
            return Ok(f64::NAN);
        }
        let i = ((ts - start) / archive_step) as usize;
        self.archives[archive_idx].robins[source_idx].get_value(i)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The path this database was created or opened with. Used as the [`crate::pool::Pool`]
    /// cache key; unrelated to which backend actually stores the bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feeds one dense row of per-source readings (indexed the same way as
    /// [`Database::data_source_names`]) through the PDP processor and, for any source whose
    /// step just completed, through every archive's CDP pipeline.
    #[tracing::instrument(skip(self, values), level = "trace")]
    pub(crate) fn apply_update(&self, time: i64, values: &[f64]) -> Result<()> {
        ensure!(
            !self.read_only,
            InvalidArgumentSnafu {
                reason: "cannot update a read-only database".to_string(),
            }
        );
        ensure!(
            values.len() == self.sources.len(),
            InvalidArgumentSnafu {
                reason: format!(
                    "update supplied {} values for {} data sources",
                    values.len(),
                    self.sources.len()
                ),
            }
        );

        let _guard = self.mutex.lock();
        let last = self.header.last_update()?;
        ensure!(
            time > last,
            InvalidTimestampSnafu {
                given: time,
                last_update: last,
            }
        );

        for (idx, &raw) in values.iter().enumerate() {
            let ds = &self.sources[idx];
            let outcome = ds.process_sample(last, time, raw, self.step)?;
            if let PdpOutcome::StepCompleted {
                pdp,
                num_steps,
                first_step_end,
            } = outcome
            {
                trace!(source = idx, pdp, num_steps, "pdp step completed");
                for archive in &self.archives {
                    archive::update_archive(
                        &archive.header,
                        &archive.states[idx],
                        &archive.robins[idx],
                        pdp,
                        num_steps,
                        first_step_end,
                        self.step,
                    )?;
                }
            }
        }

        self.header.set_last_update(time)?;
        Ok(())
    }

    /// Copies header, source, and archive state from `self` into `other`, matching sources
    /// by name and archives by `(cf, steps)` (§4.8). The caller must ensure `self` is not
    /// concurrently updated for the duration of the copy.
    pub fn copy_state_to(&self, other: &Database) -> Result<()> {
        let _self_guard = self.mutex.lock();
        let _other_guard = other.mutex.lock();

        other.header.copy_state_from(&self.header)?;

        for (name, &self_idx) in &self.source_index {
            if let Some(&other_idx) = other.source_index.get(name) {
                other.sources[other_idx].copy_state_from(&self.sources[self_idx])?;
            }
        }

        for self_archive in &self.archives {
            let key = (self_archive.header.cf()?, self_archive.header.steps()?);
            for other_archive in &other.archives {
                if (other_archive.header.cf()?, other_archive.header.steps()?) != key {
                    continue;
                }
                for (name, &self_idx) in &self.source_index {
                    if let Some(&other_idx) = other.source_index.get(name) {
                        other_archive.states[other_idx].copy_state_from(&self_archive.states[self_idx])?;
                        self_archive.robins[self_idx].copy_state_to(&other_archive.robins[other_idx])?;
                    }
                }
            }
        }

        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }

    /// Starts a one-shot [`crate::sample::Sample`] update for `time`. Every source defaults
    /// to `NaN` ("unknown") until staged with [`crate::sample::Sample::set`].
    pub fn create_sample(&self, time: i64) -> crate::sample::Sample<'_> {
        crate::sample::Sample::new(self, time)
    }

    /// Creates a new database from a bulk state dump (§6's Importer contract), writing the
    /// imported definition and per-source/per-archive running state in the same strict,
    /// reproducible allocation order [`Database::create`] uses for a brand-new database.
    #[tracing::instrument(skip(importer), level = "trace")]
    pub fn import<P: AsRef<Path> + std::fmt::Debug>(path: P, importer: &dyn crate::importer::Importer) -> Result<Self> {
        use crate::importer::Importer;

        let step = importer.step()?;
        let last_update = importer.last_update()?;
        let ds_count = importer.ds_count()?;
        let arc_count = importer.arc_count()?;

        let ds_defs: Vec<_> = (0..ds_count).map(|i| importer.data_source(i)).collect::<Result<_>>()?;
        let arc_defs: Vec<_> = (0..arc_count).map(|i| importer.archive(i)).collect::<Result<_>>()?;
        let archive_rows: Vec<usize> = arc_defs.iter().map(|a| a.rows as usize).collect();

        let header_size = Str::SIZE + Long::SIZE + Int::SIZE + Int::SIZE + Long::SIZE;
        let source_size = Str::SIZE * 2 + Long::SIZE + Double::SIZE * 5;
        let archive_header_size = Str::SIZE + Double::SIZE + Int::SIZE * 2;
        let arc_state_size = Double::SIZE + Int::SIZE;
        let mut size = header_size + (ds_count as u64) * source_size;
        for rows in &archive_rows {
            size += archive_header_size + (ds_count as u64) * arc_state_size + (ds_count as u64) * (Int::SIZE + 8 * (*rows as u64));
        }

        let backend: Arc<dyn ByteBackend> = Arc::new(FileBackend::create(&path, size)?);

        let mut alloc = SlotAllocator::new();
        let (header, _) = Header::allocate(&mut alloc, backend.clone());
        let sources = Self::allocate_sources(&mut alloc, &backend, ds_count);
        let archive_headers = Self::allocate_archive_headers(&mut alloc, &backend, arc_count);
        let states = Self::allocate_arc_states(&mut alloc, &backend, arc_count, ds_count);
        let robins = Self::allocate_robins(&mut alloc, &backend, &archive_rows, ds_count);

        header.init("", step, ds_count as i32, arc_count as i32, last_update)?;

        for (ds, imported) in sources.iter().zip(&ds_defs) {
            let def = DsDef::new(&imported.name, imported.ds_type, imported.heartbeat, imported.min, imported.max)?;
            ds.init(&def, last_update, step)?;
            ds.load_imported_state(imported.last_value, imported.accumulated_value, imported.nan_seconds)?;
        }

        for (a, header_slot) in archive_headers.iter().enumerate() {
            let imported_arc = &arc_defs[a];
            header_slot.init(&ArchiveDef::new(imported_arc.cf, imported_arc.xff, imported_arc.steps, imported_arc.rows)?)?;
            for d in 0..ds_count {
                let imported = importer.arc_state(a, d)?;
                states[a][d].load_imported_state(imported.accumulated_value, imported.nan_steps)?;
                robins[a][d].load(&imported.values)?;
            }
        }

        let archives = archive_headers
            .into_iter()
            .zip(states)
            .zip(robins)
            .map(|((header, states), robins)| ArchiveEntry { header, states, robins })
            .collect();

        let source_index = Self::build_source_index(&sources)?;

        Ok(Self {
            backend,
            header,
            sources,
            source_index,
            archives,
            step,
            mutex: Mutex::new(()),
            read_only: false,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Materializes an aligned time-series window per §4.7.
    #[tracing::instrument(skip(self, req), level = "trace")]
    pub fn fetch(&self, req: &crate::fetch::FetchRequest) -> Result<crate::fetch::FetchData> {
        let _guard = self.mutex.lock();
        crate::fetch::fetch_data(self, req)
    }

    /// The weaker archive selector from §4.7, exposed alongside [`Database::fetch`]: picks
    /// the archive matching `cf` best suited to a window starting at `start_time`, without
    /// requiring it to fully cover an end time. Useful for callers (e.g. a `last`/`graph`
    /// style command) that only know where a window should start.
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn find_start_match(&self, cf: ConsolidationFunction, start_time: i64, resolution: i64) -> Result<ArchiveDef> {
        let _guard = self.mutex.lock();
        let idx = crate::fetch::find_start_match(self, cf, start_time, resolution)?;
        debug_assert!(idx < self.archive_count());
        self.archive_def_for(idx)
    }
}
