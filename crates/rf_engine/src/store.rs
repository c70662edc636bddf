//! Sample store: a role-tagged, flash-paged map of samples
//!
//! A store is either loaded (the in-RAM map is authoritative) or released
//! (the flash file is authoritative). Every public operation leaves it in
//! exactly one of those states.
//!
//! Data file layout, little endian:
//! `u32 sampleCount | u16 featureCount | sampleCount x (u16 id | u8 label | packed features)`

use crate::dataset::{parse_row, CsvReport, RowOutcome, MAX_SAMPLES};
use crate::deterministic::LcgRng;
use crate::errors::StoreError;
use crate::flash::{OpenMode, SharedFs};
use crate::sample::{packed_len, Sample};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Sentinel tree index meaning "no tree"
pub const NO_TREE: u8 = 255;

const HEADER_LEN: usize = 6;

/// Samples keyed by their stable ID
pub type SampleMap = BTreeMap<u16, Sample>;

/// What a store holds; decides its flash file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataRole {
    Base,
    Train,
    /// Bootstrap subset owned by tree `i`
    Subset(u8),
    Test,
    Valid,
}

impl DataRole {
    /// Flash path for this role
    pub fn path(&self) -> Result<String, StoreError> {
        Ok(match self {
            DataRole::Base => "/base_data.bin".to_string(),
            DataRole::Train => "/train_data.bin".to_string(),
            DataRole::Subset(NO_TREE) => return Err(StoreError::MissingTreeIndex),
            DataRole::Subset(i) => format!("/tree_{i}_data.bin"),
            DataRole::Test => "/test_data.bin".to_string(),
            DataRole::Valid => "/valid_data.bin".to_string(),
        })
    }
}

impl fmt::Display for DataRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRole::Base => write!(f, "BASE"),
            DataRole::Train => write!(f, "TRAIN"),
            DataRole::Subset(i) => write!(f, "SUB[{i}]"),
            DataRole::Test => write!(f, "TEST"),
            DataRole::Valid => write!(f, "VALID"),
        }
    }
}

/// Regenerates a store's samples after its flash copy became unreadable
pub trait RestoreHook: Send + Sync {
    fn restore(&self, role: DataRole) -> Option<SampleMap>;
}

impl<F> RestoreHook for F
where
    F: Fn(DataRole) -> Option<SampleMap> + Send + Sync,
{
    fn restore(&self, role: DataRole) -> Option<SampleMap> {
        self(role)
    }
}

/// Role-tagged sample collection paged to flash
pub struct SampleStore {
    fs: SharedFs,
    role: DataRole,
    num_features: u16,
    samples: SampleMap,
    loaded: bool,
    partial: bool,
    /// Rows kept by CSV ingestion
    sample_limit: usize,
    restore: Option<Arc<dyn RestoreHook>>,
}

impl fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleStore")
            .field("role", &self.role)
            .field("num_features", &self.num_features)
            .field("len", &self.samples.len())
            .field("loaded", &self.loaded)
            .field("partial", &self.partial)
            .finish()
    }
}

impl SampleStore {
    /// Empty, unloaded store; `num_features == 0` adopts the width found on flash
    pub fn new(fs: SharedFs, role: DataRole, num_features: u16) -> Self {
        Self {
            fs,
            role,
            num_features,
            samples: SampleMap::new(),
            loaded: false,
            partial: false,
            sample_limit: MAX_SAMPLES,
            restore: None,
        }
    }

    /// Cap CSV ingestion below the global `MAX_SAMPLES`
    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit.min(MAX_SAMPLES);
        self
    }

    /// Install the strategy used when flash I/O fails
    pub fn with_restore(mut self, hook: Arc<dyn RestoreHook>) -> Self {
        self.restore = Some(hook);
        self
    }

    pub fn role(&self) -> DataRole {
        self.role
    }

    pub fn num_features(&self) -> u16 {
        self.num_features
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Loaded through an ID filter; such a store never overwrites its file
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn path(&self) -> Result<String, StoreError> {
        self.role.path()
    }

    /// Whether a flash copy exists
    pub fn on_flash(&self) -> bool {
        self.path().map(|p| self.fs.exists(&p)).unwrap_or(false)
    }

    /// Number of samples resident in RAM
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> Result<&SampleMap, StoreError> {
        if !self.loaded {
            return Err(StoreError::NotLoaded(self.role));
        }
        Ok(&self.samples)
    }

    pub fn ids(&self) -> Result<Vec<u16>, StoreError> {
        Ok(self.samples()?.keys().copied().collect())
    }

    pub fn insert(&mut self, id: u16, sample: Sample) -> Result<(), StoreError> {
        if !self.loaded {
            return Err(StoreError::NotLoaded(self.role));
        }
        if self.num_features == 0 {
            self.num_features = sample.feature_count();
        }
        self.samples.insert(id, sample);
        Ok(())
    }

    /// Replace the contents with `samples` and mark the store loaded
    pub fn adopt(&mut self, samples: SampleMap) {
        if self.num_features == 0 {
            if let Some(first) = samples.values().next() {
                self.num_features = first.feature_count();
            }
        }
        self.samples = samples;
        self.loaded = true;
        self.partial = false;
    }

    /// Move the samples out, leaving the store unloaded and its file untouched
    pub fn take_samples(&mut self) -> Result<SampleMap, StoreError> {
        if !self.loaded {
            return Err(StoreError::NotLoaded(self.role));
        }
        self.loaded = false;
        self.partial = false;
        Ok(std::mem::take(&mut self.samples))
    }

    /// Load the full flash copy; no-op when already loaded
    pub fn load_data(&mut self) -> Result<(), StoreError> {
        if self.loaded {
            return Ok(());
        }
        let path = self.guarded_path()?;
        match self.read_file(&path, None) {
            Ok(samples) => {
                debug!(role = %self.role, samples = samples.len(), "loaded data");
                self.adopt(samples);
                Ok(())
            }
            Err(err) => self.try_restore(err, None),
        }
    }

    /// Load only the rows whose IDs appear in `ids`, seeking past the rest
    pub fn load_data_filtered(&mut self, ids: &[u16]) -> Result<(), StoreError> {
        if self.loaded {
            return Ok(());
        }
        let path = self.guarded_path()?;
        let mut wanted = ids.to_vec();
        if !wanted.windows(2).all(|w| w[0] <= w[1]) {
            wanted.sort_unstable();
        }
        wanted.dedup();

        match self.read_file(&path, Some(wanted.as_slice())) {
            Ok(samples) => {
                debug!(
                    role = %self.role,
                    requested = wanted.len(),
                    found = samples.len(),
                    "partially loaded data"
                );
                self.adopt(samples);
                self.partial = true;
                Ok(())
            }
            Err(err) => {
                self.try_restore(err, Some(wanted.as_slice()))?;
                self.partial = true;
                Ok(())
            }
        }
    }

    /// Drop the in-RAM copy, writing it to flash first unless `reuse_file`
    ///
    /// RAM is cleared even when the write fails; the next load then goes
    /// through the restore hook.
    pub fn release_data(&mut self, reuse_file: bool) -> Result<(), StoreError> {
        if !self.loaded {
            return Ok(());
        }
        let mut result = Ok(());
        if self.partial && !reuse_file {
            warn!(role = %self.role, "partial data is never written back, keeping existing file");
        } else if !reuse_file {
            result = self.guarded_path().and_then(|path| {
                self.write_file(&path).map_err(|err| {
                    let _ = self.fs.remove(&path);
                    err
                })
            });
            if let Err(err) = &result {
                error!(role = %self.role, error = %err, "failed to write data, dropping RAM copy");
            }
        }
        self.samples = SampleMap::new();
        self.loaded = false;
        self.partial = false;
        result
    }

    /// Delete the flash copy and clear RAM
    pub fn purge_data(&mut self) {
        self.samples = SampleMap::new();
        self.loaded = false;
        self.partial = false;
        if let Ok(path) = self.path() {
            if self.fs.exists(&path) {
                if let Err(err) = self.fs.remove(&path) {
                    warn!(path = %path, error = %err, "failed to remove data file");
                }
            }
        }
    }

    /// One-time ingestion of a `label,f1..fn` CSV; deletes the CSV on success
    ///
    /// `num_features == 0` takes the width from the first non-empty row.
    pub fn load_csv_data(
        &mut self,
        csv_path: &str,
        mut num_features: u16,
    ) -> Result<CsvReport, StoreError> {
        let file = self
            .fs
            .open(csv_path, OpenMode::Read)
            .map_err(|source| StoreError::Io {
                op: "open csv",
                path: csv_path.to_string(),
                source,
            })?;

        let mut report = CsvReport::default();
        let mut samples = SampleMap::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StoreError::Io {
                op: "read csv",
                path: csv_path.to_string(),
                source,
            })?;
            if samples.len() >= self.sample_limit {
                report.truncated += 1;
                continue;
            }
            if num_features == 0 && !line.trim().is_empty() {
                num_features = line.trim().split(',').count().saturating_sub(1) as u16;
                debug!(num_features, "feature count taken from first row");
            }
            match parse_row(&line, num_features) {
                RowOutcome::Empty => report.empty += 1,
                RowOutcome::Invalid(reason) => {
                    report.invalid += 1;
                    debug!(line = line_no + 1, reason = %reason, "skipping csv row");
                }
                RowOutcome::Valid(sample) => {
                    samples.insert(samples.len() as u16, sample);
                    report.valid += 1;
                }
            }
        }

        if report.truncated > 0 {
            warn!(limit = self.sample_limit, ignored = report.truncated, "sample cap reached");
        }
        info!(
            path = csv_path,
            valid = report.valid,
            invalid = report.invalid,
            empty = report.empty,
            "csv ingestion finished"
        );
        if samples.is_empty() {
            return Err(StoreError::EmptyCsv {
                path: csv_path.to_string(),
            });
        }

        self.num_features = num_features;
        self.adopt(samples);
        if let Err(err) = self.fs.remove(csv_path) {
            warn!(path = csv_path, error = %err, "could not delete source csv");
        }
        Ok(report)
    }

    /// Grow the map to `target` samples by duplicating random existing
    /// samples under unused IDs below `max_id`. Returns how many were added.
    pub fn bootstrap_data(
        &mut self,
        target: usize,
        max_id: u16,
        rng: &mut LcgRng,
    ) -> Result<usize, StoreError> {
        self.bootstrap_data_reserved(target, max_id, &BTreeSet::new(), rng)
    }

    /// Like [`bootstrap_data`](Self::bootstrap_data) but never hands out an ID in `reserved`
    pub fn bootstrap_data_reserved(
        &mut self,
        target: usize,
        max_id: u16,
        reserved: &BTreeSet<u16>,
        rng: &mut LcgRng,
    ) -> Result<usize, StoreError> {
        if !self.loaded {
            return Err(StoreError::NotLoaded(self.role));
        }
        let have = self.samples.len();
        if have >= target || have == 0 {
            return Ok(0);
        }
        let need = target - have;

        let gaps: Vec<u16> = (0..max_id)
            .filter(|id| !self.samples.contains_key(id) && !reserved.contains(id))
            .take(need)
            .collect();
        if gaps.len() < need {
            return Err(StoreError::IdSpaceExhausted { max_id, have, need });
        }

        let originals: Vec<u16> = self.samples.keys().copied().collect();
        for gap in gaps {
            let source = originals[rng.next_below(originals.len())];
            if let Some(sample) = self.samples.get(&source).cloned() {
                self.samples.insert(gap, sample);
            }
        }
        debug!(role = %self.role, added = need, total = self.samples.len(), "bootstrapped data");
        Ok(need)
    }

    fn guarded_path(&self) -> Result<String, StoreError> {
        self.path().map_err(|err| {
            error!(role = %self.role, "subset data requires an owning tree index");
            err
        })
    }

    fn try_restore(&mut self, err: StoreError, filter: Option<&[u16]>) -> Result<(), StoreError> {
        warn!(role = %self.role, error = %err, "data load failed");
        let Some(hook) = self.restore.clone() else {
            return Err(err);
        };
        match hook.restore(self.role) {
            Some(mut samples) => {
                if let Some(ids) = filter {
                    samples.retain(|id, _| ids.binary_search(id).is_ok());
                }
                info!(role = %self.role, samples = samples.len(), "data restored");
                self.adopt(samples);
                Ok(())
            }
            None => {
                error!(role = %self.role, "restore produced no data");
                Err(err)
            }
        }
    }

    fn read_file(&mut self, path: &str, filter: Option<&[u16]>) -> Result<SampleMap, StoreError> {
        let file = self
            .fs
            .open(path, OpenMode::Read)
            .map_err(|source| StoreError::Io {
                op: "open",
                path: path.to_string(),
                source,
            })?;
        let mut reader = BufReader::new(file);
        let corrupt = |reason: String| StoreError::Format {
            path: path.to_string(),
            reason,
        };
        let read_err = |source: io::Error, what: &str| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                corrupt(format!("truncated {what}"))
            } else {
                StoreError::Io {
                    op: "read",
                    path: path.to_string(),
                    source,
                }
            }
        };

        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .map_err(|e| read_err(e, "header"))?;
        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let features = u16::from_le_bytes([header[4], header[5]]);
        if self.num_features != 0 && features != self.num_features {
            return Err(StoreError::FeatureCount {
                path: path.to_string(),
                expected: self.num_features,
                found: features,
            });
        }
        if count as usize > MAX_SAMPLES {
            return Err(corrupt(format!("sample count {count} above {MAX_SAMPLES}")));
        }
        self.num_features = features;

        let body_len = packed_len(features);
        let mut samples = SampleMap::new();
        let mut id_buf = [0u8; 2];
        for index in 0..count {
            if let Some(ids) = filter {
                if samples.len() == ids.len() {
                    break;
                }
            }
            reader
                .read_exact(&mut id_buf)
                .map_err(|e| read_err(e, &format!("sample {index}")))?;
            let id = u16::from_le_bytes(id_buf);

            if let Some(ids) = filter {
                if ids.binary_search(&id).is_err() {
                    reader
                        .seek_relative(1 + body_len as i64)
                        .map_err(|e| read_err(e, &format!("sample {index}")))?;
                    continue;
                }
            }

            let mut record = vec![0u8; 1 + body_len];
            reader
                .read_exact(&mut record)
                .map_err(|e| read_err(e, &format!("sample {index}")))?;
            let label = record[0];
            record.remove(0);
            samples.insert(id, Sample::from_packed(label, features, record));
        }
        Ok(samples)
    }

    fn write_file(&self, path: &str) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            op: "write",
            path: path.to_string(),
            source,
        };
        let file = self.fs.open(path, OpenMode::Write).map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        let encode = |writer: &mut BufWriter<_>| -> io::Result<()> {
            writer.write_all(&(self.samples.len() as u32).to_le_bytes())?;
            writer.write_all(&self.num_features.to_le_bytes())?;
            for (id, sample) in &self.samples {
                writer.write_all(&id.to_le_bytes())?;
                writer.write_all(&[sample.label])?;
                writer.write_all(sample.packed())?;
            }
            writer.flush()
        };
        encode(&mut writer).map_err(io_err)?;
        debug!(role = %self.role, path, samples = self.samples.len(), "released data to flash");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{FlashFs, MemFs};
    use parking_lot::Mutex;

    fn sample(label: u8, values: &[u8]) -> Sample {
        Sample::from_values(label, values).unwrap()
    }

    fn filled_store(fs: &MemFs, role: DataRole, n: u16) -> SampleStore {
        let mut store = SampleStore::new(Arc::new(fs.clone()), role, 3);
        let samples = (0..n)
            .map(|i| (i, sample((i % 2) as u8, &[(i % 4) as u8, 1, 2])))
            .collect();
        store.adopt(samples);
        store
    }

    #[test]
    fn test_release_then_load_round_trip() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Train, 5);
        let before = store.samples().unwrap().clone();

        store.release_data(false).unwrap();
        assert!(!store.is_loaded());
        assert!(store.is_empty());
        // 6 byte header + 5 x (2 + 1 + 1)
        assert_eq!(fs.file_len("/train_data.bin"), Some(26));

        store.load_data().unwrap();
        assert_eq!(store.samples().unwrap(), &before);
    }

    #[test]
    fn test_load_and_release_are_idempotent() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Test, 4);
        store.insert(100, sample(1, &[3, 3, 3])).unwrap();
        store.load_data().unwrap();
        assert_eq!(store.len(), 5);

        store.release_data(false).unwrap();
        let bytes = fs.get("/test_data.bin");
        store.release_data(false).unwrap();
        assert!(!store.is_loaded());
        assert_eq!(fs.get("/test_data.bin"), bytes);
    }

    #[test]
    fn test_access_requires_loaded() {
        let fs = MemFs::new();
        let mut store = SampleStore::new(Arc::new(fs), DataRole::Base, 2);
        assert!(matches!(store.samples(), Err(StoreError::NotLoaded(DataRole::Base))));
        assert!(store.insert(0, sample(0, &[0, 0])).is_err());
    }

    #[test]
    fn test_subset_without_tree_is_rejected() {
        let fs = MemFs::new();
        let mut store = SampleStore::new(Arc::new(fs), DataRole::Subset(NO_TREE), 2);
        assert!(matches!(store.load_data(), Err(StoreError::MissingTreeIndex)));
        assert!(!store.is_loaded());
        assert_eq!(DataRole::Subset(4).path().unwrap(), "/tree_4_data.bin");
    }

    #[test]
    fn test_filtered_load_skips_rows() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Base, 20);
        store.release_data(false).unwrap();

        store.load_data_filtered(&[17, 3, 9, 250]).unwrap();
        assert!(store.is_partial());
        let ids = store.ids().unwrap();
        assert_eq!(ids, vec![3, 9, 17]);

        // a partial copy must not clobber the full file
        store.release_data(false).unwrap();
        let mut full = SampleStore::new(Arc::new(fs), DataRole::Base, 3);
        full.load_data().unwrap();
        assert_eq!(full.len(), 20);
    }

    #[test]
    fn test_feature_count_mismatch() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Train, 3);
        store.release_data(false).unwrap();
        let mut other = SampleStore::new(Arc::new(fs), DataRole::Train, 8);
        assert!(matches!(
            other.load_data(),
            Err(StoreError::FeatureCount { expected: 8, found: 3, .. })
        ));
    }

    #[test]
    fn test_truncated_file_is_format_error() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Train, 3);
        store.release_data(false).unwrap();
        let mut bytes = fs.get("/train_data.bin").unwrap();
        bytes.truncate(bytes.len() - 2);
        fs.put("/train_data.bin", bytes);

        assert!(matches!(store.load_data(), Err(StoreError::Format { .. })));
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_csv_ingestion_counts_and_deletes_source() {
        let fs = MemFs::new();
        fs.put(
            "/data.csv",
            b"0,0,1\n1,3,3\n\n2,1\nx,1,1\n1,2,2\n".to_vec(),
        );
        let mut store = SampleStore::new(Arc::new(fs.clone()), DataRole::Base, 0);
        let report = store.load_csv_data("/data.csv", 2).unwrap();

        assert_eq!(report.valid, 3);
        assert_eq!(report.invalid, 2);
        assert_eq!(report.empty, 1);
        assert_eq!(store.ids().unwrap(), vec![0, 1, 2]);
        assert_eq!(store.num_features(), 2);
        assert!(!fs.exists("/data.csv"));
    }

    #[test]
    fn test_csv_rows_beyond_the_cap_are_truncated() {
        let fs = MemFs::new();
        let csv: String = (0..12).map(|i| format!("{},{},{}\n", i % 2, i % 4, 3 - i % 4)).collect();
        fs.put("/data.csv", csv.into_bytes());
        let mut store =
            SampleStore::new(Arc::new(fs.clone()), DataRole::Base, 0).with_sample_limit(5);
        let report = store.load_csv_data("/data.csv", 0).unwrap();

        assert_eq!(report.valid, 5);
        assert_eq!(report.truncated, 7);
        assert_eq!(report.total_lines(), 12);
        assert_eq!(store.len(), 5);
        assert_eq!(store.ids().unwrap(), vec![0, 1, 2, 3, 4]);

        let store = SampleStore::new(Arc::new(fs), DataRole::Base, 0).with_sample_limit(usize::MAX);
        assert_eq!(store.sample_limit, MAX_SAMPLES);
    }

    #[test]
    fn test_csv_without_valid_rows_keeps_source() {
        let fs = MemFs::new();
        fs.put("/data.csv", b"1,2,3,4\n".to_vec());
        let mut store = SampleStore::new(Arc::new(fs.clone()), DataRole::Base, 0);
        assert!(matches!(
            store.load_csv_data("/data.csv", 2),
            Err(StoreError::EmptyCsv { .. })
        ));
        assert!(fs.exists("/data.csv"));
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_bootstrap_ten_to_fifteen() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Train, 10);
        let originals = store.samples().unwrap().clone();
        let mut rng = LcgRng::new(37);

        let added = store.bootstrap_data(15, 100, &mut rng).unwrap();
        assert_eq!(added, 5);
        let samples = store.samples().unwrap();
        assert_eq!(samples.len(), 15);
        for (id, original) in &originals {
            assert_eq!(samples.get(id), Some(original));
        }
        for (id, copy) in samples.iter().filter(|(id, _)| !originals.contains_key(id)) {
            assert!(*id >= 10);
            assert!(originals.values().any(|s| s == copy));
        }
    }

    #[test]
    fn test_bootstrap_respects_reserved_and_limits() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Subset(0), 3);
        let reserved: BTreeSet<u16> = [3, 4].into_iter().collect();
        let mut rng = LcgRng::new(1);

        store
            .bootstrap_data_reserved(5, 10, &reserved, &mut rng)
            .unwrap();
        assert_eq!(store.ids().unwrap(), vec![0, 1, 2, 5, 6]);

        assert!(matches!(
            store.bootstrap_data(20, 8, &mut rng),
            Err(StoreError::IdSpaceExhausted { .. })
        ));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_restore_hook_runs_on_io_failure() {
        let fs = MemFs::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let hook = move |role: DataRole| {
            seen.lock().push(role);
            let mut map = SampleMap::new();
            map.insert(7, Sample::from_values(1, &[1, 1, 1]).unwrap());
            Some(map)
        };

        let mut store = SampleStore::new(Arc::new(fs.clone()), DataRole::Subset(2), 3)
            .with_restore(Arc::new(hook));
        fs.fail_path("/tree_2_data.bin");
        store.load_data().unwrap();

        assert!(store.is_loaded());
        assert_eq!(store.ids().unwrap(), vec![7]);
        assert_eq!(calls.lock().as_slice(), &[DataRole::Subset(2)]);
    }

    #[test]
    fn test_failed_release_clears_ram() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Valid, 3);
        fs.fail_path("/valid_data.bin");
        assert!(store.release_data(false).is_err());
        assert!(!store.is_loaded());
        assert!(store.is_empty());
        assert!(store.load_data().is_err());
    }

    #[test]
    fn test_purge_removes_file() {
        let fs = MemFs::new();
        let mut store = filled_store(&fs, DataRole::Train, 2);
        store.release_data(false).unwrap();
        assert!(store.on_flash());
        store.purge_data();
        assert!(!store.on_flash());
        assert!(!store.is_loaded());
    }
}
