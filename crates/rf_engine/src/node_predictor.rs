//! Node-count predictor
//!
//! A three-coefficient linear model `bias + c1 * min_split + c2 * max_depth`
//! fitted from a rolling log of observed tree sizes. It sizes the induction
//! queue before a tree is built.
//!
//! Model file, little endian:
//! `u32 magic | u8 trained | u8 accuracy | u8 peakPercent | u8 coeffCount | 3 x f32`

use crate::errors::PredictorError;
use crate::flash::{OpenMode, SharedFs};
use std::io::{self, BufRead, BufReader, Read, Write};
use tracing::{debug, info, warn};

/// "NODE"
pub const PREDICTOR_MAGIC: u32 = 0x4E4F_4445;
pub const PREDICTOR_PATH: &str = "/node_predictor.bin";
pub const PREDICTOR_LOG_PATH: &str = "/node_predictor_log.csv";
pub const LOG_HEADER: &str = "min_split,max_depth,total_nodes";
/// Rows kept in the rolling log
pub const LOG_CAPACITY: usize = 50;
pub const DEFAULT_PEAK_PERCENT: u8 = 30;

const MIN_ESTIMATE: f32 = 10.0;
const COEFF_COUNT: u8 = 3;

/// One observation of a built tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSample {
    pub min_split: u16,
    pub max_depth: u16,
    pub total_nodes: u16,
}

impl NodeSample {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split(',').map(|f| f.trim().parse::<u16>());
        let sample = Self {
            min_split: fields.next()?.ok()?,
            max_depth: fields.next()?.ok()?,
            total_nodes: fields.next()?.ok()?,
        };
        fields.next().is_none().then_some(sample)
    }

    fn has_zero(&self) -> bool {
        self.min_split == 0 || self.max_depth == 0 || self.total_nodes == 0
    }
}

pub struct NodePredictor {
    fs: SharedFs,
    /// bias, min_split slope, max_depth slope
    coefficients: [f32; 3],
    trained: bool,
    accuracy: u8,
    peak_percent: u8,
}

impl NodePredictor {
    pub fn new(fs: SharedFs) -> Self {
        Self {
            fs,
            coefficients: [0.0; 3],
            trained: false,
            accuracy: 0,
            peak_percent: DEFAULT_PEAK_PERCENT,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn accuracy(&self) -> u8 {
        self.accuracy
    }

    pub fn peak_percent(&self) -> u8 {
        self.peak_percent
    }

    pub fn coefficients(&self) -> [f32; 3] {
        self.coefficients
    }

    /// Expected node count for a tree built with these parameters
    pub fn estimate(&self, min_split: u16, max_depth: u16) -> u16 {
        let raw = if self.trained {
            Self::evaluate(self.coefficients, min_split, max_depth)
        } else if min_split == 0 || max_depth == 0 {
            100.0
        } else {
            100.0 - 12.0 * min_split as f32 + 3.0 * max_depth as f32
        };
        raw.max(MIN_ESTIMATE).round().min(u16::MAX as f32) as u16
    }

    /// Share of the estimate expected to sit in the build queue at once
    pub fn estimate_peak(&self, min_split: u16, max_depth: u16) -> usize {
        let nodes = self.estimate(min_split, max_depth) as usize;
        (nodes * self.peak_percent as usize / 100).max(1)
    }

    fn evaluate(c: [f32; 3], min_split: u16, max_depth: u16) -> f32 {
        c[0] + c[1] * min_split as f32 + c[2] * max_depth as f32
    }

    /// Read the model file; leaves the predictor untouched on failure
    pub fn load(&mut self) -> Result<(), PredictorError> {
        let io_err = |op, source| PredictorError::Io {
            op,
            path: PREDICTOR_PATH.to_string(),
            source,
        };
        let corrupt = |reason: &str| PredictorError::Format {
            path: PREDICTOR_PATH.to_string(),
            reason: reason.to_string(),
        };

        let mut file = self
            .fs
            .open(PREDICTOR_PATH, OpenMode::Read)
            .map_err(|e| io_err("open", e))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)
            .map_err(|e| io_err("read", e))?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != PREDICTOR_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let (trained, accuracy, mut peak, count) = (header[4] != 0, header[5], header[6], header[7]);
        if count != COEFF_COUNT {
            return Err(corrupt("coefficient count is not 3"));
        }

        let mut coefficients = [0f32; 3];
        let mut word = [0u8; 4];
        for coefficient in coefficients.iter_mut() {
            file.read_exact(&mut word).map_err(|e| io_err("read", e))?;
            *coefficient = f32::from_le_bytes(word);
        }

        // files written by an older scaling bug carry peakPercent = 0
        if peak == 0 {
            warn!("predictor file has peak percent 0, using {DEFAULT_PEAK_PERCENT}");
            peak = DEFAULT_PEAK_PERCENT;
        }

        self.coefficients = coefficients;
        self.trained = trained;
        self.accuracy = accuracy;
        self.peak_percent = peak;
        debug!(trained, accuracy, peak, "node predictor loaded");
        Ok(())
    }

    pub fn save(&self) -> Result<(), PredictorError> {
        let io_err = |op, source| PredictorError::Io {
            op,
            path: PREDICTOR_PATH.to_string(),
            source,
        };
        let mut bytes = Vec::with_capacity(20);
        bytes.extend_from_slice(&PREDICTOR_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&[
            self.trained as u8,
            self.accuracy,
            self.peak_percent,
            COEFF_COUNT,
        ]);
        for c in self.coefficients {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        let mut file = self
            .fs
            .open(PREDICTOR_PATH, OpenMode::Write)
            .map_err(|e| io_err("open", e))?;
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| io_err("write", e))
    }

    /// Logged observations, newest first; a missing log reads as empty
    pub fn read_log(&self) -> Result<Vec<NodeSample>, PredictorError> {
        if !self.fs.exists(PREDICTOR_LOG_PATH) {
            return Ok(Vec::new());
        }
        let io_err = |op, source: io::Error| PredictorError::Io {
            op,
            path: PREDICTOR_LOG_PATH.to_string(),
            source,
        };
        let file = self
            .fs
            .open(PREDICTOR_LOG_PATH, OpenMode::Read)
            .map_err(|e| io_err("open", e))?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_err("read", e))?;
            let line = line.trim();
            if line.is_empty() || line == LOG_HEADER {
                continue;
            }
            match NodeSample::parse(line) {
                Some(row) => rows.push(row),
                None => debug!(line, "skipping malformed predictor log row"),
            }
        }
        Ok(rows)
    }

    /// Prepend an observation, keeping the newest `LOG_CAPACITY` rows
    pub fn record(&self, sample: NodeSample) -> Result<(), PredictorError> {
        let mut rows = self.read_log()?;
        rows.insert(0, sample);
        rows.truncate(LOG_CAPACITY);

        let mut text = String::with_capacity(16 * (rows.len() + 1));
        text.push_str(LOG_HEADER);
        text.push('\n');
        for row in &rows {
            text.push_str(&format!(
                "{},{},{}\n",
                row.min_split, row.max_depth, row.total_nodes
            ));
        }
        let io_err = |op, source| PredictorError::Io {
            op,
            path: PREDICTOR_LOG_PATH.to_string(),
            source,
        };
        let mut file = self
            .fs
            .open(PREDICTOR_LOG_PATH, OpenMode::Write)
            .map_err(|e| io_err("open", e))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| io_err("write", e))
    }

    /// Refit from the log. Returns `false` when fewer than 3 usable rows exist.
    pub fn retrain(&mut self) -> Result<bool, PredictorError> {
        let rows: Vec<NodeSample> = self
            .read_log()?
            .into_iter()
            .filter(|r| !r.has_zero())
            .collect();
        if rows.len() < 3 {
            debug!(rows = rows.len(), "not enough predictor samples to retrain");
            return Ok(false);
        }

        let c1 = two_point_slope(&rows, |r| r.min_split);
        let c2 = two_point_slope(&rows, |r| r.max_depth);
        let overall = mean_nodes(rows.iter());
        let smallest_split = rows.iter().map(|r| r.min_split).min().unwrap_or(0);
        let smallest_depth = rows.iter().map(|r| r.max_depth).min().unwrap_or(0);
        let bias = overall - c1 * smallest_split as f32 - c2 * smallest_depth as f32;
        let coefficients = [bias, c1, c2];

        let (mut total_error, mut total_actual) = (0f32, 0f32);
        for row in &rows {
            let predicted = Self::evaluate(coefficients, row.min_split, row.max_depth).max(MIN_ESTIMATE);
            total_error += (predicted - row.total_nodes as f32).abs();
            total_actual += row.total_nodes as f32;
        }
        let mape = if total_actual > 0.0 {
            total_error / total_actual * 100.0
        } else {
            100.0
        };

        self.coefficients = coefficients;
        self.trained = true;
        self.accuracy = (100.0 - mape).clamp(0.0, 100.0).round() as u8;
        self.peak_percent = DEFAULT_PEAK_PERCENT;
        info!(
            rows = rows.len(),
            bias, c1, c2,
            accuracy = self.accuracy,
            "node predictor retrained"
        );
        Ok(true)
    }
}

fn mean_nodes<'a>(rows: impl Iterator<Item = &'a NodeSample>) -> f32 {
    let (sum, n) = rows.fold((0f32, 0usize), |(s, n), r| (s + r.total_nodes as f32, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// Slope between the average node count at the smallest and largest key
fn two_point_slope(rows: &[NodeSample], key: impl Fn(&NodeSample) -> u16) -> f32 {
    let (Some(lo), Some(hi)) = (rows.iter().map(&key).min(), rows.iter().map(&key).max()) else {
        return 0.0;
    };
    if hi == lo {
        return 0.0;
    }
    let at_lo = mean_nodes(rows.iter().filter(|r| key(*r) == lo));
    let at_hi = mean_nodes(rows.iter().filter(|r| key(*r) == hi));
    (at_hi - at_lo) / (hi - lo) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{FlashFs, MemFs};
    use std::sync::Arc;

    fn predictor(fs: &MemFs) -> NodePredictor {
        NodePredictor::new(Arc::new(fs.clone()))
    }

    fn row(min_split: u16, max_depth: u16, total_nodes: u16) -> NodeSample {
        NodeSample {
            min_split,
            max_depth,
            total_nodes,
        }
    }

    #[test]
    fn test_untrained_heuristic() {
        let p = predictor(&MemFs::new());
        assert_eq!(p.estimate(2, 10), 100 - 24 + 30);
        assert_eq!(p.estimate(9, 1), 10);
        assert_eq!(p.estimate(0, 5), 100);
    }

    #[test]
    fn test_log_is_newest_first_and_capped() {
        let fs = MemFs::new();
        let p = predictor(&fs);
        for i in 1..=60u16 {
            p.record(row(2, 5, i)).unwrap();
        }
        let rows = p.read_log().unwrap();
        assert_eq!(rows.len(), LOG_CAPACITY);
        assert_eq!(rows[0].total_nodes, 60);
        assert_eq!(rows[49].total_nodes, 11);

        let text = String::from_utf8(fs.get(PREDICTOR_LOG_PATH).unwrap()).unwrap();
        assert!(text.starts_with("min_split,max_depth,total_nodes\n2,5,60\n"));
    }

    #[test]
    fn test_retrain_needs_three_rows() {
        let fs = MemFs::new();
        let mut p = predictor(&fs);
        p.record(row(2, 5, 40)).unwrap();
        p.record(row(4, 5, 0)).unwrap();
        p.record(row(3, 6, 30)).unwrap();
        assert!(!p.retrain().unwrap());
        assert!(!p.is_trained());
    }

    #[test]
    fn test_retrain_fits_trend() {
        let fs = MemFs::new();
        let mut p = predictor(&fs);
        // nodes = 100 - 10 * split + 5 * depth
        for (s, d) in [(2, 4), (2, 8), (6, 4), (6, 8)] {
            p.record(row(s, d, 100 - 10 * s + 5 * d)).unwrap();
        }
        assert!(p.retrain().unwrap());
        let [_, c1, c2] = p.coefficients();
        assert!((c1 + 10.0).abs() < 1e-4);
        assert!((c2 - 5.0).abs() < 1e-4);
        // the line is anchored at the smallest split and depth
        assert_eq!(p.estimate(2, 4), 90);
        assert_eq!(p.estimate(6, 8), 70);
        assert_eq!(p.accuracy(), 89);
        assert_eq!(p.peak_percent(), DEFAULT_PEAK_PERCENT);
    }

    #[test]
    fn test_save_load_round_trip() {
        let fs = MemFs::new();
        let mut p = predictor(&fs);
        for (s, d, n) in [(2, 6, 70), (3, 7, 66), (5, 9, 48)] {
            p.record(row(s, d, n)).unwrap();
        }
        p.retrain().unwrap();
        p.save().unwrap();
        assert_eq!(fs.file_len(PREDICTOR_PATH), Some(20));

        let mut q = predictor(&fs);
        q.load().unwrap();
        assert!(q.is_trained());
        assert_eq!(q.coefficients(), p.coefficients());
        assert_eq!(q.estimate(4, 8), p.estimate(4, 8));
    }

    #[test]
    fn test_zero_peak_is_patched_on_load() {
        let fs = MemFs::new();
        let mut bytes = PREDICTOR_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, 80, 0, 3]);
        for c in [50f32, -2.0, 4.0] {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        fs.put(PREDICTOR_PATH, bytes);

        let mut p = predictor(&fs);
        p.load().unwrap();
        assert_eq!(p.peak_percent(), DEFAULT_PEAK_PERCENT);
        assert_eq!(p.estimate(5, 10), 80);
    }

    #[test]
    fn test_failed_load_keeps_fallback() {
        let fs = MemFs::new();
        fs.put(PREDICTOR_PATH, vec![1, 2, 3]);
        let mut p = predictor(&fs);
        assert!(p.load().is_err());
        assert!(!p.is_trained());
        assert_eq!(p.estimate(2, 10), 106);
        assert!(fs.exists(PREDICTOR_PATH));
    }
}
