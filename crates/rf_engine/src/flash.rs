//! Flash filesystem seam
//!
//! The engine only needs `exists`, `open`, `remove` and byte-level
//! read/write/seek on an open handle. `DirFs` maps flash paths into a host
//! directory; `MemFs` keeps everything in RAM and can be told to fail.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a flash file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate
    Write,
    /// Create if missing, position at end
    Append,
}

/// Open flash file handle
pub trait FlashFile: Read + Write + Seek {}

impl<T: Read + Write + Seek> FlashFile for T {}

/// Filesystem operations consumed by the engine
pub trait FlashFs: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FlashFile>>;
    fn remove(&self, path: &str) -> io::Result<()>;
}

/// Shared filesystem handle
pub type SharedFs = Arc<dyn FlashFs>;

/// Host directory standing in for the flash partition
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a flash path such as `/tree_3.bin`
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FlashFs for DirFs {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FlashFile>> {
        let host = self.resolve(path);
        let file = match mode {
            OpenMode::Read => File::open(host)?,
            OpenMode::Write => File::create(host)?,
            OpenMode::Append => OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(host)?,
        };
        Ok(Box::new(file))
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }
}

#[derive(Default)]
struct MemState {
    files: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
}

/// RAM-backed filesystem, mainly for tests
#[derive(Clone, Default)]
pub struct MemFs {
    state: Arc<Mutex<MemState>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` of `path` fail
    pub fn fail_path(&self, path: &str) {
        self.state.lock().failing.insert(path.to_string());
    }

    pub fn heal_path(&self, path: &str) {
        self.state.lock().failing.remove(path);
    }

    /// Current size of a file, if present
    pub fn file_len(&self, path: &str) -> Option<usize> {
        self.state.lock().files.get(path).map(Vec::len)
    }

    /// Overwrite a file's raw bytes
    pub fn put(&self, path: &str, bytes: Vec<u8>) {
        self.state.lock().files.insert(path.to_string(), bytes);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }
}

impl FlashFs for MemFs {
    fn exists(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FlashFile>> {
        let mut state = self.state.lock();
        if state.failing.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected failure for {path}"),
            ));
        }
        let pos = match mode {
            OpenMode::Read => {
                if !state.files.contains_key(path) {
                    return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
                }
                0
            }
            OpenMode::Write => {
                state.files.insert(path.to_string(), Vec::new());
                0
            }
            OpenMode::Append => state.files.entry(path.to_string()).or_default().len() as u64,
        };
        Ok(Box::new(MemFile {
            state: Arc::clone(&self.state),
            path: path.to_string(),
            pos,
            writable: mode != OpenMode::Read,
        }))
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        match self.state.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }
}

struct MemFile {
    state: Arc<Mutex<MemState>>,
    path: String,
    pos: u64,
    writable: bool,
}

impl MemFile {
    fn gone(&self) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, self.path.clone())
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.lock();
        let data = state.files.get(&self.path).ok_or_else(|| self.gone())?;
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} opened read-only", self.path),
            ));
        }
        let mut state = self.state.lock();
        let data = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, self.path.clone()))?;
        let start = self.pos as usize;
        if data.len() < start {
            data.resize(start, 0);
        }
        let overlap = (data.len() - start).min(buf.len());
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let len = {
            let state = self.state.lock();
            state.files.get(&self.path).ok_or_else(|| self.gone())?.len() as i64
        };
        let next = match target {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(off) => len + off,
            SeekFrom::Current(off) => self.pos as i64 + off,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}
