use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Receive-side storage for reassembled files.
pub trait ChunkSink {
    /// Discards every stored file and any previous concatenation.
    fn clear(&mut self, file_count: u32) -> io::Result<()>;

    /// Appends `chunk`, which begins at `start_line`, to `file_id`. Chunks arrive in line order.
    fn append(&mut self, file_id: u32, start_line: u32, chunk: &[u8]) -> io::Result<()>;

    /// Joins files `0..file_count` in id order, stores the result and returns it.
    fn concatenate(&mut self, file_count: u32) -> io::Result<Vec<u8>>;
}

/// Stores file `id` as `<dir>/quote<id>.txt` and the concatenation as `<dir>/concatenated.txt`.
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    dir: PathBuf,
}

pub const CONCATENATED_FILE_NAME: &str = "concatenated.txt";

impl DirectoryStore {
    pub fn new<P>(dir: P) -> io::Result<Self>
    where
        P: Into<PathBuf>,
    {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, file_id: u32) -> PathBuf {
        self.dir.join(format!("quote{file_id}.txt"))
    }

    pub fn concatenated_path(&self) -> PathBuf {
        self.dir.join(CONCATENATED_FILE_NAME)
    }

    fn open_append(path: &Path) -> io::Result<fs::File> {
        fs::OpenOptions::new().create(true).append(true).open(path)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl ChunkSink for DirectoryStore {
    fn clear(&mut self, file_count: u32) -> io::Result<()> {
        for file_id in 0..file_count {
            remove_if_present(&self.file_path(file_id))?;
        }
        remove_if_present(&self.concatenated_path())
    }

    fn append(&mut self, file_id: u32, start_line: u32, chunk: &[u8]) -> io::Result<()> {
        let path = self.file_path(file_id);

        tracing::trace!(file_id, start_line, path = %path.display(), "appending chunk");

        Self::open_append(&path)?.write_all(chunk)
    }

    fn concatenate(&mut self, file_count: u32) -> io::Result<Vec<u8>> {
        let mut joined = Vec::new();

        for file_id in 0..file_count {
            joined.extend(fs::read(self.file_path(file_id))?);
        }

        let path = self.concatenated_path();
        remove_if_present(&path)?;
        Self::open_append(&path)?.write_all(&joined)?;

        Ok(joined)
    }
}

/// Keeps reassembled files in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    files: BTreeMap<u32, Vec<u8>>,
    concatenated: Option<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self, file_id: u32) -> Option<&[u8]> {
        self.files.get(&file_id).map(|f| f.as_slice())
    }

    pub fn concatenated(&self) -> Option<&[u8]> {
        self.concatenated.as_deref()
    }
}

impl ChunkSink for MemoryStore {
    fn clear(&mut self, _file_count: u32) -> io::Result<()> {
        self.files.clear();
        self.concatenated = None;
        Ok(())
    }

    fn append(&mut self, file_id: u32, _start_line: u32, chunk: &[u8]) -> io::Result<()> {
        self.files.entry(file_id).or_default().extend_from_slice(chunk);
        Ok(())
    }

    fn concatenate(&mut self, file_count: u32) -> io::Result<Vec<u8>> {
        let joined = (0..file_count)
            .filter_map(|file_id| self.files.get(&file_id))
            .flatten()
            .copied()
            .collect::<Vec<u8>>();

        self.concatenated = Some(joined.clone());

        Ok(joined)
    }
}
