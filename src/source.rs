use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Read access to the lines of each logical file on the sending side.
pub trait LineSource {
    /// Number of logical files available, identified by `0..file_count()`.
    fn file_count(&self) -> u32;

    /// Total line count of `file_id`.
    fn total_lines(&self, file_id: u32) -> u32;

    /// Line `line` of `file_id`, including its original terminator if it had one.
    fn line(&self, file_id: u32, line: u32) -> Option<&[u8]>;
}

/// Logical files held in memory, split into lines.
#[derive(Clone, Debug, Default)]
pub struct LineFiles {
    files: Vec<Vec<Vec<u8>>>,
}

/// Splits `text` into lines, keeping each `\n` terminator. A trailing fragment without a
/// terminator forms the final line.
pub fn split_lines(text: &[u8]) -> Vec<Vec<u8>> {
    text.split_inclusive(|&b| b == b'\n')
        .map(|line| line.to_vec())
        .collect()
}

impl LineFiles {
    /// Builds files from in-memory texts; file ids follow the order of `texts`.
    pub fn from_texts<I, T>(texts: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let files = texts
            .into_iter()
            .map(|text| split_lines(text.as_ref()))
            .collect::<Vec<_>>();

        for (file_id, lines) in files.iter().enumerate() {
            if lines.is_empty() {
                return Err(Error::EmptyFile {
                    file_id: file_id as u32,
                });
            }
        }

        Ok(Self { files })
    }

    /// Loads `<dir>/<prefix><id>.txt` for ids `0..file_count`.
    pub fn load_dir(dir: &Path, prefix: &str, file_count: u32) -> Result<Self> {
        let texts = (0..file_count)
            .map(|file_id| {
                let path = dir.join(format!("{prefix}{file_id}.txt"));
                fs::read(&path).map_err(Error::Storage)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_texts(texts)
    }
}

impl LineSource for LineFiles {
    fn file_count(&self) -> u32 {
        self.files.len() as u32
    }

    fn total_lines(&self, file_id: u32) -> u32 {
        self.files
            .get(file_id as usize)
            .map_or(0, |lines| lines.len() as u32)
    }

    fn line(&self, file_id: u32, line: u32) -> Option<&[u8]> {
        self.files
            .get(file_id as usize)?
            .get(line as usize)
            .map(|line| line.as_slice())
    }
}
