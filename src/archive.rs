//! Bundle archives
//!
//! A bundle is a zip (or `.tar.gz`) file holding the manifest at a reserved
//! path plus every file the manifest references. The entry count is checked
//! against the configured limit before any content is read.
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::archive::{build_zip, Archive};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = build_zip([("socket.yml", b"endpoints: {}".to_vec())])?;
//! let archive = Archive::open(&bytes, 30)?;
//! assert_eq!(archive.namelist(), vec!["socket.yml"]);
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use flate2::read::GzDecoder;
use indexmap::IndexMap;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ZIP_MAGIC: &[u8] = b"PK";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// In-memory view of a bundle.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: IndexMap<String, Vec<u8>>,
}

impl Archive {
    /// Open a bundle, rejecting it when it holds more than `max_files` entries.
    pub fn open(bytes: &[u8], max_files: usize) -> Result<Self> {
        if bytes.starts_with(GZIP_MAGIC) {
            Self::open_tar_gz(bytes, max_files)
        } else if bytes.starts_with(ZIP_MAGIC) {
            Self::open_zip(bytes, max_files)
        } else {
            Err(Error::processing(
                "Error processing zip: File is not a zip file.",
            ))
        }
    }

    fn open_zip(bytes: &[u8], max_files: usize) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
        if zip.len() > max_files {
            return Err(too_many_files());
        }

        let mut entries = IndexMap::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(corrupt)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)
                .map_err(|e| unzip_error(&name, &e.to_string()))?;
            entries.insert(name, content);
        }

        Ok(Self { entries })
    }

    fn open_tar_gz(bytes: &[u8], max_files: usize) -> Result<Self> {
        let mut tar = tar::Archive::new(GzDecoder::new(bytes));
        let mut entries = IndexMap::new();
        let mut count = 0usize;

        for entry in tar.entries().map_err(|e| corrupt_io(&e))? {
            let mut entry = entry.map_err(|e| corrupt_io(&e))?;
            count += 1;
            if count > max_files {
                return Err(too_many_files());
            }
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| corrupt_io(&e))?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| unzip_error(&name, &e.to_string()))?;
            entries.insert(name, content);
        }

        Ok(Self { entries })
    }

    /// Build an archive from already loaded files.
    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<u8>)>,
        P: Into<String>,
    {
        Self {
            entries: files.into_iter().map(|(p, b)| (p.into(), b)).collect(),
        }
    }

    /// Paths of all file entries, in archive order.
    pub fn namelist(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn read_file(&self, path: &str) -> Result<&[u8]> {
        self.entries
            .get(path)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::MissingFile(path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn too_many_files() -> Error {
    Error::processing("Error processing zip: Too many files.")
}

fn corrupt(err: zip::result::ZipError) -> Error {
    Error::processing(format!("Error processing zip: {}.", err))
}

fn corrupt_io(err: &std::io::Error) -> Error {
    Error::processing(format!("Error processing zip: {}.", err))
}

fn unzip_error(path: &str, cause: &str) -> Error {
    Error::processing(format!("Error unzipping \"{}\": {}.", path, cause))
}

/// Write files into a deflated zip held in memory.
pub fn build_zip<I, P>(files: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (P, Vec<u8>)>,
    P: AsRef<str>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, content) in files {
        writer.start_file(path.as_ref(), options)?;
        writer.write_all(&content)?;
    }

    Ok(writer.finish()?.into_inner())
}
