use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::ClassFile;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum JarError {
    Io(std::io::Error),
    Zip(zip::result::ZipError),
    ClassParse(String),
    MissingEntry(String),
}

impl std::fmt::Display for JarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JarError::Io(e) => write!(f, "I/O error: {e}"),
            JarError::Zip(e) => write!(f, "ZIP error: {e}"),
            JarError::ClassParse(e) => write!(f, "class parse error: {e}"),
            JarError::MissingEntry(name) => write!(f, "entry not found: {name}"),
        }
    }
}

impl std::error::Error for JarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JarError::Io(e) => Some(e),
            JarError::Zip(e) => Some(e),
            JarError::ClassParse(_) | JarError::MissingEntry(_) => None,
        }
    }
}

impl From<std::io::Error> for JarError {
    fn from(e: std::io::Error) -> Self {
        JarError::Io(e)
    }
}

impl From<zip::result::ZipError> for JarError {
    fn from(e: zip::result::ZipError) -> Self {
        JarError::Zip(e)
    }
}

impl From<tempfile::PersistError> for JarError {
    fn from(e: tempfile::PersistError) -> Self {
        JarError::Io(e.error)
    }
}

pub type JarResult<T> = Result<T, JarError>;

// ---------------------------------------------------------------------------
// JarFile
// ---------------------------------------------------------------------------

/// One archive member. Directory entries have a name ending in `/` and no
/// data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JarEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl JarEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_class(&self) -> bool {
        !self.is_dir() && self.name.ends_with(".class")
    }
}

/// In-memory representation of a JAR (ZIP) archive.
///
/// Entries keep the order they were read or added in, so a converted archive
/// lists its members in the same order as the input.
#[derive(Clone, Debug, Default)]
pub struct JarFile {
    entries: Vec<JarEntry>,
}

impl JarFile {
    /// Create an empty JAR.
    pub fn new() -> Self {
        Self::default()
    }

    // -- Reading --

    /// Read a JAR from any reader.
    pub fn read<R: Read + Seek>(reader: R) -> JarResult<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            if !file.is_dir() {
                file.read_to_end(&mut data)?;
            }
            entries.push(JarEntry { name, data });
        }

        Ok(JarFile { entries })
    }

    /// Read a JAR from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> JarResult<Self> {
        Self::read(Cursor::new(bytes))
    }

    /// Read a JAR from a file path.
    pub fn open(path: impl AsRef<Path>) -> JarResult<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Self::read(reader)
    }

    // -- Writing --

    /// Write the JAR to any writer using Deflated compression.
    pub fn write<W: Write + Seek>(&self, writer: W) -> JarResult<()> {
        let mut zip_writer = zip::ZipWriter::new(writer);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in &self.entries {
            if entry.is_dir() {
                zip_writer.add_directory(entry.name.as_str(), options)?;
            } else {
                zip_writer.start_file(entry.name.as_str(), options)?;
                zip_writer.write_all(&entry.data)?;
            }
        }

        zip_writer.finish()?;
        Ok(())
    }

    /// Serialize the JAR to a byte vector.
    pub fn to_bytes(&self) -> JarResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.write(&mut buf)?;
        Ok(buf.into_inner())
    }

    /// Write the JAR to `path`. The archive is written to a temporary file in
    /// the same directory first, so `path` is only replaced by a complete
    /// archive.
    pub fn save_atomic(&self, path: impl AsRef<Path>) -> JarResult<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        self.write(temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        temp.persist(path)?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    // -- Entry access --

    /// Iterate over all entries in archive order.
    pub fn entries(&self) -> impl Iterator<Item = &JarEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entry paths in archive order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Get the raw bytes of an entry.
    pub fn get_entry(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == path)
            .map(|e| e.data.as_slice())
    }

    /// Replace the data of an existing entry in place, or append a new one.
    pub fn set_entry(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        match self.entries.iter_mut().find(|e| e.name == path) {
            Some(entry) => entry.data = data,
            None => self.entries.push(JarEntry { name: path, data }),
        }
    }

    /// Append an entry, keeping any existing entry of the same name.
    pub fn push(&mut self, entry: JarEntry) {
        self.entries.push(entry);
    }

    /// Append a directory entry. A missing trailing `/` is added.
    pub fn add_directory(&mut self, path: impl Into<String>) {
        let mut name = path.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        self.entries.push(JarEntry {
            name,
            data: Vec::new(),
        });
    }

    /// Check whether an entry exists.
    pub fn contains_entry(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.name == path)
    }

    // -- ClassFile integration --

    /// Parse a `.class` entry into a `ClassFile`.
    pub fn parse_class(&self, path: &str) -> JarResult<ClassFile> {
        let data = self
            .get_entry(path)
            .ok_or_else(|| JarError::MissingEntry(path.to_string()))?;
        ClassFile::parse(data).map_err(JarError::ClassParse)
    }

    /// Serialize a `ClassFile` and store it as an entry.
    pub fn set_class(&mut self, path: &str, class_file: &ClassFile) -> JarResult<()> {
        let bytes = class_file
            .to_bytes()
            .map_err(|e| JarError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        self.set_entry(path, bytes);
        Ok(())
    }
}
