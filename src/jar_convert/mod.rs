//! Conversion of whole archives.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::jar_utils::{JarEntry, JarError, JarFile};
use crate::valuetype::{convert_class, ConvertError, ConvertOptions, ValueCapableOracle};

const OUTPUT_SUFFIX: &str = "-valuetypified.jar";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum JarConvertError {
    Jar(JarError),
    Class { entry: String, source: ConvertError },
}

impl fmt::Display for JarConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JarConvertError::Jar(e) => write!(f, "jar error: {e}"),
            JarConvertError::Class { entry, source } => write!(f, "{entry}: {source}"),
        }
    }
}

impl std::error::Error for JarConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JarConvertError::Jar(e) => Some(e),
            JarConvertError::Class { source, .. } => Some(source),
        }
    }
}

impl From<JarError> for JarConvertError {
    fn from(e: JarError) -> Self {
        JarConvertError::Jar(e)
    }
}

pub type JarConvertResult<T> = Result<T, JarConvertError>;

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// Convert every class of `input`. Other entries are copied verbatim and
/// the entry order is kept.
///
/// Value-capable classes are looked up in `input` itself; a class that is
/// not part of the archive is treated as an ordinary reference type.
pub fn convert_jar(input: &JarFile, options: &ConvertOptions) -> JarConvertResult<JarFile> {
    let finder = |name: &str| -> io::Result<Option<Vec<u8>>> {
        Ok(input
            .get_entry(&format!("{name}.class"))
            .map(<[u8]>::to_vec))
    };
    let mut oracle = ValueCapableOracle::new(finder);
    let mut output = JarFile::new();
    let mut converted = 0usize;

    for entry in input.entries() {
        if !entry.is_class() {
            output.push(entry.clone());
            continue;
        }
        let data = convert_class(&entry.data, &mut oracle, options).map_err(|source| {
            JarConvertError::Class {
                entry: entry.name.clone(),
                source,
            }
        })?;
        if data != entry.data {
            debug!("{} rewritten", entry.name);
            converted += 1;
        }
        output.push(JarEntry {
            name: entry.name.clone(),
            data,
        });
    }

    info!(
        "{} of {} entries rewritten, {} class lookups",
        converted,
        input.len(),
        oracle.lookups()
    );
    Ok(output)
}

/// `<base>-valuetypified.jar` next to `input`, where `<base>` is the input
/// file name without its `.jar` suffix.
pub fn output_path(input: &Path) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = file_name.strip_suffix(".jar").unwrap_or(&file_name);
    input.with_file_name(format!("{base}{OUTPUT_SUFFIX}"))
}

/// Convert the archive at `path` and write the result next to it. Returns
/// the path of the written archive.
pub fn convert_jar_file(
    path: impl AsRef<Path>,
    options: &ConvertOptions,
) -> JarConvertResult<PathBuf> {
    let path = path.as_ref();
    let input = JarFile::open(path)?;
    let output = convert_jar(&input, options)?;
    let output_path = output_path(path);
    output.save_atomic(&output_path)?;
    Ok(output_path)
}
