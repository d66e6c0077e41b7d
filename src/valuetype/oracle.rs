use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;

use log::{debug, trace};

use crate::parser::class_has_annotation;

/// Descriptor of the annotation that marks a class as value-capable.
pub const VALUE_CAPABLE_MARKER: &str = "Ljvm/internal/value/ValueCapableClass;";

/// Source of raw class bytes, looked up by internal name.
pub trait ClassFinder {
    /// Returns `Ok(None)` when the class is not available (e.g. it lives in
    /// the JDK or another archive).
    fn find_class(&self, internal_name: &str) -> io::Result<Option<Vec<u8>>>;
}

impl<F> ClassFinder for F
where
    F: Fn(&str) -> io::Result<Option<Vec<u8>>>,
{
    fn find_class(&self, internal_name: &str) -> io::Result<Option<Vec<u8>>> {
        self(internal_name)
    }
}

#[derive(Debug)]
pub enum OracleError {
    Io { class_name: String, source: io::Error },
    Parse { class_name: String, message: String },
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OracleError::Io { class_name, source } => {
                write!(f, "cannot read class {}: {}", class_name, source)
            }
            OracleError::Parse {
                class_name,
                message,
            } => write!(f, "cannot parse class {}: {}", class_name, message),
        }
    }
}

impl Error for OracleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OracleError::Io { source, .. } => Some(source),
            OracleError::Parse { .. } => None,
        }
    }
}

/// Answers "is this class value-capable?" with a per-run memo.
///
/// Only the class header and its class-level annotations are read; the
/// answer for a name is computed once and then served from the cache.
pub struct ValueCapableOracle<F: ClassFinder> {
    finder: F,
    cache: HashMap<String, bool>,
    lookups: usize,
}

impl<F: ClassFinder> ValueCapableOracle<F> {
    pub fn new(finder: F) -> Self {
        ValueCapableOracle {
            finder,
            cache: HashMap::new(),
            lookups: 0,
        }
    }

    pub fn is_value_capable(&mut self, class_name: &str) -> Result<bool, OracleError> {
        if let Some(answer) = self.cache.get(class_name) {
            return Ok(*answer);
        }
        self.lookups += 1;
        let answer = match self
            .finder
            .find_class(class_name)
            .map_err(|source| OracleError::Io {
                class_name: class_name.to_string(),
                source,
            })? {
            None => {
                trace!("class {} not found, treated as a reference type", class_name);
                false
            }
            Some(bytes) => match class_has_annotation(&bytes, VALUE_CAPABLE_MARKER) {
                Ok((_, found)) => found,
                Err(e) => {
                    return Err(OracleError::Parse {
                        class_name: class_name.to_string(),
                        message: e.to_string(),
                    })
                }
            },
        };
        if answer {
            debug!("{} is value-capable", class_name);
        }
        self.cache.insert(class_name.to_string(), answer);
        Ok(answer)
    }

    /// Number of times the finder has been consulted.
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}
