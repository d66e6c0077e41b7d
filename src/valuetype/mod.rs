//! Value-form conversion of method bodies.
//!
//! [`oracle`] decides which classes are value-capable, [`analyzer`] runs a
//! dataflow pass over a method and fills a [`patch::PatchRegistry`] with one
//! decision per site, and [`rewriter`] turns those decisions into new code,
//! with [`stackmap`] rebuilding the verifier frames for it.
//! [`converter`] drives the passes over a whole class.

pub mod analyzer;
pub mod converter;
pub mod frame;
pub mod oracle;
pub mod patch;
mod remap;
pub mod rewriter;
pub mod stackmap;
pub mod value;

pub use self::analyzer::{analyze_method, AnalyzerError, MethodAnalysis, MethodBody};
pub use self::converter::{convert_class, ConvertError, ConvertOptions};
pub use self::oracle::{ClassFinder, OracleError, ValueCapableOracle, VALUE_CAPABLE_MARKER};
pub use self::rewriter::{rewrite_method, RewriteError};
