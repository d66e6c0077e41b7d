extern crate classfile_flattener;

mod common;

use std::cell::Cell;
use std::io;

use classfile_flattener::valuetype::{OracleError, ValueCapableOracle};

use common::*;

#[test]
fn test_marked_class_is_value_capable() {
    let mut oracle = ValueCapableOracle::new(value_classes());
    assert!(oracle.is_value_capable(POINT).unwrap());
    assert!(oracle.is_value_capable(LINE).unwrap());
}

#[test]
fn test_invisible_marker_counts() {
    let bytes = ClassBuilder::new("test/Hidden").value_capable(false).build();
    let mut oracle = ValueCapableOracle::new(finder(vec![("test/Hidden", bytes)]));
    assert!(oracle.is_value_capable("test/Hidden").unwrap());
}

#[test]
fn test_unmarked_and_missing_classes() {
    let plain = ClassBuilder::new("test/Plain").field("x", "I").build();
    let mut oracle = ValueCapableOracle::new(finder(vec![("test/Plain", plain)]));
    assert!(!oracle.is_value_capable("test/Plain").unwrap());
    assert!(!oracle.is_value_capable("java/lang/String").unwrap());
}

#[test]
fn test_other_annotation_is_ignored() {
    let mut builder = ClassBuilder::new("test/Annotated");
    let name_index = builder.utf8("RuntimeVisibleAnnotations");
    let type_index = builder.utf8("Ljava/lang/Deprecated;");
    let mut info = vec![0, 1];
    info.extend_from_slice(&type_index.to_be_bytes());
    info.extend_from_slice(&[0, 0]);
    builder.class.attributes.push(
        classfile_flattener::attribute_info::AttributeInfo::new(name_index, info),
    );
    let mut oracle = ValueCapableOracle::new(finder(vec![("test/Annotated", builder.build())]));
    assert!(!oracle.is_value_capable("test/Annotated").unwrap());
}

#[test]
fn test_answers_are_memoized() {
    let calls = Cell::new(0);
    let inner = value_classes();
    let counting = |name: &str| -> io::Result<Option<Vec<u8>>> {
        calls.set(calls.get() + 1);
        inner(name)
    };
    let mut oracle = ValueCapableOracle::new(counting);
    for _ in 0..3 {
        assert!(oracle.is_value_capable(POINT).unwrap());
        assert!(!oracle.is_value_capable("java/lang/Object").unwrap());
    }
    assert_eq!(oracle.lookups(), 2);
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_unparsable_class_is_an_error() {
    let mut oracle =
        ValueCapableOracle::new(finder(vec![("test/Broken", b"not a class".to_vec())]));
    let result = oracle.is_value_capable("test/Broken");
    assert!(matches!(result, Err(OracleError::Parse { .. })));
}

#[test]
fn test_finder_failure_is_an_error() {
    let failing = |_: &str| -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
    };
    let mut oracle = ValueCapableOracle::new(failing);
    let result = oracle.is_value_capable(POINT);
    assert!(matches!(result, Err(OracleError::Io { .. })));
}
