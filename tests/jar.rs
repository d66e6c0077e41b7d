extern crate classfile_flattener;

mod common;

use std::path::Path;

use classfile_flattener::code_attribute::Instruction::*;
use classfile_flattener::jar_convert::{convert_jar, convert_jar_file, output_path, JarConvertError};
use classfile_flattener::jar_utils::{JarEntry, JarError, JarFile};
use classfile_flattener::valuetype::{ConvertError, ConvertOptions};

use common::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn user_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("test/User");
    let x = builder.field_ref(POINT, "x", "I");
    builder
        .static_method(
            "getX",
            "(Ltest/Point;)I",
            1,
            &[Aload0, Getfield(x), Ireturn],
        )
        .build()
}

fn sample_jar() -> JarFile {
    let mut jar = JarFile::new();
    jar.add_directory("test");
    jar.set_entry("test/Point.class", point_class());
    jar.set_entry("test/User.class", user_class());
    jar.set_entry("README.txt", b"not a class".to_vec());
    jar
}

// ---------------------------------------------------------------------------
// JarFile
// ---------------------------------------------------------------------------

#[test]
fn test_jar_round_trip_keeps_order_and_directories() {
    let jar = sample_jar();
    let bytes = jar.to_bytes().unwrap();
    let reread = JarFile::from_bytes(&bytes).unwrap();

    assert_eq!(
        reread.entry_names().collect::<Vec<_>>(),
        vec!["test/", "test/Point.class", "test/User.class", "README.txt"]
    );
    assert_eq!(reread.get_entry("README.txt"), Some(&b"not a class"[..]));
    assert!(reread.entries().next().unwrap().is_dir());
    assert!(reread.contains_entry("test/User.class"));
    assert!(!reread.contains_entry("test/Missing.class"));
}

#[test]
fn test_set_entry_replaces_in_place() {
    let mut jar = sample_jar();
    jar.set_entry("test/Point.class", vec![1, 2, 3]);
    assert_eq!(jar.len(), 4);
    assert_eq!(jar.get_entry("test/Point.class"), Some(&[1u8, 2, 3][..]));
    assert_eq!(jar.entry_names().nth(1), Some("test/Point.class"));
}

#[test]
fn test_parse_and_store_class() {
    let mut jar = sample_jar();
    let mut class = jar.parse_class("test/User.class").unwrap();
    assert_eq!(class.this_class_name(), Some("test/User"));

    class.get_or_add_utf8("extra");
    class.sync_counts();
    jar.set_class("test/User.class", &class).unwrap();
    let reparsed = jar.parse_class("test/User.class").unwrap();
    assert!(reparsed.get_utf8_index("extra").is_some());

    assert!(matches!(
        jar.parse_class("test/Missing.class"),
        Err(JarError::MissingEntry(_))
    ));
    assert!(matches!(
        jar.parse_class("README.txt"),
        Err(JarError::ClassParse(_))
    ));
}

#[test]
fn test_not_a_zip() {
    assert!(matches!(
        JarFile::from_bytes(b"definitely not a zip"),
        Err(JarError::Zip(_))
    ));
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

#[test]
fn test_output_path() {
    assert_eq!(
        output_path(Path::new("/tmp/app.jar")),
        Path::new("/tmp/app-valuetypified.jar")
    );
    assert_eq!(
        output_path(Path::new("lib/app")),
        Path::new("lib/app-valuetypified.jar")
    );
}

#[test]
fn test_convert_jar_uses_classes_in_the_archive() {
    let input = sample_jar();
    let output = convert_jar(&input, &ConvertOptions::default()).unwrap();

    assert_eq!(
        output.entry_names().collect::<Vec<_>>(),
        input.entry_names().collect::<Vec<_>>()
    );
    assert_eq!(output.get_entry("README.txt"), input.get_entry("README.txt"));
    assert_eq!(
        output.get_entry("test/Point.class"),
        input.get_entry("test/Point.class")
    );
    assert_ne!(
        output.get_entry("test/User.class"),
        input.get_entry("test/User.class")
    );

    let user = output.parse_class("test/User.class").unwrap();
    match instructions(&user, "getX").as_slice() {
        [Aload0, Vunbox(_), Vstore(0), Vload(0), Getfield(_), Ireturn] => {}
        other => panic!("unexpected code {:?}", other),
    }
}

#[test]
fn test_class_outside_the_archive_is_a_reference() {
    let mut input = JarFile::new();
    input.push(JarEntry {
        name: "test/User.class".to_string(),
        data: user_class(),
    });
    let output = convert_jar(&input, &ConvertOptions::default()).unwrap();
    assert_eq!(
        output.get_entry("test/User.class"),
        input.get_entry("test/User.class")
    );
}

#[test]
fn test_broken_class_names_the_entry() {
    let mut input = sample_jar();
    input.set_entry("test/Broken.class", vec![0xca, 0xfe]);
    match convert_jar(&input, &ConvertOptions::default()) {
        Err(JarConvertError::Class { entry, source }) => {
            assert_eq!(entry, "test/Broken.class");
            assert!(matches!(source, ConvertError::Parse(_)));
        }
        other => panic!("unexpected result {:?}", other.map(|jar| jar.len())),
    }
}

#[test]
fn test_convert_jar_file_writes_next_to_input() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("app.jar");
    std::fs::write(&input_path, sample_jar().to_bytes().unwrap()).unwrap();

    let written = convert_jar_file(&input_path, &ConvertOptions::default()).unwrap();
    assert_eq!(written, dir.path().join("app-valuetypified.jar"));

    let output = JarFile::open(&written).unwrap();
    assert_eq!(output.len(), 4);
    let user = output.parse_class("test/User.class").unwrap();
    assert!(instructions(&user, "getX").contains(&Vload(0)));

    // the input is left alone
    let input = JarFile::open(&input_path).unwrap();
    assert_eq!(input.get_entry("test/User.class"), Some(&user_class()[..]));
}

#[test]
fn test_missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = convert_jar_file(dir.path().join("absent.jar"), &ConvertOptions::default());
    assert!(matches!(
        result,
        Err(JarConvertError::Jar(JarError::Io(_)))
    ));
}
