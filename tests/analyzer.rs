extern crate classfile_flattener;

mod common;

use classfile_flattener::code_attribute::{decode_code, Instruction};
use classfile_flattener::valuetype::frame::FrameError;
use classfile_flattener::valuetype::patch::{ConversionState, PatchAction};
use classfile_flattener::valuetype::value::{Provenance, Site};
use classfile_flattener::valuetype::{
    analyze_method, AnalyzerError, MethodAnalysis, MethodBody, ValueCapableOracle,
};

use common::*;

use Instruction::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn analyze_with(
    builder: &ClassBuilder,
    descriptor: &str,
    max_locals: u16,
    code: &[Instruction],
    rewrite_value_arrays: bool,
) -> Result<MethodAnalysis, AnalyzerError> {
    let code = code_attribute(4, max_locals, code);
    let instructions = decode_code(&code.code).unwrap();
    let body = MethodBody {
        is_static: true,
        descriptor,
        code: &code,
        instructions: &instructions,
    };
    let mut oracle = ValueCapableOracle::new(value_classes());
    analyze_method(&builder.class, &body, &mut oracle, rewrite_value_arrays)
}

fn analyze(
    builder: &ClassBuilder,
    descriptor: &str,
    max_locals: u16,
    code: &[Instruction],
) -> MethodAnalysis {
    analyze_with(builder, descriptor, max_locals, code, true).unwrap()
}

fn sites(sites: &[Site]) -> Provenance {
    sites.iter().copied().collect()
}

fn at(index: usize) -> Site {
    Site::Instruction(index)
}

// ===========================================================================
// Straight-line code
// ===========================================================================

#[test]
fn test_parameter_field_reads_stay_in_value_form() {
    let mut builder = ClassBuilder::new("test/User");
    let x = builder.field_ref(POINT, "x", "I");
    let y = builder.field_ref(POINT, "y", "I");
    let analysis = analyze(
        &builder,
        "(Ltest/Point;)I",
        1,
        &[Aload0, Getfield(x), Aload0, Getfield(y), Iadd, Ireturn],
    );
    let registry = &analysis.registry;

    let entry = registry.get(Site::Entry(0)).unwrap();
    assert_eq!(entry.action, PatchAction::EntryUnbox { slot: 0 });
    assert!(!entry.force_box);

    let load = registry.get(at(0)).unwrap();
    assert_eq!(
        load.action,
        PatchAction::ValueLoad {
            slot: 0,
            local: sites(&[Site::Entry(0)])
        }
    );
    assert_eq!(load.state, ConversionState::Value);
    assert_eq!(load.class_name, POINT);

    let read = registry.get(at(1)).unwrap();
    assert_eq!(
        read.action,
        PatchAction::ValueFieldRead {
            receiver: sites(&[at(0)])
        }
    );
    assert_eq!(read.state, ConversionState::None);
    assert!(registry.get(at(3)).is_some());
    assert!(registry.get(at(4)).is_none());
    assert_eq!(registry.len(), 5);
    assert!(registry.iter().all(|(_, patch)| !patch.force_box));
}

#[test]
fn test_returned_value_is_boxed() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "(Ltest/Point;)Ljava/lang/Object;",
        1,
        &[Aload0, Areturn],
    );
    assert!(analysis.registry.is_forced(at(0)));
    assert!(!analysis.registry.is_forced(Site::Entry(0)));
}

#[test]
fn test_local_store_and_reload() {
    let mut builder = ClassBuilder::new("test/User");
    let x = builder.field_ref(POINT, "x", "I");
    let analysis = analyze(
        &builder,
        "(Ltest/Point;)I",
        2,
        &[Aload0, Astore1, Aload1, Getfield(x), Ireturn],
    );
    let registry = &analysis.registry;
    let store = registry.get(at(1)).unwrap();
    assert_eq!(
        store.action,
        PatchAction::ValueStore {
            slot: 1,
            operand: sites(&[at(0)])
        }
    );
    assert_eq!(store.state, ConversionState::None);
    assert_eq!(
        registry.get(at(2)).unwrap().action,
        PatchAction::ValueLoad {
            slot: 1,
            local: sites(&[at(1)])
        }
    );
    assert!(registry.iter().all(|(_, patch)| !patch.force_box));
}

#[test]
fn test_constructor_call_joins_provenance() {
    let mut builder = ClassBuilder::new("test/User");
    let point = builder.class_ref(POINT);
    let init = builder.method_ref(POINT, "<init>", "()V");
    let x = builder.field_ref(POINT, "x", "I");
    let analysis = analyze(
        &builder,
        "()I",
        1,
        &[
            New(point),
            Dup,
            Invokespecial(init),
            Astore0,
            Aload0,
            Getfield(x),
            Ireturn,
        ],
    );
    let registry = &analysis.registry;
    assert!(registry.get(at(0)).is_none());
    let init_site = registry.get(at(2)).unwrap();
    assert_eq!(init_site.state, ConversionState::Object);
    assert!(!init_site.force_box);
    assert_eq!(
        registry.get(at(3)).unwrap().action,
        PatchAction::ValueStore {
            slot: 0,
            operand: sites(&[at(0), at(2)])
        }
    );
}

// ===========================================================================
// Contexts that need a reference
// ===========================================================================

#[test]
fn test_unsafe_contexts_force_boxing() {
    let mut builder = ClassBuilder::new("test/User");
    let object = builder.class_ref("java/lang/Object");
    let saved = builder.field_ref("test/User", "saved", "Ljava/lang/Object;");
    let consume = builder.method_ref("test/User", "consume", "(Ltest/Point;)V");

    let cases: Vec<(&str, Vec<Instruction>)> = vec![
        ("(Ltest/Point;)I", vec![Aload0, Instanceof(object), Ireturn]),
        ("(Ltest/Point;)V", vec![Aload0, Putstatic(saved), Return]),
        ("(Ltest/Point;)V", vec![Aload0, Invokestatic(consume), Return]),
        (
            "(Ltest/Point;)Ljava/lang/Object;",
            vec![Aload0, Checkcast(object), Areturn],
        ),
        (
            "(Ltest/Point;)I",
            vec![Aload0, Ifnonnull(5), Iconst1, Ireturn, Iconst0, Ireturn],
        ),
        (
            "(Ltest/Point;)I",
            vec![Aload0, Ifnull(5), Iconst1, Ireturn, Iconst0, Ireturn],
        ),
        ("(Ltest/Point;)V", vec![Aload0, Athrow]),
    ];
    for (descriptor, code) in cases {
        let analysis = analyze(&builder, descriptor, 1, &code);
        assert!(
            analysis.registry.is_forced(at(0)),
            "{:?} should box its operand",
            code[1]
        );
    }
}

#[test]
fn test_invokedynamic_arguments_are_boxed() {
    let mut builder = ClassBuilder::new("test/User");
    let indy = builder.invoke_dynamic("run", "(Ltest/Point;)Ljava/lang/Runnable;");
    let analysis = analyze(
        &builder,
        "(Ltest/Point;)Ljava/lang/Object;",
        1,
        &[Aload0, Invokedynamic { index: indy, filler: 0 }, Areturn],
    );
    assert!(analysis.registry.is_forced(at(0)));
    assert!(analysis.registry.get(at(1)).is_none());
}

#[test]
fn test_reference_comparison_boxes_both_operands() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "(Ltest/Point;)I",
        1,
        &[Aload0, Aload0, IfAcmpeq(5), Iconst0, Ireturn, Iconst1, Ireturn],
    );
    assert!(analysis.registry.is_forced(at(0)));
    assert!(analysis.registry.is_forced(at(1)));
}

#[test]
fn test_monitor_on_value_is_rejected() {
    let builder = ClassBuilder::new("test/User");
    let result = analyze_with(
        &builder,
        "(Ltest/Point;)V",
        1,
        &[Aload0, Monitorenter, Return],
        true,
    );
    assert!(matches!(
        result,
        Err(AnalyzerError::MonitorOnValue { address: 1 })
    ));
}

#[test]
fn test_monitor_on_reference_is_fine() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "(Ljava/lang/Object;)V",
        1,
        &[Aload0, Monitorenter, Return],
    );
    assert!(analysis.registry.is_empty());
}

// ===========================================================================
// Control-flow merges
// ===========================================================================

#[test]
fn test_merge_of_same_class_stays_value() {
    let mut builder = ClassBuilder::new("test/User");
    let x = builder.field_ref(POINT, "x", "I");
    let analysis = analyze(
        &builder,
        "(ZLtest/Point;Ltest/Point;)I",
        3,
        &[Iload0, Ifeq(7), Aload1, Goto(4), Aload2, Getfield(x), Ireturn],
    );
    let registry = &analysis.registry;
    assert_eq!(
        registry.get(at(5)).unwrap().action,
        PatchAction::ValueFieldRead {
            receiver: sites(&[at(2), at(4)])
        }
    );
    for site in [at(2), at(4), Site::Entry(1), Site::Entry(2)] {
        assert!(!registry.is_forced(site), "{:?}", site);
    }
}

#[test]
fn test_merge_of_different_classes_boxes_both() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "(ZLtest/Point;Ltest/Line;)Ljava/lang/Object;",
        3,
        &[Iload0, Ifeq(7), Aload1, Goto(4), Aload2, Areturn],
    );
    let registry = &analysis.registry;
    assert!(registry.is_forced(at(2)));
    assert!(registry.is_forced(at(4)));
    assert!(!registry.is_forced(Site::Entry(1)));
    assert!(!registry.is_forced(Site::Entry(2)));
}

#[test]
fn test_merge_with_null_boxes_value() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "(ZLtest/Point;)Ljava/lang/Object;",
        3,
        &[
            Iload0,
            Ifeq(7),
            Aload1,
            Goto(4),
            Aconstnull,
            Astore2,
            Aload2,
            Areturn,
        ],
    );
    let registry = &analysis.registry;
    assert!(registry.is_forced(at(2)));
    // the store after the merge only ever keeps a reference
    if let Some(store) = registry.get(at(5)) {
        assert_eq!(store.action, PatchAction::Default);
        assert_eq!(store.state, ConversionState::None);
    }
}

#[test]
fn test_overwritten_parameter_is_boxed_at_entry() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "(Ltest/Point;I)Ljava/lang/Object;",
        2,
        &[Iload1, Ifeq(5), Aconstnull, Astore0, Aload0, Areturn],
    );
    assert!(analysis.registry.is_forced(Site::Entry(0)));
    let conversions: Vec<_> = analysis.registry.entry_conversions().collect();
    assert_eq!(conversions, vec![(0, POINT, true)]);
}

#[test]
fn test_stack_height_mismatch_is_an_error() {
    let builder = ClassBuilder::new("test/User");
    let result = analyze_with(
        &builder,
        "(I)V",
        1,
        &[Iconst0, Iload0, Ifeq(4), Pop, Return],
        true,
    );
    assert!(matches!(
        result,
        Err(AnalyzerError::Frame {
            source: FrameError::StackHeightMismatch { .. },
            ..
        })
    ));
}

#[test]
fn test_exception_handler_sees_locals() {
    let mut builder = ClassBuilder::new("test/User");
    let x = builder.field_ref(POINT, "x", "I");
    let code = [Aload0, Getfield(x), Ireturn, Astore1, Aload0, Getfield(x), Ireturn];
    let mut attribute = code_attribute(2, 2, &code);
    attribute.exception_table.push(catch_all(0, 4, 5));
    attribute.sync_counts();
    let instructions = decode_code(&attribute.code).unwrap();
    let body = MethodBody {
        is_static: true,
        descriptor: "(Ltest/Point;)I",
        code: &attribute,
        instructions: &instructions,
    };
    let mut oracle = ValueCapableOracle::new(value_classes());
    let analysis = analyze_method(&builder.class, &body, &mut oracle, true).unwrap();

    let handler = analysis.frames[3].as_ref().unwrap();
    assert_eq!(handler.stack.len(), 1);
    assert!(handler.locals[0].is_value_capable());
    assert_eq!(
        analysis.registry.get(at(4)).unwrap().action,
        PatchAction::ValueLoad {
            slot: 0,
            local: sites(&[Site::Entry(0)])
        }
    );
}

// ===========================================================================
// Arrays
// ===========================================================================

#[test]
fn test_value_array_load() {
    let mut builder = ClassBuilder::new("test/User");
    let x = builder.field_ref(POINT, "x", "I");
    let code = [Aload0, Iconst0, Aaload, Getfield(x), Ireturn];

    let enabled = analyze(&builder, "([Ltest/Point;)I", 1, &code);
    let load = enabled.registry.get(at(2)).unwrap();
    assert_eq!(load.action, PatchAction::ValueArrayLoad);
    assert_eq!(load.state, ConversionState::Value);
    assert_eq!(
        enabled.registry.get(at(3)).unwrap().action,
        PatchAction::ValueFieldRead {
            receiver: sites(&[at(2)])
        }
    );
    assert!(enabled.registry.get(Site::Entry(0)).is_none());

    let disabled = analyze_with(&builder, "([Ltest/Point;)I", 1, &code, false).unwrap();
    assert!(disabled.registry.is_empty());
}

#[test]
fn test_value_array_creation() {
    let mut builder = ClassBuilder::new("test/User");
    let point = builder.class_ref(POINT);
    let code = [Iload0, Anewarray(point), Areturn];

    let enabled = analyze(&builder, "(I)[Ltest/Point;", 1, &code);
    assert_eq!(
        enabled.registry.get(at(1)).unwrap().action,
        PatchAction::ValueArrayNew {
            element: POINT.to_string()
        }
    );

    let disabled = analyze_with(&builder, "(I)[Ltest/Point;", 1, &code, false).unwrap();
    assert!(disabled.registry.is_empty());
}

#[test]
fn test_value_array_store() {
    let builder = ClassBuilder::new("test/User");
    let code = [Aload0, Iconst0, Aload1, Aastore, Return];

    let enabled = analyze(&builder, "([Ltest/Point;Ltest/Point;)V", 2, &code);
    assert_eq!(
        enabled.registry.get(at(3)).unwrap().action,
        PatchAction::ValueArrayStore {
            operand: Some(sites(&[at(2)]))
        }
    );
    assert!(!enabled.registry.is_forced(at(2)));

    let disabled = analyze_with(&builder, "([Ltest/Point;Ltest/Point;)V", 2, &code, false).unwrap();
    assert!(disabled.registry.is_forced(at(2)));
    assert!(disabled.registry.get(at(3)).is_none());
}

#[test]
fn test_store_into_object_array_boxes() {
    let builder = ClassBuilder::new("test/User");
    let analysis = analyze(
        &builder,
        "([Ljava/lang/Object;Ltest/Point;)V",
        2,
        &[Aload0, Iconst0, Aload1, Aastore, Return],
    );
    assert!(analysis.registry.is_forced(at(2)));
}

// ===========================================================================
// Values that start out as references
// ===========================================================================

#[test]
fn test_checkcast_to_value_class_is_unboxed() {
    let mut builder = ClassBuilder::new("test/User");
    let point = builder.class_ref(POINT);
    let x = builder.field_ref(POINT, "x", "I");
    let analysis = analyze(
        &builder,
        "(Ljava/lang/Object;)I",
        1,
        &[Aload0, Checkcast(point), Getfield(x), Ireturn],
    );
    let registry = &analysis.registry;
    assert!(registry.get(at(0)).is_none());

    let cast = registry.get(at(1)).unwrap();
    assert_eq!(cast.action, PatchAction::Default);
    assert_eq!(cast.state, ConversionState::Object);
    assert_eq!(cast.class_name, POINT);
    assert!(!cast.force_box);

    assert_eq!(
        registry.get(at(2)).unwrap().action,
        PatchAction::ValueFieldRead {
            receiver: sites(&[at(1)])
        }
    );
}

#[test]
fn test_value_returned_by_call_is_unboxed() {
    let mut builder = ClassBuilder::new("test/User");
    let make = builder.method_ref("test/Factory", "make", "()Ltest/Point;");
    let x = builder.field_ref(POINT, "x", "I");
    let analysis = analyze(
        &builder,
        "()I",
        0,
        &[Invokestatic(make), Getfield(x), Ireturn],
    );
    let call = analysis.registry.get(at(0)).unwrap();
    assert_eq!(call.action, PatchAction::Default);
    assert_eq!(call.state, ConversionState::Object);
    assert!(!call.force_box);
    assert_eq!(
        analysis.registry.get(at(1)).unwrap().action,
        PatchAction::ValueFieldRead {
            receiver: sites(&[at(0)])
        }
    );
}

#[test]
fn test_value_field_of_plain_receiver() {
    let mut builder = ClassBuilder::new("test/User");
    let origin = builder.field_ref("test/Holder", "origin", POINT_DESC);
    let x = builder.field_ref(POINT, "x", "I");
    let analysis = analyze(
        &builder,
        "(Ltest/Holder;)I",
        1,
        &[Aload0, Getfield(origin), Getfield(x), Ireturn],
    );
    let registry = &analysis.registry;
    assert!(registry.get(at(0)).is_none());

    let read = registry.get(at(1)).unwrap();
    assert_eq!(read.action, PatchAction::Default);
    assert_eq!(read.state, ConversionState::Value);
    assert_eq!(read.class_name, POINT);
    assert!(!read.force_box);
    assert_eq!(
        registry.get(at(2)).unwrap().action,
        PatchAction::ValueFieldRead {
            receiver: sites(&[at(1)])
        }
    );
}

#[test]
fn test_null_merge_keeps_array_type() {
    let mut builder = ClassBuilder::new("test/User");
    let point = builder.class_ref(POINT);
    let analysis = analyze(
        &builder,
        "(ZLtest/Point;)V",
        3,
        &[
            Aconstnull,
            Astore2,
            Iload0,
            Ifeq(8),
            Iconst1,
            Anewarray(point),
            Astore2,
            Aload2,
            Iconst0,
            Aload1,
            Aastore,
            Return,
        ],
    );
    let registry = &analysis.registry;
    assert_eq!(
        registry.get(at(10)).unwrap().action,
        PatchAction::ValueArrayStore {
            operand: Some(sites(&[at(9)]))
        }
    );
    assert!(!registry.is_forced(at(9)));
    assert!(!registry.is_forced(Site::Entry(1)));
}
