use json_crdt_patch::op::{ConValue, Op, Timespan, Timestamp};
use json_crdt_patch::patch::Patch;
use json_crdt_patch::patch_compact_codec::{
    decode_patch_compact, encode_patch_compact, CompactCodecError,
};
use serde_json::{json, Value};

fn ts(sid: u64, time: u64) -> Timestamp {
    Timestamp { sid, time }
}

#[test]
fn references_into_the_patch_collapse_to_negative_integers() {
    let sid = 5;
    let patch = Patch {
        ops: vec![
            Op::MakeString { id: ts(sid, 25) },
            Op::InsertStringSubstring {
                id: ts(sid, 26),
                obj: ts(sid, 25),
                after: ts(sid, 25),
                data: "bar".to_string(),
            },
        ],
    };
    let encoded = encode_patch_compact(&patch).expect("encode");
    // [sid, time, str, str_ins, obj(rel), after(rel), "bar"]
    assert_eq!(encoded, json!([5, 25, 2, 7, -1, -1, "bar"]));
    assert_eq!(decode_patch_compact(&encoded).expect("decode"), patch);
}

#[test]
fn foreign_and_pre_patch_references_stay_absolute() {
    let sid = 5;
    let patch = Patch {
        ops: vec![Op::InsertStringSubstring {
            // References a same-session node created by an earlier patch and
            // an anchor from another session; neither may use the relative
            // form.
            id: ts(sid, 25),
            obj: ts(sid, 7),
            after: ts(9, 3),
            data: "x".to_string(),
        }],
    };
    let encoded = encode_patch_compact(&patch).expect("encode");
    assert_eq!(encoded, json!([5, 25, 7, 5, 7, 9, 3, "x"]));
    assert_eq!(decode_patch_compact(&encoded).expect("decode"), patch);
}

#[test]
fn relative_offsets_decrease_as_time_increases() {
    let sid = 5;
    let patch = Patch {
        ops: vec![
            Op::MakeArray { id: ts(sid, 10) },
            Op::MakeObject { id: ts(sid, 11) },
            Op::InsertArrayElements {
                id: ts(sid, 12),
                obj: ts(sid, 10),
                after: ts(sid, 10),
                elements: vec![ts(sid, 11)],
            },
        ],
    };
    let encoded = encode_patch_compact(&patch).expect("encode");
    let items = encoded.as_array().expect("array form");
    // arr_ins obj/after refer to time 10 (offset -1); the element refers to
    // time 11 (offset -2).
    assert_eq!(items[5], json!(-1));
    assert_eq!(items[6], json!(-1));
    assert_eq!(items[7], json!([-2]));
    assert_eq!(decode_patch_compact(&encoded).expect("decode"), patch);
}

#[test]
fn single_span_delete_and_noop_use_dedicated_opcodes() {
    let sid = 5;
    let patch = Patch {
        ops: vec![
            Op::Delete {
                id: ts(sid, 30),
                obj: ts(3, 1),
                what: vec![Timespan::new(3, 2, 4)],
            },
            Op::Noop {
                id: ts(sid, 31),
                len: 1,
            },
            Op::Noop {
                id: ts(sid, 32),
                len: 6,
            },
        ],
    };
    let encoded = encode_patch_compact(&patch).expect("encode");
    assert_eq!(encoded, json!([5, 30, 10, 3, 1, 3, 2, 4, 11, 12, 6]));
    assert_eq!(decode_patch_compact(&encoded).expect("decode"), patch);
}

#[test]
fn round_trips_every_operation_kind() {
    let sid = 91_001;
    let patch = Patch {
        ops: vec![
            Op::MakeObject { id: ts(sid, 10) },
            Op::MakeArray { id: ts(sid, 11) },
            Op::MakeString { id: ts(sid, 12) },
            Op::MakeNumber { id: ts(sid, 13) },
            Op::MakeBinary { id: ts(sid, 14) },
            Op::MakeTuple { id: ts(sid, 15) },
            Op::MakeConstant {
                id: ts(sid, 16),
                value: ConValue::Ref(ts(sid, 10)),
            },
            Op::MakeConstant {
                id: ts(sid, 17),
                value: ConValue::Undef,
            },
            Op::MakeValue {
                id: ts(sid, 18),
                value: json!({"nested": [1, "two"]}),
            },
            Op::SetObjectKeys {
                id: ts(sid, 19),
                obj: ts(sid, 10),
                tuples: vec![
                    ("a".to_string(), ts(sid, 13)),
                    ("b".to_string(), ts(7, 7)),
                ],
            },
            Op::SetNumber {
                id: ts(sid, 21),
                obj: ts(sid, 13),
                value: 0.5,
            },
            Op::SetValue {
                id: ts(sid, 22),
                obj: ts(0, 0),
                val: ts(sid, 10),
            },
            Op::InsertStringSubstring {
                id: ts(sid, 23),
                obj: ts(sid, 12),
                after: ts(sid, 12),
                data: "ab".to_string(),
            },
            Op::InsertBinaryData {
                id: ts(sid, 25),
                obj: ts(sid, 14),
                after: ts(sid, 14),
                data: vec![9, 8, 7],
            },
            Op::InsertArrayElements {
                id: ts(sid, 28),
                obj: ts(sid, 11),
                after: ts(sid, 11),
                elements: vec![ts(sid, 16), ts(sid, 18)],
            },
            Op::Delete {
                id: ts(sid, 30),
                obj: ts(sid, 12),
                what: vec![Timespan::new(sid, 23, 2), Timespan::new(3, 1, 1)],
            },
            Op::Noop {
                id: ts(sid, 31),
                len: 3,
            },
        ],
    };
    let encoded = encode_patch_compact(&patch).expect("encode");
    assert_eq!(decode_patch_compact(&encoded).expect("decode"), patch);
}

#[test]
fn empty_patch_is_an_encode_error() {
    assert!(matches!(
        encode_patch_compact(&Patch::new()),
        Err(CompactCodecError::EmptyPatch)
    ));
}

#[test]
fn unknown_opcode_aborts_decode() {
    let encoded = json!([5, 25, 0, 99]);
    assert!(matches!(
        decode_patch_compact(&encoded),
        Err(CompactCodecError::UnknownOpcode(99))
    ));
}

#[test]
fn extreme_relative_offsets_decode_without_panicking() {
    // The most negative wire integer must survive offset recovery.
    let encoded = json!([5, 25, 7, i64::MIN, -1, "x"]);
    let patch = decode_patch_compact(&encoded).expect("decode");
    match &patch.ops[0] {
        Op::InsertStringSubstring { obj, after, .. } => {
            assert_eq!(*obj, ts(5, 25 + i64::MAX as u64));
            assert_eq!(*after, ts(5, 25));
        }
        other => panic!("expected str_ins, got {other:?}"),
    }
    // An offset that would push the resolved time past the u64 range is a
    // decode error, not a wrap.
    let encoded = json!([5, u64::MAX, 7, -2, -1, "x"]);
    assert!(matches!(
        decode_patch_compact(&encoded),
        Err(CompactCodecError::InvalidOperation)
    ));
}

#[test]
fn id_accumulator_overflow_is_a_decode_error() {
    let encoded = json!([5, 25, 12, u64::MAX, 12, 2]);
    assert!(matches!(
        decode_patch_compact(&encoded),
        Err(CompactCodecError::InvalidOperation)
    ));
}

#[test]
fn non_finite_numbers_are_an_encode_error() {
    let patch = Patch {
        ops: vec![Op::SetNumber {
            id: ts(5, 10),
            obj: ts(5, 9),
            value: f64::NAN,
        }],
    };
    assert!(matches!(
        encode_patch_compact(&patch),
        Err(CompactCodecError::InvalidOperation)
    ));
}

#[test]
fn truncated_fields_abort_decode() {
    // str_ins missing its string payload.
    let encoded = json!([5, 25, 7, -1, -1]);
    assert!(matches!(
        decode_patch_compact(&encoded),
        Err(CompactCodecError::InvalidOperation)
    ));
    // Header alone is not a patch.
    let header_only: Value = json!([5, 25]);
    assert!(matches!(
        decode_patch_compact(&header_only),
        Err(CompactCodecError::EmptyPatch)
    ));
}
