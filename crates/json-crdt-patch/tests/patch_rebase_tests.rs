use json_crdt_patch::clock::ServerClock;
use json_crdt_patch::op::{ConValue, Op, Timestamp};
use json_crdt_patch::patch::Patch;
use json_crdt_patch::patch_builder::PatchBuilder;
use json_crdt_patch::{SESSION_SERVER, TRUE_ID};

fn ts(sid: u64, time: u64) -> Timestamp {
    Timestamp { sid, time }
}

#[test]
fn rebase_rewrites_own_ids_and_keeps_foreign_references() {
    let mut clock = ServerClock::new(5);
    let mut builder = PatchBuilder::new();
    builder
        .ins_arr(&mut clock, ts(3, 3), ts(3, 3), vec![TRUE_ID])
        .expect("one element");
    let patch = builder.flush();
    assert_eq!(patch.get_id(), Some(ts(SESSION_SERVER, 5)));

    let rebased = patch.rebase(10, Some(5)).expect("rebase");
    match &rebased.ops[0] {
        Op::InsertArrayElements {
            id,
            obj,
            after,
            elements,
        } => {
            assert_eq!(*id, ts(SESSION_SERVER, 10));
            assert_eq!(*obj, ts(3, 3));
            assert_eq!(*after, ts(3, 3));
            assert_eq!(elements.as_slice(), &[TRUE_ID]);
        }
        other => panic!("expected arr_ins, got {other:?}"),
    }
}

#[test]
fn rebase_shifts_same_session_references_past_the_horizon() {
    let sid = 500_001;
    let patch = Patch {
        ops: vec![Op::InsertArrayElements {
            id: ts(sid, 5),
            obj: ts(sid, 7),
            after: ts(sid, 7),
            elements: vec![ts(0, 10)],
        }],
    };
    let rebased = patch.rebase(10, Some(5)).expect("rebase");
    match &rebased.ops[0] {
        Op::InsertArrayElements { id, after, .. } => {
            assert_eq!(id.time, 10);
            assert_eq!(after.time, 12);
        }
        other => panic!("expected arr_ins, got {other:?}"),
    }
}

#[test]
fn rebase_keeps_same_session_references_before_the_horizon() {
    let sid = 500_001;
    let patch = Patch {
        ops: vec![Op::InsertArrayElements {
            id: ts(sid, 5),
            obj: ts(sid, 3),
            after: ts(sid, 3),
            elements: vec![ts(0, 10)],
        }],
    };
    let rebased = patch.rebase(10, Some(5)).expect("rebase");
    match &rebased.ops[0] {
        Op::InsertArrayElements { id, after, .. } => {
            assert_eq!(id.time, 10);
            assert_eq!(after.time, 3);
        }
        other => panic!("expected arr_ins, got {other:?}"),
    }
}

#[test]
fn rebase_transforms_constant_timestamp_payloads_in_session() {
    let sid = 500_001;
    let patch = Patch {
        ops: vec![Op::MakeConstant {
            id: ts(sid, 20),
            value: ConValue::Ref(ts(sid, 25)),
        }],
    };
    let rebased = patch.rebase(1000, None).expect("rebase");
    match &rebased.ops[0] {
        Op::MakeConstant {
            id,
            value: ConValue::Ref(inner),
        } => {
            assert_eq!(id.time, 1000);
            assert_eq!(inner.time, 1005);
        }
        other => panic!("expected const ref, got {other:?}"),
    }
}

#[test]
fn rebase_to_same_baseline_is_identity() {
    let sid = 500_001;
    let patch = Patch {
        ops: vec![Op::MakeObject { id: ts(sid, 20) }],
    };
    let rebased = patch.rebase(20, None).expect("rebase");
    assert_eq!(rebased, patch);
}

#[test]
fn rewrite_time_covers_delete_spans() {
    let sid = 42_000_001;
    let patch = Patch {
        ops: vec![Op::Delete {
            id: ts(sid, 10),
            obj: ts(3, 1),
            what: vec![
                json_crdt_patch::op::Timespan::new(sid, 4, 3),
                json_crdt_patch::op::Timespan::new(7, 2, 1),
            ],
        }],
    };
    let rewritten = patch.rewrite_time(|t| {
        if t.sid == sid {
            ts(sid, t.time + 100)
        } else {
            t
        }
    });
    match &rewritten.ops[0] {
        Op::Delete { id, obj, what } => {
            assert_eq!(id.time, 110);
            assert_eq!(*obj, ts(3, 1));
            assert_eq!(what[0].time, 104);
            assert_eq!(what[0].span, 3);
            assert_eq!(what[1].time, 2);
        }
        other => panic!("expected del, got {other:?}"),
    }
}
