//! The JSON CRDT patch operation set.
//!
//! One enum variant per operation kind, dispatched by `match` everywhere a
//! codec or the builder needs per-kind behavior. Wire opcodes live in the
//! `opcode` module and are append-only: inserting in the middle is a
//! breaking wire change.

use serde_json::Value;

/// Globally unique id of a single elementary edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub sid: u64,
    pub time: u64,
}

/// A contiguous run of `span` ids starting at `time`, all in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timespan {
    pub sid: u64,
    pub time: u64,
    pub span: u64,
}

impl Timespan {
    pub fn new(sid: u64, time: u64, span: u64) -> Self {
        Self { sid, time, span }
    }

    pub fn id(&self) -> Timestamp {
        Timestamp {
            sid: self.sid,
            time: self.time,
        }
    }
}

/// Payload of a constant node: a JSON literal, a reference to another
/// operation, or the `undefined` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConValue {
    Json(Value),
    Ref(Timestamp),
    Undef,
}

/// Wire opcodes shared by the binary and compact codecs.
///
/// `ROOT` is retained for wire compatibility with pre-rework patches:
/// decoders map it to a `val_set` targeting the document origin, encoders
/// never emit it.
pub mod opcode {
    pub const OBJ: u8 = 0;
    pub const ARR: u8 = 1;
    pub const STR: u8 = 2;
    pub const NUM: u8 = 3;
    pub const ROOT: u8 = 4;
    pub const OBJ_SET: u8 = 5;
    pub const NUM_SET: u8 = 6;
    pub const STR_INS: u8 = 7;
    pub const ARR_INS: u8 = 8;
    pub const DEL: u8 = 9;
    pub const DEL_ONE: u8 = 10;
    pub const NOOP_ONE: u8 = 11;
    pub const NOOP: u8 = 12;
    pub const BIN: u8 = 13;
    pub const BIN_INS: u8 = 14;
    pub const CONST: u8 = 15;
    pub const VAL: u8 = 16;
    pub const VAL_SET: u8 = 17;
    pub const TUP: u8 = 18;
}

/// A single identified operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    MakeObject {
        id: Timestamp,
    },
    MakeArray {
        id: Timestamp,
    },
    MakeString {
        id: Timestamp,
    },
    MakeNumber {
        id: Timestamp,
    },
    MakeBinary {
        id: Timestamp,
    },
    MakeConstant {
        id: Timestamp,
        value: ConValue,
    },
    MakeValue {
        id: Timestamp,
        value: Value,
    },
    MakeTuple {
        id: Timestamp,
    },
    SetObjectKeys {
        id: Timestamp,
        obj: Timestamp,
        tuples: Vec<(String, Timestamp)>,
    },
    SetNumber {
        id: Timestamp,
        obj: Timestamp,
        value: f64,
    },
    SetValue {
        id: Timestamp,
        obj: Timestamp,
        val: Timestamp,
    },
    InsertStringSubstring {
        id: Timestamp,
        obj: Timestamp,
        after: Timestamp,
        data: String,
    },
    InsertBinaryData {
        id: Timestamp,
        obj: Timestamp,
        after: Timestamp,
        data: Vec<u8>,
    },
    InsertArrayElements {
        id: Timestamp,
        obj: Timestamp,
        after: Timestamp,
        elements: Vec<Timestamp>,
    },
    Delete {
        id: Timestamp,
        obj: Timestamp,
        what: Vec<Timespan>,
    },
    Noop {
        id: Timestamp,
        len: u64,
    },
}

impl Op {
    pub fn id(&self) -> Timestamp {
        match self {
            Op::MakeObject { id }
            | Op::MakeArray { id }
            | Op::MakeString { id }
            | Op::MakeNumber { id }
            | Op::MakeBinary { id }
            | Op::MakeConstant { id, .. }
            | Op::MakeValue { id, .. }
            | Op::MakeTuple { id }
            | Op::SetObjectKeys { id, .. }
            | Op::SetNumber { id, .. }
            | Op::SetValue { id, .. }
            | Op::InsertStringSubstring { id, .. }
            | Op::InsertBinaryData { id, .. }
            | Op::InsertArrayElements { id, .. }
            | Op::Delete { id, .. }
            | Op::Noop { id, .. } => *id,
        }
    }

    /// Number of consecutive ids this operation owns, starting at `id`.
    ///
    /// String spans count UTF-16 code units, matching per-character
    /// addressing in the sequence CRDT.
    pub fn span(&self) -> u64 {
        match self {
            Op::SetObjectKeys { tuples, .. } => tuples.len() as u64,
            Op::InsertStringSubstring { data, .. } => data.encode_utf16().count() as u64,
            Op::InsertBinaryData { data, .. } => data.len() as u64,
            Op::InsertArrayElements { elements, .. } => elements.len() as u64,
            Op::Noop { len, .. } => *len,
            _ => 1,
        }
    }

    /// `true` for operations that mutate an existing node, `false` for node
    /// creation and no-ops.
    pub fn is_edit(&self) -> bool {
        matches!(
            self,
            Op::SetObjectKeys { .. }
                | Op::SetNumber { .. }
                | Op::SetValue { .. }
                | Op::InsertStringSubstring { .. }
                | Op::InsertBinaryData { .. }
                | Op::InsertArrayElements { .. }
                | Op::Delete { .. }
        )
    }

    /// JSON codec mnemonic. `Delete` and `Noop` map to their span-N form;
    /// the binary and compact codecs pick the `*_one` opcode themselves.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::MakeObject { .. } => "obj",
            Op::MakeArray { .. } => "arr",
            Op::MakeString { .. } => "str",
            Op::MakeNumber { .. } => "num",
            Op::MakeBinary { .. } => "bin",
            Op::MakeConstant { .. } => "const",
            Op::MakeValue { .. } => "val",
            Op::MakeTuple { .. } => "tup",
            Op::SetObjectKeys { .. } => "obj_set",
            Op::SetNumber { .. } => "num_set",
            Op::SetValue { .. } => "val_set",
            Op::InsertStringSubstring { .. } => "str_ins",
            Op::InsertBinaryData { .. } => "bin_ins",
            Op::InsertArrayElements { .. } => "arr_ins",
            Op::Delete { .. } => "del",
            Op::Noop { .. } => "noop",
        }
    }
}
