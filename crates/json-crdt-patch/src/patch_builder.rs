//! Stateful façade that turns high-level document edits into patch
//! operations.
//!
//! The builder never owns a clock: every edit method takes `&mut impl
//! Clock`, so two builders may interleave on one clock and external code may
//! advance it between calls. `pad` keeps the patch gap-free in that case by
//! inserting an explicit no-op covering the drift.

use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::op::{ConValue, Op, Timespan, Timestamp};
use crate::patch::Patch;
use crate::{FALSE_ID, NULL_ID, ORIGIN, TRUE_ID, UNDEFINED_ID};

#[derive(Debug, Error)]
pub enum PatchBuildError {
    #[error("obj_set requires at least one key tuple")]
    EmptyKeyTuples,
    #[error("str_ins requires a non-empty string")]
    EmptyStringInsert,
    #[error("bin_ins requires non-empty data")]
    EmptyBinaryInsert,
    #[error("arr_ins requires at least one element")]
    EmptyArrayInsert,
    #[error("del requires at least one span")]
    EmptyDelete,
    #[error("noop length must be positive")]
    ZeroLengthNoop,
}

/// Appends operations to an in-progress [`Patch`].
#[derive(Debug, Default)]
pub struct PatchBuilder {
    patch: Patch,
}

impl PatchBuilder {
    pub fn new() -> Self {
        Self {
            patch: Patch::new(),
        }
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// Takes the built patch out, leaving the builder empty.
    pub fn flush(&mut self) -> Patch {
        std::mem::take(&mut self.patch)
    }

    /// Fills any gap between the last appended operation and the clock's
    /// current time with an explicit no-op, so patch ids stay contiguous.
    fn pad(&mut self, clock: &impl Clock) {
        if self.patch.ops.is_empty() {
            return;
        }
        let next_time = self.patch.next_time();
        let drift = clock.time().saturating_sub(next_time);
        if drift > 0 {
            self.patch.ops.push(Op::Noop {
                id: Timestamp {
                    sid: clock.sid(),
                    time: next_time,
                },
                len: drift,
            });
        }
    }

    pub fn obj(&mut self, clock: &mut impl Clock) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeObject { id });
        id
    }

    pub fn arr(&mut self, clock: &mut impl Clock) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeArray { id });
        id
    }

    pub fn str(&mut self, clock: &mut impl Clock) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeString { id });
        id
    }

    pub fn num(&mut self, clock: &mut impl Clock) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeNumber { id });
        id
    }

    pub fn bin(&mut self, clock: &mut impl Clock) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeBinary { id });
        id
    }

    pub fn tup(&mut self, clock: &mut impl Clock) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeTuple { id });
        id
    }

    pub fn con(&mut self, clock: &mut impl Clock, value: ConValue) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeConstant { id, value });
        id
    }

    pub fn val(&mut self, clock: &mut impl Clock, value: Value) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::MakeValue { id, value });
        id
    }

    /// Points the document root register at `val`.
    pub fn root(&mut self, clock: &mut impl Clock, val: Timestamp) -> Timestamp {
        self.set_val(clock, ORIGIN, val)
    }

    pub fn set_val(&mut self, clock: &mut impl Clock, obj: Timestamp, val: Timestamp) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::SetValue { id, obj, val });
        id
    }

    pub fn set_num(&mut self, clock: &mut impl Clock, obj: Timestamp, value: f64) -> Timestamp {
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::SetNumber { id, obj, value });
        id
    }

    pub fn set_keys(
        &mut self,
        clock: &mut impl Clock,
        obj: Timestamp,
        tuples: Vec<(String, Timestamp)>,
    ) -> Result<Timestamp, PatchBuildError> {
        if tuples.is_empty() {
            return Err(PatchBuildError::EmptyKeyTuples);
        }
        self.pad(clock);
        let id = clock.tick(1);
        let op = Op::SetObjectKeys { id, obj, tuples };
        let span = op.span();
        self.patch.ops.push(op);
        // The initial tick(1) already reserved the first id of the run.
        if span > 1 {
            clock.tick(span - 1);
        }
        Ok(id)
    }

    pub fn ins_str(
        &mut self,
        clock: &mut impl Clock,
        obj: Timestamp,
        after: Timestamp,
        data: &str,
    ) -> Result<Timestamp, PatchBuildError> {
        if data.is_empty() {
            return Err(PatchBuildError::EmptyStringInsert);
        }
        self.pad(clock);
        let id = clock.tick(1);
        let op = Op::InsertStringSubstring {
            id,
            obj,
            after,
            data: data.to_string(),
        };
        let span = op.span();
        self.patch.ops.push(op);
        if span > 1 {
            clock.tick(span - 1);
        }
        Ok(id)
    }

    pub fn ins_bin(
        &mut self,
        clock: &mut impl Clock,
        obj: Timestamp,
        after: Timestamp,
        data: Vec<u8>,
    ) -> Result<Timestamp, PatchBuildError> {
        if data.is_empty() {
            return Err(PatchBuildError::EmptyBinaryInsert);
        }
        self.pad(clock);
        let id = clock.tick(1);
        let op = Op::InsertBinaryData {
            id,
            obj,
            after,
            data,
        };
        let span = op.span();
        self.patch.ops.push(op);
        if span > 1 {
            clock.tick(span - 1);
        }
        Ok(id)
    }

    pub fn ins_arr(
        &mut self,
        clock: &mut impl Clock,
        obj: Timestamp,
        after: Timestamp,
        elements: Vec<Timestamp>,
    ) -> Result<Timestamp, PatchBuildError> {
        if elements.is_empty() {
            return Err(PatchBuildError::EmptyArrayInsert);
        }
        self.pad(clock);
        let id = clock.tick(1);
        let op = Op::InsertArrayElements {
            id,
            obj,
            after,
            elements,
        };
        let span = op.span();
        self.patch.ops.push(op);
        if span > 1 {
            clock.tick(span - 1);
        }
        Ok(id)
    }

    pub fn del(
        &mut self,
        clock: &mut impl Clock,
        obj: Timestamp,
        what: Vec<Timespan>,
    ) -> Result<Timestamp, PatchBuildError> {
        if what.is_empty() {
            return Err(PatchBuildError::EmptyDelete);
        }
        self.pad(clock);
        let id = clock.tick(1);
        self.patch.ops.push(Op::Delete { id, obj, what });
        Ok(id)
    }

    pub fn del_one(
        &mut self,
        clock: &mut impl Clock,
        obj: Timestamp,
        what: Timespan,
    ) -> Result<Timestamp, PatchBuildError> {
        self.del(clock, obj, vec![what])
    }

    pub fn noop(&mut self, clock: &mut impl Clock, len: u64) -> Result<Timestamp, PatchBuildError> {
        if len == 0 {
            return Err(PatchBuildError::ZeroLengthNoop);
        }
        self.pad(clock);
        let id = clock.tick(len);
        self.patch.ops.push(Op::Noop { id, len });
        Ok(id)
    }

    /// Recursively compiles an arbitrary JSON value into operations and
    /// returns the id of the node representing it. `null`, `true` and
    /// `false` map to pre-interned constants and emit nothing.
    pub fn json(
        &mut self,
        clock: &mut impl Clock,
        value: &Value,
    ) -> Result<Timestamp, PatchBuildError> {
        match value {
            Value::Null => Ok(NULL_ID),
            Value::Bool(true) => Ok(TRUE_ID),
            Value::Bool(false) => Ok(FALSE_ID),
            Value::Number(_) => Ok(self.val(clock, value.clone())),
            Value::String(s) => self.json_str(clock, s),
            Value::Array(items) => self.json_arr(clock, items),
            Value::Object(map) => {
                let entries: Vec<(&str, &Value)> =
                    map.iter().map(|(k, v)| (k.as_str(), v)).collect();
                self.json_obj(clock, &entries)
            }
        }
    }

    pub fn json_str(
        &mut self,
        clock: &mut impl Clock,
        s: &str,
    ) -> Result<Timestamp, PatchBuildError> {
        let id = self.str(clock);
        if !s.is_empty() {
            self.ins_str(clock, id, id, s)?;
        }
        Ok(id)
    }

    pub fn json_arr(
        &mut self,
        clock: &mut impl Clock,
        items: &[Value],
    ) -> Result<Timestamp, PatchBuildError> {
        let id = self.arr(clock);
        let mut elements = Vec::with_capacity(items.len());
        for item in items {
            elements.push(self.json(clock, item)?);
        }
        if !elements.is_empty() {
            // One batched insert at the head of the array.
            self.ins_arr(clock, id, id, elements)?;
        }
        Ok(id)
    }

    pub fn json_obj(
        &mut self,
        clock: &mut impl Clock,
        entries: &[(&str, &Value)],
    ) -> Result<Timestamp, PatchBuildError> {
        let id = self.obj(clock);
        let mut tuples = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value_id = self.json(clock, value)?;
            tuples.push((key.to_string(), value_id));
        }
        if !tuples.is_empty() {
            self.set_keys(clock, id, tuples)?;
        }
        Ok(id)
    }

    /// Id of the `undefined` singleton; kept for callers compiling non-JSON
    /// host values.
    pub fn undefined(&self) -> Timestamp {
        UNDEFINED_ID
    }
}
