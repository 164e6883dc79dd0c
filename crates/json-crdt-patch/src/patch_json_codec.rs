//! Human-readable JSON patch codec.
//!
//! Form: `{id, ops: [{op: "<mnemonic>", ...fields}]}`. Timestamps encode as
//! a bare number when their session is the reserved server session, else as
//! a `[sid, time]` pair. Constant payloads that are themselves timestamps
//! carry a `"timestamp": true` tag to disambiguate from plain literals.

use base64::Engine;
use serde_json::{Map, Value};

use crate::op::{ConValue, Op, Timespan, Timestamp};
use crate::patch::Patch;
use crate::{ORIGIN, SESSION_SERVER};

#[derive(Debug, thiserror::Error)]
pub enum JsonCodecError {
    #[error("patch must not be empty")]
    EmptyPatch,
    #[error("invalid json patch payload")]
    InvalidPayload,
    #[error("invalid json operation")]
    InvalidOperation,
    #[error("unknown json operation: {0}")]
    UnknownOperation(String),
    #[error("invalid base64 payload")]
    InvalidBase64,
}

fn ts_to_json(ts: Timestamp) -> Value {
    if ts.sid == SESSION_SERVER {
        Value::from(ts.time)
    } else {
        Value::Array(vec![Value::from(ts.sid), Value::from(ts.time)])
    }
}

fn json_to_ts(v: &Value) -> Result<Timestamp, JsonCodecError> {
    if let Some(time) = v.as_u64() {
        return Ok(Timestamp {
            sid: SESSION_SERVER,
            time,
        });
    }
    let a = v.as_array().ok_or(JsonCodecError::InvalidOperation)?;
    if a.len() != 2 {
        return Err(JsonCodecError::InvalidOperation);
    }
    Ok(Timestamp {
        sid: a[0].as_u64().ok_or(JsonCodecError::InvalidOperation)?,
        time: a[1].as_u64().ok_or(JsonCodecError::InvalidOperation)?,
    })
}

fn json_to_span(v: &Value) -> Result<Timespan, JsonCodecError> {
    let a = v.as_array().ok_or(JsonCodecError::InvalidOperation)?;
    if a.len() != 3 {
        return Err(JsonCodecError::InvalidOperation);
    }
    Ok(Timespan {
        sid: a[0].as_u64().ok_or(JsonCodecError::InvalidOperation)?,
        time: a[1].as_u64().ok_or(JsonCodecError::InvalidOperation)?,
        span: a[2].as_u64().ok_or(JsonCodecError::InvalidOperation)?,
    })
}

pub fn encode_patch_json(patch: &Patch) -> Result<Value, JsonCodecError> {
    let id = patch.get_id().ok_or(JsonCodecError::EmptyPatch)?;
    let mut root = Map::new();
    root.insert("id".to_string(), ts_to_json(id));

    let mut rows = Vec::with_capacity(patch.ops.len());
    for op in &patch.ops {
        let mut row = Map::new();
        row.insert("op".to_string(), Value::String(op.mnemonic().to_string()));
        match op {
            Op::MakeObject { .. }
            | Op::MakeArray { .. }
            | Op::MakeString { .. }
            | Op::MakeNumber { .. }
            | Op::MakeBinary { .. }
            | Op::MakeTuple { .. } => {}
            Op::MakeConstant { value, .. } => match value {
                ConValue::Undef => {}
                ConValue::Json(v) => {
                    row.insert("value".to_string(), v.clone());
                }
                ConValue::Ref(ts) => {
                    row.insert("timestamp".to_string(), Value::Bool(true));
                    row.insert("value".to_string(), ts_to_json(*ts));
                }
            },
            Op::MakeValue { value, .. } => {
                row.insert("value".to_string(), value.clone());
            }
            Op::SetObjectKeys { obj, tuples, .. } => {
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert(
                    "tuples".to_string(),
                    Value::Array(
                        tuples
                            .iter()
                            .map(|(k, v)| {
                                Value::Array(vec![Value::String(k.clone()), ts_to_json(*v)])
                            })
                            .collect(),
                    ),
                );
            }
            Op::SetNumber { obj, value, .. } => {
                // Non-finite doubles have no JSON form and would not decode.
                if !value.is_finite() {
                    return Err(JsonCodecError::InvalidOperation);
                }
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert("value".to_string(), Value::from(*value));
            }
            Op::SetValue { obj, val, .. } => {
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert("value".to_string(), ts_to_json(*val));
            }
            Op::InsertStringSubstring {
                obj, after, data, ..
            } => {
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert("after".to_string(), ts_to_json(*after));
                row.insert("value".to_string(), Value::String(data.clone()));
            }
            Op::InsertBinaryData {
                obj, after, data, ..
            } => {
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert("after".to_string(), ts_to_json(*after));
                row.insert(
                    "value".to_string(),
                    Value::String(base64::engine::general_purpose::STANDARD.encode(data)),
                );
            }
            Op::InsertArrayElements {
                obj,
                after,
                elements,
                ..
            } => {
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert("after".to_string(), ts_to_json(*after));
                row.insert(
                    "values".to_string(),
                    Value::Array(elements.iter().map(|ts| ts_to_json(*ts)).collect()),
                );
            }
            Op::Delete { obj, what, .. } => {
                row.insert("obj".to_string(), ts_to_json(*obj));
                row.insert(
                    "what".to_string(),
                    Value::Array(
                        what.iter()
                            .map(|span| {
                                Value::Array(vec![
                                    Value::from(span.sid),
                                    Value::from(span.time),
                                    Value::from(span.span),
                                ])
                            })
                            .collect(),
                    ),
                );
            }
            Op::Noop { len, .. } => {
                if *len > 1 {
                    row.insert("len".to_string(), Value::from(*len));
                }
            }
        }
        rows.push(Value::Object(row));
    }

    root.insert("ops".to_string(), Value::Array(rows));
    Ok(Value::Object(root))
}

pub fn decode_patch_json(value: &Value) -> Result<Patch, JsonCodecError> {
    let root = value.as_object().ok_or(JsonCodecError::InvalidPayload)?;
    let id = json_to_ts(root.get("id").ok_or(JsonCodecError::InvalidPayload)?)
        .map_err(|_| JsonCodecError::InvalidPayload)?;
    let rows = root
        .get("ops")
        .and_then(Value::as_array)
        .ok_or(JsonCodecError::InvalidPayload)?;

    let mut ops = Vec::with_capacity(rows.len());
    let mut op_time = id.time;
    for row in rows {
        let obj = row.as_object().ok_or(JsonCodecError::InvalidOperation)?;
        let name = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or(JsonCodecError::InvalidOperation)?;
        let op_id = Timestamp {
            sid: id.sid,
            time: op_time,
        };
        let op = match name {
            "obj" => Op::MakeObject { id: op_id },
            "arr" => Op::MakeArray { id: op_id },
            "str" => Op::MakeString { id: op_id },
            "num" => Op::MakeNumber { id: op_id },
            "bin" => Op::MakeBinary { id: op_id },
            "tup" => Op::MakeTuple { id: op_id },
            "const" => {
                let value = if obj.get("timestamp").and_then(Value::as_bool) == Some(true) {
                    ConValue::Ref(json_to_ts(
                        obj.get("value").ok_or(JsonCodecError::InvalidOperation)?,
                    )?)
                } else {
                    match obj.get("value") {
                        Some(v) => ConValue::Json(v.clone()),
                        None => ConValue::Undef,
                    }
                };
                Op::MakeConstant { id: op_id, value }
            }
            "val" => Op::MakeValue {
                id: op_id,
                value: obj
                    .get("value")
                    .ok_or(JsonCodecError::InvalidOperation)?
                    .clone(),
            },
            "obj_set" => {
                let tuples = obj
                    .get("tuples")
                    .and_then(Value::as_array)
                    .ok_or(JsonCodecError::InvalidOperation)?
                    .iter()
                    .map(|t| {
                        let a = t.as_array().ok_or(JsonCodecError::InvalidOperation)?;
                        if a.len() != 2 {
                            return Err(JsonCodecError::InvalidOperation);
                        }
                        Ok((
                            a[0].as_str()
                                .ok_or(JsonCodecError::InvalidOperation)?
                                .to_string(),
                            json_to_ts(&a[1])?,
                        ))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if tuples.is_empty() {
                    return Err(JsonCodecError::InvalidOperation);
                }
                Op::SetObjectKeys {
                    id: op_id,
                    obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                    tuples,
                }
            }
            "num_set" => Op::SetNumber {
                id: op_id,
                obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                value: obj
                    .get("value")
                    .and_then(Value::as_f64)
                    .ok_or(JsonCodecError::InvalidOperation)?,
            },
            "val_set" => Op::SetValue {
                id: op_id,
                obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                val: json_to_ts(obj.get("value").ok_or(JsonCodecError::InvalidOperation)?)?,
            },
            // Legacy root form, kept readable for pre-rework patches.
            "root" => Op::SetValue {
                id: op_id,
                obj: ORIGIN,
                val: json_to_ts(obj.get("value").ok_or(JsonCodecError::InvalidOperation)?)?,
            },
            "str_ins" => Op::InsertStringSubstring {
                id: op_id,
                obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                after: json_to_ts(obj.get("after").ok_or(JsonCodecError::InvalidOperation)?)?,
                data: obj
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or(JsonCodecError::InvalidOperation)?
                    .to_string(),
            },
            "bin_ins" => Op::InsertBinaryData {
                id: op_id,
                obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                after: json_to_ts(obj.get("after").ok_or(JsonCodecError::InvalidOperation)?)?,
                data: base64::engine::general_purpose::STANDARD
                    .decode(
                        obj.get("value")
                            .and_then(Value::as_str)
                            .ok_or(JsonCodecError::InvalidOperation)?,
                    )
                    .map_err(|_| JsonCodecError::InvalidBase64)?,
            },
            "arr_ins" => {
                let elements = obj
                    .get("values")
                    .and_then(Value::as_array)
                    .ok_or(JsonCodecError::InvalidOperation)?
                    .iter()
                    .map(json_to_ts)
                    .collect::<Result<Vec<_>, _>>()?;
                if elements.is_empty() {
                    return Err(JsonCodecError::InvalidOperation);
                }
                Op::InsertArrayElements {
                    id: op_id,
                    obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                    after: json_to_ts(obj.get("after").ok_or(JsonCodecError::InvalidOperation)?)?,
                    elements,
                }
            }
            "del" => {
                let what = obj
                    .get("what")
                    .and_then(Value::as_array)
                    .ok_or(JsonCodecError::InvalidOperation)?
                    .iter()
                    .map(json_to_span)
                    .collect::<Result<Vec<_>, _>>()?;
                if what.is_empty() {
                    return Err(JsonCodecError::InvalidOperation);
                }
                Op::Delete {
                    id: op_id,
                    obj: json_to_ts(obj.get("obj").ok_or(JsonCodecError::InvalidOperation)?)?,
                    what,
                }
            }
            "noop" => Op::Noop {
                id: op_id,
                len: obj.get("len").and_then(Value::as_u64).unwrap_or(1),
            },
            other => return Err(JsonCodecError::UnknownOperation(other.to_string())),
        };
        op_time = op_time
            .checked_add(op.span())
            .ok_or(JsonCodecError::InvalidOperation)?;
        ops.push(op);
    }

    if ops.is_empty() {
        return Err(JsonCodecError::EmptyPatch);
    }
    Ok(Patch { ops })
}
