//! JSON CRDT patch primitives.
//!
//! This crate covers the authoring side of a JSON CRDT document: logical
//! clocks that mint globally unique operation ids, the operation set itself,
//! a [`patch_builder::PatchBuilder`] that compiles high-level edits into a
//! [`patch::Patch`], and four interoperable wire codecs (JSON, compact,
//! compact-binary, and binary).

pub mod clock;
pub mod op;
pub mod patch;
pub mod patch_builder;

pub mod patch_binary_codec;
pub mod patch_compact_binary_codec;
pub mod patch_compact_codec;
pub mod patch_json_codec;

use rand::Rng;

use crate::op::Timestamp;

/// Reserved session for well-known singleton ids.
pub const SESSION_SYSTEM: u64 = 0;

/// Reserved session for the central server clock.
pub const SESSION_SERVER: u64 = 1;

/// Minimum valid session id for peer logical clocks.
pub const MIN_SESSION_ID: u64 = 65_536;

/// Root register of a document.
pub const ORIGIN: Timestamp = Timestamp {
    sid: SESSION_SYSTEM,
    time: 0,
};

/// Pre-interned `null` constant.
pub const NULL_ID: Timestamp = Timestamp {
    sid: SESSION_SYSTEM,
    time: 1,
};

/// Pre-interned `true` constant.
pub const TRUE_ID: Timestamp = Timestamp {
    sid: SESSION_SYSTEM,
    time: 2,
};

/// Pre-interned `false` constant.
pub const FALSE_ID: Timestamp = Timestamp {
    sid: SESSION_SYSTEM,
    time: 3,
};

/// Pre-interned `undefined` constant.
pub const UNDEFINED_ID: Timestamp = Timestamp {
    sid: SESSION_SYSTEM,
    time: 4,
};

/// Returns `true` when the provided session id is valid for a peer clock.
pub fn is_valid_session_id(sid: u64) -> bool {
    sid >= MIN_SESSION_ID
}

/// Generates a random session id for a new peer clock.
pub fn generate_session_id() -> u64 {
    let mut rng = rand::thread_rng();
    rng.gen_range(MIN_SESSION_ID..=i64::MAX as u64)
}

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
