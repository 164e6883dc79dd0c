use json_crdt_patch::clock::{Clock, LogicalClock};
use json_crdt_patch::op::{Timespan, Timestamp};
use json_crdt_patch::patch_builder::PatchBuilder;
use json_crdt_patch::patch_compact_binary_codec::{
    decode_patch_compact_binary, encode_patch_compact_binary,
};
use json_crdt_patch::patch_compact_codec::{decode_patch_compact, encode_patch_compact};
use json_crdt_patch::patch_json_codec::{decode_patch_json, encode_patch_json};
use json_crdt_patch::patch_binary_codec::{decode_patch_binary, encode_patch_binary};
use json_crdt_patch::MIN_SESSION_ID;
use serde_json::Value;

#[test]
fn property_patch_codec_roundtrips_hold_for_seeded_patches() {
    for (i, seed) in seeds().iter().enumerate() {
        let sid = MIN_SESSION_ID + 92_000 + i as u64;
        let mut rng = Lcg::new(*seed);
        let start = rng.range(1000);
        let mut clock = LogicalClock::new(sid, start);
        let patch = random_patch(&mut rng, &mut clock);

        // Builder output covers its id range with no gaps.
        let id = patch.get_id().expect("non-empty patch");
        assert_eq!(
            patch.next_time() - id.time,
            patch.span(),
            "span invariant mismatch seed={seed}"
        );
        assert_eq!(
            patch.next_time(),
            clock.time(),
            "clock sync mismatch seed={seed}"
        );

        let verbose = encode_patch_json(&patch).expect("verbose encode must succeed");
        assert_eq!(
            decode_patch_json(&verbose).expect("verbose decode must succeed"),
            patch,
            "verbose roundtrip mismatch seed={seed}"
        );

        let compact = encode_patch_compact(&patch).expect("compact encode must succeed");
        assert_eq!(
            decode_patch_compact(&compact).expect("compact decode must succeed"),
            patch,
            "compact roundtrip mismatch seed={seed}"
        );

        let compact_binary =
            encode_patch_compact_binary(&patch).expect("compact-binary encode must succeed");
        assert_eq!(
            decode_patch_compact_binary(&compact_binary)
                .expect("compact-binary decode must succeed"),
            patch,
            "compact-binary roundtrip mismatch seed={seed}"
        );

        let binary = encode_patch_binary(&patch).expect("binary encode must succeed");
        assert_eq!(
            decode_patch_binary(&binary).expect("binary decode must succeed"),
            patch,
            "binary roundtrip mismatch seed={seed}"
        );
    }
}

fn seeds() -> [u64; 20] {
    [
        0x5eed_c0de_u64,
        0x0000_0000_0000_0001_u64,
        0x0000_0000_0000_00ff_u64,
        0x0000_0000_00c0_ffee_u64,
        0x0123_4567_89ab_cdef_u64,
        0x0000_0000_0000_1001_u64,
        0x0000_0000_0000_2002_u64,
        0x0000_0000_0000_3003_u64,
        0x0000_0000_0000_4004_u64,
        0x0000_0000_0000_5005_u64,
        0x1111_2222_3333_4444_u64,
        0x2222_3333_4444_5555_u64,
        0x3333_4444_5555_6666_u64,
        0x4444_5555_6666_7777_u64,
        0x5555_6666_7777_8888_u64,
        0x89ab_cdef_0123_4567_u64,
        0xfedc_ba98_7654_3210_u64,
        0x1357_9bdf_2468_ace0_u64,
        0x0f0f_f0f0_55aa_aa55_u64,
        0xa5a5_5a5a_dead_beef_u64,
    ]
}

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    fn range(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next_u64() % n
        }
    }
}

fn random_scalar(rng: &mut Lcg) -> Value {
    match rng.range(5) {
        0 => Value::Null,
        1 => Value::Bool(rng.range(2) == 1),
        2 => Value::Number(serde_json::Number::from((rng.range(50) as i64) - 10)),
        3 => Value::String(format!("s{}", rng.range(100))),
        _ => Value::String("".to_string()),
    }
}

fn random_value(rng: &mut Lcg, depth: usize) -> Value {
    if depth == 0 {
        return random_scalar(rng);
    }
    match rng.range(4) {
        0 => random_scalar(rng),
        1 => {
            let len = rng.range(4) as usize;
            let mut arr = Vec::with_capacity(len);
            for _ in 0..len {
                arr.push(random_value(rng, depth - 1));
            }
            Value::Array(arr)
        }
        _ => random_object(rng, depth - 1),
    }
}

fn random_object(rng: &mut Lcg, depth: usize) -> Value {
    let len = (1 + rng.range(4)) as usize;
    let mut map = serde_json::Map::new();
    for i in 0..len {
        map.insert(format!("k{}", i), random_value(rng, depth));
    }
    Value::Object(map)
}

fn random_patch(rng: &mut Lcg, clock: &mut LogicalClock) -> json_crdt_patch::patch::Patch {
    let mut builder = PatchBuilder::new();
    let doc = random_object(rng, 3);
    let root = builder.json(clock, &doc).expect("compile must succeed");
    builder.root(clock, root);

    // A handful of follow-up edits against the freshly built nodes plus a
    // couple of deliberately foreign anchors.
    let edits = 1 + rng.range(5);
    for _ in 0..edits {
        match rng.range(6) {
            0 => {
                let s = builder.str(clock);
                builder
                    .ins_str(clock, s, s, &format!("e{}", rng.range(1000)))
                    .expect("non-empty insert");
            }
            1 => {
                let n = builder.num(clock);
                builder.set_num(clock, n, rng.range(10_000) as f64 / 8.0);
            }
            2 => {
                let b = builder.bin(clock);
                let len = (1 + rng.range(6)) as usize;
                let mut data = Vec::with_capacity(len);
                for _ in 0..len {
                    data.push(rng.range(256) as u8);
                }
                builder.ins_bin(clock, b, b, data).expect("non-empty insert");
            }
            3 => {
                let foreign_sid = 3 + rng.range(5);
                builder
                    .del(
                        clock,
                        Timestamp {
                            sid: foreign_sid,
                            time: rng.range(100),
                        },
                        vec![
                            Timespan::new(foreign_sid, rng.range(100), 1 + rng.range(9)),
                            Timespan::new(clock.sid(), rng.range(20), 1 + rng.range(3)),
                        ],
                    )
                    .expect("non-empty delete");
            }
            4 => {
                builder.noop(clock, 1 + rng.range(300)).expect("positive noop");
            }
            _ => {
                let a = builder.arr(clock);
                builder
                    .ins_arr(clock, a, a, vec![root])
                    .expect("non-empty insert");
            }
        }
    }
    builder.flush()
}
