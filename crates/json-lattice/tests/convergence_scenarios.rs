//! Cross-replica scenarios: the same patch set must produce the same view on
//! every replica, for every delivery order, with duplicates tolerated.

use json_lattice::clock::ts;
use json_lattice::codec::{self, Format};
use json_lattice::{
    path, view, Document, DocumentEditor, Op, OpOutcome, Patch, SessionId, TaggedPayload,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};

fn sid(n: u8) -> SessionId {
    SessionId::from_bytes([n; 16])
}

/// The shared starting history every scenario builds on.
fn seed() -> Patch {
    let d = Document::new(sid(1));
    let mut b = d.new_patch_builder();
    let root = b.json(&json!({"text": "lattice", "list": [1, 2, 3], "kv": {}}));
    b.root(root);
    b.flush()
}

fn replica(n: u8, history: &[&Patch]) -> Document {
    let mut d = Document::new(sid(n));
    for patch in history {
        d.apply_patch(patch);
    }
    d
}

/// Run a batch of edits on a replica and hand back the patch for transport.
fn edit(doc: &mut Document, f: impl FnOnce(&mut DocumentEditor<'_>)) -> Patch {
    let mut ed = DocumentEditor::new(doc);
    f(&mut ed);
    ed.flush()
}

#[test]
fn all_delivery_orders_converge() {
    let seed = seed();
    let mut a = replica(2, &[&seed]);
    let mut b = replica(3, &[&seed]);
    let mut c = replica(4, &[&seed]);

    let pa = edit(&mut a, |ed| {
        ed.set_key("root.kv", "owner", &json!("a")).unwrap();
        ed.append_text("root.text", "!").unwrap();
    });
    let pb = edit(&mut b, |ed| {
        ed.push_element("root.list", &json!(4)).unwrap();
        ed.delete_key("root.kv", "owner").unwrap();
    });
    let pc = edit(&mut c, |ed| {
        ed.set("root.list[0]", &json!("one")).unwrap();
        ed.insert_text("root.text", 3, "-").unwrap();
    });

    let patches = [&pa, &pb, &pc];
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    let mut views = Vec::new();
    for order in orders {
        let mut d = replica(9, &[&seed]);
        for i in order {
            d.apply_patch(patches[i]);
        }
        views.push(d.view());
    }
    for view in &views[1..] {
        assert_eq!(view, &views[0]);
    }

    // the authors land on the same view once they exchange patches
    a.apply_patch(&pb);
    a.apply_patch(&pc);
    assert_eq!(a.view(), views[0]);
}

#[test]
fn duplicate_delivery_is_idempotent() {
    let seed = seed();
    let mut a = replica(2, &[&seed]);
    let pa = edit(&mut a, |ed| {
        ed.set_key("root.kv", "n", &json!(5)).unwrap();
        ed.append_text("root.text", "s").unwrap();
        ed.delete_element("root.list", 0).unwrap();
    });

    let mut d = replica(9, &[&seed]);
    d.apply_patch(&pa);
    let once = d.view();
    let second = d.apply_patch(&pa);
    assert_eq!(d.view(), once);
    assert!(second.outcomes.iter().all(|o| *o != OpOutcome::Applied));
    d.apply_patch(&seed);
    assert_eq!(d.view(), once);
}

#[test]
fn register_writes_are_last_writer_wins_in_both_orders() {
    let seed = seed();
    let mut a = replica(2, &[&seed]);
    let mut b = replica(3, &[&seed]);
    let num = path::resolve(&a, "root.list[0]").unwrap();

    // same counter on both sides; the session id breaks the tie
    let mut ba = a.new_patch_builder();
    ba.set(num, json!(100));
    let pa = ba.flush();
    let mut bb = b.new_patch_builder();
    bb.set(num, json!(200));
    let pb = bb.flush();

    a.apply_patch(&pa);
    a.apply_patch(&pb);
    b.apply_patch(&pb);
    b.apply_patch(&pa);
    assert_eq!(a.view()["list"][0], json!(200));
    assert_eq!(b.view()["list"][0], json!(200));

    // a lower-stamped write can never clobber the register
    let stale = Op::Set {
        id: ts(sid(9), 1),
        obj: num,
        value: json!(-1),
    };
    assert_eq!(a.apply_operation(&stale), OpOutcome::Stale);
    assert_eq!(a.view()["list"][0], json!(200));
}

#[test]
fn same_anchor_inserts_land_in_stamp_order_not_arrival_order() {
    let inventory_seed = {
        let d = Document::new(sid(1));
        let mut b = d.new_patch_builder();
        let root = b.json(&json!({"inventory": [], "note": ""}));
        b.root(root);
        b.flush()
    };
    let mut a = replica(2, &[&inventory_seed]);
    let mut b = replica(3, &[&inventory_seed]);

    let pa = edit(&mut a, |ed| {
        ed.push_element("root.inventory", &json!("sword")).unwrap();
        ed.insert_text("root.note", 0, "sword").unwrap();
    });
    let pb = edit(&mut b, |ed| {
        ed.push_element("root.inventory", &json!("shield")).unwrap();
        ed.insert_text("root.note", 0, "shield").unwrap();
    });

    a.apply_patch(&pb);
    b.apply_patch(&pa);
    assert_eq!(a.view(), b.view());
    // the greater stamp sits nearest the anchor on every replica
    assert_eq!(a.view()["inventory"], json!(["shield", "sword"]));
    assert_eq!(a.view()["note"], json!("shieldsword"));
}

#[test]
fn a_tombstoned_character_still_anchors_concurrent_inserts() {
    let text_seed = {
        let d = Document::new(sid(1));
        let mut b = d.new_patch_builder();
        let root = b.json(&json!({"text": "abc"}));
        b.root(root);
        b.flush()
    };
    let mut a = replica(2, &[&text_seed]);
    let mut b = replica(3, &[&text_seed]);

    let pa = edit(&mut a, |ed| ed.delete_text("root.text", 1, 1).unwrap());
    let pb = edit(&mut b, |ed| ed.insert_text("root.text", 2, "X").unwrap());

    a.apply_patch(&pb);
    b.apply_patch(&pa);
    // b anchored after the character a deleted; the tombstone still anchors
    assert_eq!(a.view()["text"], json!("aXc"));
    assert_eq!(b.view()["text"], json!("aXc"));
}

#[test]
fn editor_built_trees_resolve_by_path() {
    let mut d = Document::new(sid(1));
    {
        let mut ed = DocumentEditor::new(&mut d);
        ed.set("root", &json!({})).unwrap();
        ed.set_key("root", "title", &json!("fleet")).unwrap();
        ed.set_key("root", "users", &json!([{"name": "ada", "tags": ["ops"]}]))
            .unwrap();
        ed.push_element("root.users", &json!({"name": "bo", "tags": []}))
            .unwrap();
        ed.append_text("root.title", "-log").unwrap();
    }

    let cases: [(&str, Value); 6] = [
        ("root.title", json!("fleet-log")),
        ("root.users[0].name", json!("ada")),
        ("root.users[0].tags[0]", json!("ops")),
        ("root.users[1].name", json!("bo")),
        ("root.users[1].tags", json!([])),
        (
            "root.users",
            json!([{"name": "ada", "tags": ["ops"]}, {"name": "bo", "tags": []}]),
        ),
    ];
    for (path, want) in cases {
        let id = path::resolve(&d, path).unwrap();
        assert_eq!(view::view_of(&d, id).unwrap(), want, "{path}");
    }
}

#[test]
fn patches_survive_every_wire_format() {
    let seed = seed();
    let mut a = replica(2, &[&seed]);
    let pa = edit(&mut a, |ed| {
        ed.set_key("root.kv", "ship", &json!({"w": [1, "x"], "ok": true}))
            .unwrap();
        ed.append_text("root.text", " über-çafé").unwrap();
        ed.delete_element("root.list", 1).unwrap();
    });

    for format in Format::ALL {
        let bytes = codec::encode(&pa, format).unwrap();
        let back = codec::decode(&bytes, format).unwrap();
        assert_eq!(back.ops, pa.ops, "{format}");
        assert_eq!(back.meta, pa.meta, "{format}");

        let mut d = replica(9, &[&seed]);
        d.apply_patch(&back);
        assert_eq!(d.view(), a.view(), "{format}");

        let framed = TaggedPayload::new(&pa, format).unwrap().to_bytes();
        let payload = TaggedPayload::from_bytes(&framed).unwrap();
        assert_eq!(payload.format, format);
        assert_eq!(payload.patch().unwrap().ops, pa.ops, "{format}");
    }
}

#[test]
fn shuffled_bulk_delivery_converges() {
    let seed_patch = seed();

    // eight peers each contribute one independent patch on top of the seed
    let mut patches = Vec::new();
    for n in 10..18u8 {
        let mut peer = replica(n, &[&seed_patch]);
        patches.push(edit(&mut peer, |ed| {
            ed.set_key("root.kv", &format!("k{n}"), &json!(n)).unwrap();
            ed.push_element("root.list", &json!(n)).unwrap();
            ed.insert_text("root.text", 0, &format!("{n}-")).unwrap();
        }));
    }

    let mut reference = replica(9, &[&seed_patch]);
    for patch in &patches {
        reference.apply_patch(patch);
    }
    let expected = reference.view();

    for rng_seed in [1u64, 7, 42, 0xBEEF] {
        let mut rng = StdRng::seed_from_u64(rng_seed);
        let mut order: Vec<usize> = (0..patches.len()).collect();
        order.shuffle(&mut rng);
        let mut d = replica(9, &[&seed_patch]);
        for i in order {
            d.apply_patch(&patches[i]);
        }
        assert_eq!(d.view(), expected, "seed {rng_seed}");
    }
}

// ── Random scripts ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    SetKey(u8, i64),
    DelKey(u8),
    InsText(u8, String),
    DelText(u8, u8),
    InsElem(u8, i64),
    DelElem(u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..8, -50i64..50).prop_map(|(k, v)| Step::SetKey(k, v)),
        (0u8..8).prop_map(Step::DelKey),
        (0u8..16, "[a-z]{1,4}").prop_map(|(o, s)| Step::InsText(o, s)),
        (0u8..16, 1u8..4).prop_map(|(o, n)| Step::DelText(o, n)),
        (0u8..16, -9i64..9).prop_map(|(i, v)| Step::InsElem(i, v)),
        (0u8..16).prop_map(Step::DelElem),
    ]
}

fn text_len(ed: &DocumentEditor<'_>) -> usize {
    ed.get("root.text")
        .ok()
        .and_then(|v| v.as_str().map(|s| s.chars().count()))
        .unwrap_or(0)
}

fn list_len(ed: &DocumentEditor<'_>) -> usize {
    ed.get("root.list")
        .ok()
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or(0)
}

fn run_step(ed: &mut DocumentEditor<'_>, step: &Step) {
    match step {
        Step::SetKey(k, v) => ed
            .set_key("root.kv", &format!("k{}", *k % 4), &json!(v))
            .unwrap(),
        Step::DelKey(k) => ed.delete_key("root.kv", &format!("k{}", *k % 4)).unwrap(),
        Step::InsText(offset, text) => {
            let at = *offset as usize % (text_len(ed) + 1);
            ed.insert_text("root.text", at, text).unwrap();
        }
        Step::DelText(offset, span) => {
            let len = text_len(ed);
            if len == 0 {
                return;
            }
            let at = *offset as usize % len;
            let span = (*span as usize).min(len - at);
            ed.delete_text("root.text", at, span).unwrap();
        }
        Step::InsElem(index, v) => {
            let at = *index as usize % (list_len(ed) + 1);
            ed.insert_element("root.list", at, &json!(v)).unwrap();
        }
        Step::DelElem(index) => {
            let len = list_len(ed);
            if len == 0 {
                return;
            }
            ed.delete_element("root.list", *index as usize % len).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn concurrent_random_scripts_converge(
        script_a in proptest::collection::vec(step_strategy(), 0..10),
        script_b in proptest::collection::vec(step_strategy(), 0..10),
    ) {
        let seed = seed();
        let mut a = replica(2, &[&seed]);
        let mut b = replica(3, &[&seed]);

        let pa = edit(&mut a, |ed| {
            for step in &script_a {
                run_step(ed, step);
            }
        });
        let pb = edit(&mut b, |ed| {
            for step in &script_b {
                run_step(ed, step);
            }
        });

        a.apply_patch(&pb);
        b.apply_patch(&pa);
        prop_assert_eq!(a.view(), b.view());

        // re-delivery changes nothing
        let settled = a.view();
        a.apply_patch(&pa);
        a.apply_patch(&pb);
        prop_assert_eq!(a.view(), settled);
    }
}
