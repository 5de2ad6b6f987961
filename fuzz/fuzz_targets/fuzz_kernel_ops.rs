#![no_main]

use arbitrary::Arbitrary;
use frel_runtime::{
    ClosureId, MetadataRegistry, NodeId, Runtime, RuntimeConfig, Selector, Value,
};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum FuzzValue {
    Null,
    Bool(bool),
    Int(i8),
    Str(u8),
}

impl FuzzValue {
    fn to_value(&self) -> Value {
        match self {
            FuzzValue::Null => Value::Null,
            FuzzValue::Bool(b) => Value::Bool(*b),
            FuzzValue::Int(i) => Value::Int(i64::from(*i)),
            FuzzValue::Str(s) => Value::Str(format!("s{}", s % 4)),
        }
    }
}

#[derive(Arbitrary, Debug)]
enum FuzzSelector {
    Everything,
    Structural,
    Carried,
    Key(u8),
}

impl FuzzSelector {
    fn to_selector(&self) -> Selector {
        match self {
            FuzzSelector::Everything => Selector::Everything,
            FuzzSelector::Structural => Selector::Structural,
            FuzzSelector::Carried => Selector::Carried,
            FuzzSelector::Key(k) => Selector::key(field(*k)),
        }
    }
}

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Closure { parent: Option<u8> },
    Datum { owner: Option<u8> },
    Collection { owner: Option<u8>, len: u8 },
    Subscribe { source: u8, target: u8, selector: FuzzSelector, echo: bool },
    Unsubscribe { index: u8 },
    Set { node: u8, field: u8, value: FuzzValue },
    SetItems { node: u8, len: u8 },
    PushItem { node: u8, value: FuzzValue },
    RemoveItem { node: u8, index: u8 },
    DestroyClosure { index: u8 },
    DestroyDatum { node: u8 },
    Drain,
}

fn field(k: u8) -> &'static str {
    ["a", "b", "c", "d"][usize::from(k % 4)]
}

fn pick<T: Copy>(items: &[T], index: u8) -> Option<T> {
    (!items.is_empty()).then(|| items[usize::from(index) % items.len()])
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let config = RuntimeConfig::default().with_gen_limit(64);
    let mut rt = Runtime::with_config(MetadataRegistry::new(), config);
    let mut closures: Vec<ClosureId> = Vec::new();
    let mut nodes: Vec<NodeId> = Vec::new();
    let mut subs = Vec::new();

    for op in ops.iter().take(512) {
        match op {
            FuzzOp::Closure { parent } => {
                let parent = parent.and_then(|p| pick(&closures, p));
                if let Ok(id) = rt.create_closure("F", parent) {
                    closures.push(id);
                    nodes.push(id.into());
                }
            }
            FuzzOp::Datum { owner } => {
                let owner = owner.and_then(|o| pick(&closures, o));
                if let Ok(id) = rt.create_datum::<&str, _>("R", [], owner) {
                    nodes.push(id.into());
                }
            }
            FuzzOp::Collection { owner, len } => {
                let owner = owner.and_then(|o| pick(&closures, o));
                let items = (0..i64::from(*len % 8)).map(Value::Int);
                if let Ok(id) = rt.create_collection("L", items, owner) {
                    nodes.push(id.into());
                }
            }
            FuzzOp::Subscribe { source, target, selector, echo } => {
                let (Some(source), Some(target)) = (pick(&nodes, *source), pick(&nodes, *target))
                else {
                    continue;
                };
                let echo = *echo;
                let result = rt.subscribe(source, target, selector.to_selector(), move |rt, n| {
                    if echo {
                        let v = rt.get(n.source, "a").unwrap_or_default();
                        let _ = rt.set(n.target, "a", v);
                    }
                    Ok(())
                });
                if let Ok(id) = result {
                    subs.push(id);
                }
            }
            FuzzOp::Unsubscribe { index } => {
                if let Some(id) = pick(&subs, *index) {
                    rt.unsubscribe(id);
                }
            }
            FuzzOp::Set { node, field: f, value } => {
                if let Some(node) = pick(&nodes, *node) {
                    let _ = rt.set(node, field(*f), value.to_value());
                }
            }
            FuzzOp::SetItems { node, len } => {
                if let Some(id) = pick(&nodes, *node).and_then(NodeId::as_datum) {
                    let _ = rt.set_items(id, (0..i64::from(*len % 8)).map(Value::Int).collect());
                }
            }
            FuzzOp::PushItem { node, value } => {
                if let Some(id) = pick(&nodes, *node).and_then(NodeId::as_datum) {
                    let _ = rt.push_item(id, value.to_value());
                }
            }
            FuzzOp::RemoveItem { node, index } => {
                if let Some(id) = pick(&nodes, *node).and_then(NodeId::as_datum) {
                    let _ = rt.remove_item(id, usize::from(*index));
                }
            }
            FuzzOp::DestroyClosure { index } => {
                if let Some(id) = pick(&closures, *index) {
                    let _ = rt.destroy_closure(id);
                }
            }
            FuzzOp::DestroyDatum { node } => {
                if let Some(id) = pick(&nodes, *node).and_then(NodeId::as_datum) {
                    let _ = rt.destroy_datum(id);
                }
            }
            FuzzOp::Drain => {
                let _ = rt.drain();
            }
        }

        for sub in rt.subscriptions() {
            assert!(rt.contains(sub.source), "dangling source on {:?}", sub.id);
            assert!(rt.contains(sub.target), "dangling target on {:?}", sub.id);
        }
    }

    let _ = rt.drain();
    for root in rt.roots() {
        let _ = rt.destroy_closure(root);
    }
    assert_eq!(rt.closure_count(), 0);
    assert!(rt.snapshot().datums.values().all(|d| d.owner.is_none()));
});
