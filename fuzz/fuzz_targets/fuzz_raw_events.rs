#![no_main]

use arbitrary::Arbitrary;
use frel_runtime::{Availability, Event, MetadataRegistry, Runtime, Value};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum FuzzEvent {
    Set { node: u64, field: u8, value: i16 },
    SetItems { datum: u64, len: u8 },
    SetAvailability { datum: u64, state: u8 },
    SetError { datum: u64 },
}

impl FuzzEvent {
    fn into_event(self) -> Event {
        match self {
            FuzzEvent::Set { node, field, value } => Event::Set {
                node: node % 16,
                field: format!("f{}", field % 4),
                value: Value::Int(i64::from(value)),
            },
            FuzzEvent::SetItems { datum, len } => Event::SetItems {
                datum: datum % 16,
                items: (0..i64::from(len % 8)).map(Value::Int).collect(),
            },
            FuzzEvent::SetAvailability { datum, state } => Event::SetAvailability {
                datum: datum % 16,
                availability: match state % 3 {
                    0 => Availability::Loading,
                    1 => Availability::Ready,
                    _ => Availability::Error,
                },
            },
            FuzzEvent::SetError { datum } => Event::SetError {
                datum: datum % 16,
                payload: Value::from("fuzz"),
            },
        }
    }
}

fuzz_target!(|events: Vec<FuzzEvent>| {
    let mut rt = Runtime::new(MetadataRegistry::new());
    let root = rt.create_closure("Root", None).ok();
    for i in 0..4 {
        let _ = rt.create_datum("R", [("f0", Value::Int(i))], root);
        let _ = rt.create_collection("L", [Value::Int(i)], root);
    }

    let total = events.len().min(256);
    for event in events.into_iter().take(256) {
        rt.put_event(event.into_event());
    }
    if let Ok(report) = rt.drain_events() {
        assert_eq!(report.events_applied + report.events_rejected, total);
    }
});
