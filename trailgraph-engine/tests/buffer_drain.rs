//! Drains racing with writers must neither lose nor duplicate records

use chrono::Utc;
use std::collections::HashSet;
use std::thread;
use trailgraph_core::*;
use trailgraph_engine::*;

fn record(writer: usize, seq: usize) -> BufferedRecord {
    let payload = EventPayload {
        post_urn: format!("urn:{}:{}", writer, seq),
        action: "visit".to_string(),
        author_slug: "ada".to_string(),
        ..Default::default()
    };
    BufferedRecord::Event(payload.stamp(UserId::new(writer as u64), Utc::now()).unwrap())
}

fn urn(entry: &DrainedEntry) -> String {
    match entry.decode().unwrap() {
        BufferedRecord::Event(event) => event.post_urn,
        other => panic!("unexpected record {other:?}"),
    }
}

#[test]
fn concurrent_enqueue_and_drain_loses_nothing() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 100;

    let (engine, _temp) = StorageEngine::temp().unwrap();
    let buffer = engine.event_buffer().unwrap();

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for seq in 0..PER_WRITER {
                    buffer.enqueue(&record(w, seq)).unwrap();
                }
            })
        })
        .collect();

    let mut seen = Vec::new();
    while writers.iter().any(|w| !w.is_finished()) {
        seen.extend(buffer.drain(Some(25)).unwrap().iter().map(urn));
    }
    for writer in writers {
        writer.join().unwrap();
    }
    seen.extend(buffer.drain(None).unwrap().iter().map(urn));

    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(seen.len(), WRITERS * PER_WRITER);
    assert_eq!(unique.len(), WRITERS * PER_WRITER);
    assert!(buffer.is_empty().unwrap());
}

#[test]
fn per_writer_order_is_preserved() {
    let (engine, _temp) = StorageEngine::temp().unwrap();
    let buffer = engine.event_buffer().unwrap();

    for seq in 0..20 {
        buffer.enqueue(&record(0, seq)).unwrap();
    }
    let mut drained = buffer.drain(Some(7)).unwrap();
    drained.extend(buffer.drain(None).unwrap());

    let ids: Vec<_> = drained.iter().map(|e| e.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert_eq!(urn(&drained[0]), "urn:0:0");
    assert_eq!(urn(&drained[19]), "urn:0:19");
}

#[test]
fn buffer_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    {
        let engine = StorageEngine::new(temp.path()).unwrap();
        let buffer = engine.event_buffer().unwrap();
        buffer.enqueue_all(&[record(1, 0), record(1, 1)]).unwrap();
    }

    let engine = StorageEngine::new(temp.path()).unwrap();
    let drained = engine.event_buffer().unwrap().drain(None).unwrap();
    assert_eq!(drained.len(), 2);
}
