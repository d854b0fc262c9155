//! End-to-end tests across the storage, layout and transform layers.

use largetext::{
    ChangeEvent, ChangeListener, ChunkConfig, ChunkStore, FixedWidthMeasurer, LayoutEngine,
    MutableText, TextSource, TransformLayer, VariableHighlighter,
};
use proptest::prelude::*;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

fn store(text: &str, chunk_size: usize) -> ChunkStore {
    ChunkStore::from_text(text, ChunkConfig::new(chunk_size))
}

#[test]
fn editing_a_request_template_end_to_end() {
    let mut layer = TransformLayer::new(store("GET /status HTTP/1.1\nHost: example.com\n", 16));
    layer.attach(Box::new(VariableHighlighter::new()));
    layer.set_layouter(Box::new(FixedWidthMeasurer(1)), 24);

    // type a variable reference into the host header
    let insert_at = "GET /status HTTP/1.1\nHost: ".chars().count();
    layer.insert(insert_at, "${{env}}.").unwrap();
    assert_eq!(
        layer.build_string(),
        "GET /status HTTP/1.1\nHost: <env>.example.com\n"
    );
    assert_eq!(
        layer.inner().build_string(),
        "GET /status HTTP/1.1\nHost: ${{env}}.example.com\n"
    );

    // the layout over the transformed text matches a from-scratch pass
    let rows = layer.layout().map(|l| l.rows().to_vec()).unwrap_or_default();
    let mut fresh = LayoutEngine::new(Box::new(FixedWidthMeasurer(1)), 24);
    fresh.layout_all(&layer);
    assert_eq!(rows, fresh.rows());

    // rows tile the transformed text exactly
    let mut covered = 0;
    for row in &rows {
        assert_eq!(row.start, covered);
        covered = row.end;
    }
    assert_eq!(covered, layer.len());

    // removing the closing braces reverts the decoration
    let close = layer.inner().build_string().find("}}").map(|b| {
        layer.inner().build_string()[..b].chars().count()
    });
    let close = match close {
        Some(c) => c,
        None => panic!("closing delimiter missing"),
    };
    layer.delete(close..close + 2).unwrap();
    assert_eq!(
        layer.build_string(),
        "GET /status HTTP/1.1\nHost: ${{env.example.com\n"
    );
    let mut fresh = LayoutEngine::new(Box::new(FixedWidthMeasurer(1)), 24);
    fresh.layout_all(&layer);
    assert_eq!(layer.layout().map(|l| l.rows().to_vec()), Some(fresh.rows().to_vec()));
}

#[test]
fn snapshots_serve_concurrent_readers_during_edits() {
    let mut s = store(&"lorem ipsum dolor sit amet ".repeat(40), 32);
    let snap = s.snapshot();
    let expected = s.build_string();

    let (tx, rx) = mpsc::channel();
    let reader = std::thread::spawn(move || {
        let mut sums = Vec::new();
        for i in 0..10 {
            let slice = snap.substring(i * 20..i * 20 + 20);
            sums.push(slice);
        }
        tx.send((snap.build_string(), sums)).ok();
    });

    // keep mutating while the reader works on its snapshot
    for i in 0..50 {
        s.insert((i * 7) % (s.len() + 1), "EDIT").unwrap();
        s.delete(0..2).unwrap();
    }

    let (seen, sums) = rx.recv().expect("reader finished");
    reader.join().expect("reader thread");
    assert_eq!(seen, expected);
    for (i, slice) in sums.into_iter().enumerate() {
        assert_eq!(slice.unwrap(), expected.chars().skip(i * 20).take(20).collect::<String>());
    }
}

#[test]
fn listeners_observe_every_layer_edit_in_order() {
    struct Recorder(Arc<Mutex<Vec<ChangeEvent>>>);
    impl ChangeListener for Recorder {
        fn on_text_change(&mut self, event: &ChangeEvent, _: &dyn TextSource) {
            if let Ok(mut log) = self.0.lock() {
                log.push(*event);
            }
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut inner = store("abcdef", 4);
    inner.add_listener(Box::new(Recorder(Arc::clone(&log))));
    let mut layer = TransformLayer::new(inner);

    layer.insert(3, "123").unwrap();
    layer.delete(0..2).unwrap();
    layer.transform_insert(2, "##").unwrap(); // span only, no buffer event

    let log = log.lock().expect("log");
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], ChangeEvent::insert(3..6));
    assert_eq!(log[1], ChangeEvent::delete(0..2));
}

#[test]
fn line_index_and_layout_stay_consistent_over_bulk_edits() {
    let mut s = store("", 8);
    s.set_layouter(Box::new(FixedWidthMeasurer(1)), 12);
    for i in 0..40 {
        let line = format!("line number {i}\n");
        let at = s.len();
        s.insert(at, &line).unwrap();
    }
    assert_eq!(s.line_count(), 41);
    for line in 0..40 {
        let start = s.offset_of_line(line).unwrap();
        assert_eq!(s.line_of_offset(start).unwrap(), line);
    }
    let mut fresh = LayoutEngine::new(Box::new(FixedWidthMeasurer(1)), 12);
    fresh.layout_all(&s);
    assert_eq!(s.layout().map(|l| l.rows().to_vec()), Some(fresh.rows().to_vec()));

    // collapse most of it again
    let end = s.offset_of_line(35).unwrap();
    s.delete(3..end).unwrap();
    assert_eq!(s.line_count(), 6);
    let mut fresh = LayoutEngine::new(Box::new(FixedWidthMeasurer(1)), 12);
    fresh.layout_all(&s);
    assert_eq!(s.layout().map(|l| l.rows().to_vec()), Some(fresh.rows().to_vec()));
}

proptest! {
    // The full stack under random edits: the wrapped buffer matches a
    // shadow string, and the incrementally maintained layout over the
    // transformed text matches a from-scratch pass.
    #[test]
    fn full_stack_random_edit_session(
        seed in "[a-z $\\{\\}\\n]{0,40}",
        width in 3u32..12,
        chunk_size in prop::sample::select(vec![4usize, 16, 64]),
        ops in prop::collection::vec(
            (any::<bool>(), 0usize..=80, "[a-z$\\{\\}\\n]{0,10}", 0usize..=10),
            1..20,
        ),
    ) {
        let mut layer = TransformLayer::new(store(&seed, chunk_size));
        layer.attach(Box::new(VariableHighlighter::new()));
        layer.set_layouter(Box::new(FixedWidthMeasurer(1)), width);
        let mut shadow: Vec<char> = seed.chars().collect();

        for (is_insert, pos, text, del_len) in ops {
            if is_insert {
                let pos = pos % (shadow.len() + 1);
                layer.insert(pos, &text).unwrap();
                let tail: Vec<char> = shadow.split_off(pos);
                shadow.extend(text.chars());
                shadow.extend(tail);
            } else if !shadow.is_empty() {
                let start = pos % shadow.len();
                let end = (start + del_len).min(shadow.len());
                layer.delete(start..end).unwrap();
                shadow.drain(start..end);
            }
            let expected: String = shadow.iter().collect();
            prop_assert_eq!(layer.inner().build_string(), expected);
            prop_assert_eq!(layer.build_string().chars().count(), layer.len());

            let rows = layer.layout().map(|l| l.rows().to_vec()).unwrap_or_default();
            let mut fresh = LayoutEngine::new(Box::new(FixedWidthMeasurer(1)), width);
            fresh.layout_all(&layer);
            prop_assert_eq!(rows, fresh.rows().to_vec());
        }
    }
}
