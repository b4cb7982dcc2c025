//! Unit tests for the incremental JSON object framer.

use bytes::BytesMut;
use serde_json::{json, Value};
use tokio_util::codec::Decoder;

use pdal_session::protocol::Payload;
use pdal_session::worker::framer::ObjectFramer;
use pdal_session::AppError;

fn object(v: Value) -> Payload {
    match v {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Feed `chunks` one at a time, collecting every object decoded along the way.
fn feed(framer: &mut ObjectFramer, chunks: &[&str]) -> Vec<Payload> {
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk.as_bytes());
        while let Some(map) = framer.decode(&mut buf).expect("decode must not fail") {
            out.push(map);
        }
    }
    out
}

#[test]
fn single_object_is_decoded() {
    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &["{\"ready\":1}"]);
    assert_eq!(out, vec![object(json!({"ready": 1}))]);
}

#[test]
fn object_split_across_chunks_is_reassembled() {
    let mut framer = ObjectFramer::default();
    let mut buf = BytesMut::from("{\"rea");

    assert!(
        framer.decode(&mut buf).unwrap().is_none(),
        "partial object must not be emitted"
    );
    assert!(framer.is_mid_value());

    buf.extend_from_slice(b"dy\":1}");
    let map = framer.decode(&mut buf).unwrap().expect("object after second chunk");
    assert_eq!(map, object(json!({"ready": 1})));
    assert!(framer.decode(&mut buf).unwrap().is_none(), "exactly one object");
}

#[test]
fn byte_at_a_time_delivery_yields_one_object() {
    let raw = r#"{"status":1,"nested":{"list":[1,{"x":"}"}]},"count":42}"#;
    let chunks: Vec<String> = raw.chars().map(String::from).collect();
    let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();

    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &chunk_refs);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("count"), Some(&json!(42)));
}

#[test]
fn several_objects_in_one_chunk_are_each_decoded() {
    let mut framer = ObjectFramer::default();
    let out = feed(
        &mut framer,
        &["{\"ready\":1}{\"status\":1,\"count\":7}\n{\"status\":0}\n"],
    );
    assert_eq!(out.len(), 3);
    assert_eq!(out[1].get("count"), Some(&json!(7)));
}

#[test]
fn newlines_inside_objects_are_not_delimiters() {
    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &["{\n  \"status\": 1,\n  \"valid\": false\n}\n"]);
    assert_eq!(out, vec![object(json!({"status": 1, "valid": false}))]);
}

#[test]
fn braces_inside_strings_do_not_affect_nesting() {
    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &[r#"{"desc":"{ [ unbalanced","status":1}"#]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("desc"), Some(&json!("{ [ unbalanced")));
}

#[test]
fn escaped_quotes_keep_string_state() {
    let mut framer = ObjectFramer::default();
    let out = feed(
        &mut framer,
        &[r#"{"desc":"say \"}\" please","#, r#""tail":"\\"}"#],
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("desc"), Some(&json!("say \"}\" please")));
    assert_eq!(out[0].get("tail"), Some(&json!("\\")));
}

#[test]
fn escape_split_across_chunks_is_honoured() {
    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &[r#"{"a":"x\"#, r#""}"}"#]);
    assert_eq!(out, vec![object(json!({"a": "x\"}"}))]);
}

#[test]
fn non_object_top_level_values_are_discarded() {
    let mut framer = ObjectFramer::default();
    let out = feed(
        &mut framer,
        &[
            "42 ",
            "[1, 2, {\"status\":1}]",
            " \"text with { brace\" ",
            "true null -3.5e2 ",
            "{\"status\":1,\"count\":5}",
        ],
    );
    assert_eq!(out, vec![object(json!({"status": 1, "count": 5}))]);
}

#[test]
fn leading_log_text_is_skipped() {
    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &["starting worker...\n", "{\"ready\":1}\n"]);
    assert_eq!(out, vec![object(json!({"ready": 1}))]);
}

#[test]
fn malformed_object_is_skipped_and_framing_continues() {
    let mut framer = ObjectFramer::default();
    let out = feed(&mut framer, &["{\"a\":}", "{\"status\":1}"]);
    assert_eq!(out, vec![object(json!({"status": 1}))]);
}

#[test]
fn oversized_incomplete_value_returns_framing_error() {
    let mut framer = ObjectFramer::new(Some(16));
    let mut buf = BytesMut::from("{\"payload\":\"0123456789abcdef");

    match framer.decode(&mut buf) {
        Err(AppError::Framing(msg)) => assert!(msg.contains("16 byte limit"), "got: {msg}"),
        other => panic!("expected framing error, got {other:?}"),
    }
    assert!(buf.is_empty(), "buffer must be discarded after overflow");
    assert!(!framer.is_mid_value(), "state must reset after overflow");

    buf.extend_from_slice(b"{\"ok\":1}");
    assert!(framer.decode(&mut buf).unwrap().is_some());
}

#[test]
fn oversized_complete_value_returns_framing_error() {
    let mut framer = ObjectFramer::new(Some(8));
    let mut buf = BytesMut::from("{\"status\":1,\"count\":123}");
    assert!(matches!(framer.decode(&mut buf), Err(AppError::Framing(_))));
}

#[test]
fn unbounded_framer_buffers_large_values() {
    let mut framer = ObjectFramer::new(None);
    let big = format!("{{\"status\":1,\"blob\":\"{}\"}}", "x".repeat(1 << 20));
    let (head, tail) = big.split_at(big.len() / 2);
    let out = feed(&mut framer, &[head, tail]);
    assert_eq!(out.len(), 1);
}

#[test]
fn eof_drops_incomplete_value_without_error() {
    let mut framer = ObjectFramer::default();
    let mut buf = BytesMut::from("{\"status\":1} {\"count\":");

    let first = framer.decode_eof(&mut buf).unwrap();
    assert!(first.is_some(), "complete object must still be yielded at eof");

    let second = framer.decode_eof(&mut buf).unwrap();
    assert!(second.is_none());
    assert!(buf.is_empty());
}

#[test]
fn eof_discards_trailing_scalar() {
    let mut framer = ObjectFramer::default();
    let mut buf = BytesMut::from("12345");
    assert!(framer.decode_eof(&mut buf).unwrap().is_none());
    assert!(buf.is_empty());
}
