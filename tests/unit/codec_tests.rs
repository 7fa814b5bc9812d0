//! Unit tests for the NDJSON codec used on RepoQL child streams.
//!
//! Covers:
//! - single and batched line decoding
//! - partial delivery buffering until the newline arrives
//! - the max line length guard
//! - EOF handling of an unterminated final line
//! - outbound encoding with the trailing newline

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use repoql_bridge::rpc::codec::{RpcCodec, MAX_LINE_BYTES};
use repoql_bridge::BridgeError;

/// A complete JSON object on a single newline-terminated line is decoded
/// without error and returned without the `\n`.
#[test]
fn single_line_decodes_without_newline() {
    let mut codec = RpcCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");

    let result = codec
        .decode(&mut buf)
        .expect("decode must succeed for a valid NDJSON line");

    assert_eq!(
        result,
        Some("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}".to_owned()),
        "codec must return the line content without the trailing newline"
    );
}

/// Two lines delivered in one buffer are decoded as two separate items.
#[test]
fn batched_lines_decode_individually() {
    let mut codec = RpcCodec::new();
    let raw = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
        "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n",
    );
    let mut buf = BytesMut::from(raw);

    let first = codec.decode(&mut buf).expect("first decode must succeed");
    assert!(first.is_some(), "first line must be decoded");

    let second = codec.decode(&mut buf).expect("second decode must succeed");
    assert!(second.is_some(), "second line must be decoded");

    let third = codec.decode(&mut buf).expect("empty buffer must not error");
    assert!(third.is_none(), "no further lines must be present");
}

/// A fragment without its terminating newline is buffered, not emitted.
#[test]
fn partial_line_buffers_until_newline() {
    let mut codec = RpcCodec::new();

    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"id\":7");
    let result = codec
        .decode(&mut buf)
        .expect("partial decode must not error");
    assert!(
        result.is_none(),
        "partial line must not be emitted before the newline arrives"
    );

    buf.extend_from_slice(b",\"result\":null}\n");
    let result = codec
        .decode(&mut buf)
        .expect("decode must succeed after the newline");
    assert_eq!(
        result,
        Some("{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":null}".to_owned())
    );
}

/// A line exceeding `MAX_LINE_BYTES` returns a protocol error naming the
/// limit instead of buffering without bound.
#[test]
fn oversized_line_returns_protocol_error() {
    let mut codec = RpcCodec::new();
    let big_line = "a".repeat(MAX_LINE_BYTES + 1) + "\n";
    let mut buf = BytesMut::from(big_line.as_str());

    let result = codec.decode(&mut buf);

    match result {
        Err(BridgeError::Protocol(msg)) => assert!(
            msg.contains("line too long"),
            "error must mention 'line too long', got: {msg}"
        ),
        other => panic!("expected Err(BridgeError::Protocol), got: {other:?}"),
    }
}

/// At EOF, a final line without a trailing newline is still yielded.
#[test]
fn decode_eof_yields_unterminated_final_line() {
    let mut codec = RpcCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}");

    let result = codec
        .decode_eof(&mut buf)
        .expect("decode_eof must succeed for the final fragment");

    assert_eq!(
        result,
        Some("{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}".to_owned())
    );

    let done = codec.decode_eof(&mut buf).expect("empty EOF must not error");
    assert!(done.is_none());
}

/// Encoding appends exactly one newline and no other framing.
#[test]
fn encode_appends_single_newline() {
    let mut codec = RpcCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"jsonrpc\":\"2.0\",\"id\":1}".to_owned(), &mut buf)
        .expect("encode must succeed");

    assert_eq!(&buf[..], b"{\"jsonrpc\":\"2.0\",\"id\":1}\n");
}
