//! NDJSON codec for RepoQL child-process streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length to
//! prevent memory exhaustion caused by unterminated or runaway output from
//! a misbehaving child process.
//!
//! # Usage
//!
//! Use [`RpcCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the child's stdout.  Each
//! newline-terminated UTF-8 line is one complete JSON-RPC message.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{BridgeError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
///
/// Lines exceeding this limit on the inbound stream cause [`RpcCodec::decode`]
/// to return [`BridgeError::Protocol`] with `"line too long"` rather than
/// allocating unbounded memory for a single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON codec for a JSON-RPC stdio stream.
///
/// Delegates line-framing to [`LinesCodec`] with a fixed [`MAX_LINE_BYTES`]
/// limit.
///
/// # Decoder
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] return
/// [`BridgeError::Protocol`]`("line too long: …")`.  I/O errors are mapped
/// to [`BridgeError::Io`].
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`.  The max-length limit is a
/// decoder-side concern and is not enforced during encoding.
#[derive(Debug)]
pub struct RpcCodec(LinesCodec);

impl RpcCodec {
    /// Create a new `RpcCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = String;
    type Error = BridgeError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet (buffering).
    /// Returns `Err(BridgeError::Protocol("line too long: …"))` when the line
    /// exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    ///
    /// Delegates to [`LinesCodec::decode_eof`], applying the same error mapping.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for RpcCodec {
    type Error = BridgeError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to a [`BridgeError`].
fn map_codec_error(e: LinesCodecError) -> BridgeError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            BridgeError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => BridgeError::Io(io_err.to_string()),
    }
}
