//! `multipart/x-mixed-replace` camera stream.
//!
//! The camera sends an endless sequence of parts:
//!
//! ```text
//! \r\n--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>
//! ```
//!
//! [`MultipartDecoder`] reassembles parts across arbitrary chunk splits. When
//! a part carries `Content-Length` the body is taken by length; otherwise it
//! runs up to the next delimiter.

use crate::error::Result;
use crate::task::CancellableTask;
use arm_core::limits::MAX_PART_BYTES;
use arm_core::LiveFrame;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::{Buf, Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Boundary used by the arm camera firmware.
pub const DEFAULT_BOUNDARY: &str = "123456789000000000000987654321";

const MAX_HEADER_BYTES: usize = 8 * 1024;
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Scanning for the next delimiter.
    Preamble,
    /// Delimiter consumed, reading part headers.
    Headers,
    /// Reading a body, by length when known.
    Body(Option<usize>),
}

/// Incremental multipart parser.
#[derive(Debug)]
pub struct MultipartDecoder {
    /// `--<boundary>`
    delimiter: Vec<u8>,
    /// `\r\n--<boundary>`
    body_end: Vec<u8>,
    buf: BytesMut,
    state: State,
}

impl MultipartDecoder {
    /// Decoder for an explicit boundary.
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        let delimiter = format!("--{boundary}").into_bytes();
        let mut body_end = b"\r\n".to_vec();
        body_end.extend_from_slice(&delimiter);
        Self {
            delimiter,
            body_end,
            buf: BytesMut::new(),
            state: State::Preamble,
        }
    }

    /// Decoder for the boundary named in a `Content-Type` header, falling back
    /// to [`DEFAULT_BOUNDARY`].
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let boundary = content_type
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
        Self::new(&boundary)
    }

    /// Feed one chunk, returning every part it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut parts = Vec::new();
        while let Some(part) = self.step() {
            if let Some(body) = part {
                parts.push(body);
            }
        }
        parts
    }

    /// Advance the state machine once. `None` means more input is needed;
    /// `Some(None)` means progress without a finished part.
    fn step(&mut self) -> Option<Option<Bytes>> {
        match self.state {
            State::Preamble => {
                let Some(at) = find(&self.buf, &self.delimiter) else {
                    let keep = self.delimiter.len().saturating_sub(1);
                    if self.buf.len() > keep {
                        self.buf.advance(self.buf.len() - keep);
                    }
                    return None;
                };
                self.buf.advance(at + self.delimiter.len());
                self.state = State::Headers;
                Some(None)
            }
            State::Headers => {
                if self.buf.len() < 2 {
                    return None;
                }
                if self.buf.starts_with(b"--") {
                    debug!("Closing delimiter");
                    self.buf.clear();
                    self.state = State::Preamble;
                    return None;
                }
                let Some(end) = find(&self.buf, HEADER_END) else {
                    if self.buf.len() > MAX_HEADER_BYTES {
                        warn!(len = self.buf.len(), "Part headers too long, resynchronising");
                        self.buf.clear();
                        self.state = State::Preamble;
                    }
                    return None;
                };
                let content_length = parse_content_length(&self.buf[..end]);
                self.buf.advance(end + HEADER_END.len());
                self.state = State::Body(content_length.filter(|&n| {
                    let ok = n <= MAX_PART_BYTES;
                    if !ok {
                        warn!(n, "Ignoring oversized Content-Length");
                    }
                    ok
                }));
                Some(None)
            }
            State::Body(Some(len)) => {
                if self.buf.len() < len {
                    return None;
                }
                let body = self.buf.split_to(len).freeze();
                self.state = State::Preamble;
                Some(non_empty(body))
            }
            State::Body(None) => {
                let Some(at) = find(&self.buf, &self.body_end) else {
                    if self.buf.len() > MAX_PART_BYTES {
                        warn!(len = self.buf.len(), "Part exceeds size limit, dropping");
                        self.buf.clear();
                        self.state = State::Preamble;
                    }
                    return None;
                };
                let body = self.buf.split_to(at).freeze();
                self.buf.advance(self.body_end.len());
                self.state = State::Headers;
                Some(non_empty(body))
            }
        }
    }

    /// Bytes held waiting for more input.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn non_empty(body: Bytes) -> Option<Bytes> {
    if body.is_empty() {
        trace!("Skipping empty part");
        None
    } else {
        Some(body)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Extract the `boundary` parameter of a multipart content type.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Running camera stream. Dropping the handle aborts it.
#[derive(Debug)]
pub struct FrameStreamHandle {
    latest: watch::Receiver<Option<LiveFrame>>,
    task: CancellableTask<Result<()>>,
}

impl FrameStreamHandle {
    /// Start reading `url`.
    pub fn spawn(http: reqwest::Client, url: Url) -> Self {
        let (tx, latest) = watch::channel(None);
        let task = CancellableTask::spawn(move |abort| read_stream(http, url, tx, abort));
        Self { latest, task }
    }

    /// Receiver of the most recent frame.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<LiveFrame>> {
        self.latest.clone()
    }

    /// Most recent frame, if any arrived.
    #[must_use]
    pub fn latest(&self) -> Option<LiveFrame> {
        self.latest.borrow().clone()
    }

    /// Stop reading and drop the connection. Returns `true` on the first call.
    pub fn abort(&mut self) -> bool {
        self.task.cancel()
    }

    /// Wait for the stream to end, returning its outcome.
    pub async fn join(&mut self) -> Option<Result<()>> {
        self.task.join().await
    }
}

async fn read_stream(
    http: reqwest::Client,
    url: Url,
    latest: watch::Sender<Option<LiveFrame>>,
    mut abort: oneshot::Receiver<()>,
) -> Result<()> {
    let response = tokio::select! {
        biased;
        _ = &mut abort => return Ok(()),
        response = http.get(url.clone()).send() => response?.error_for_status()?,
    };

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    info!(%url, content_type = ?content_type, "Camera stream connected");
    let mut decoder = MultipartDecoder::from_content_type(content_type.as_deref());
    let mut body = response.bytes_stream();
    let mut sequence = 0_u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut abort => {
                info!("Camera stream aborted");
                return Ok(());
            }
            chunk = body.next() => match chunk {
                Some(Ok(chunk)) => {
                    for jpeg in decoder.push(&chunk) {
                        sequence += 1;
                        trace!(sequence, len = jpeg.len(), "Frame");
                        latest.send_replace(Some(LiveFrame {
                            received_at: Utc::now(),
                            sequence,
                            base64: BASE64_STANDARD.encode(&jpeg),
                            jpeg,
                        }));
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    info!(frames = sequence, "Camera stream ended");
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8], with_length: bool) -> Vec<u8> {
        let mut out = format!("\r\n--{DEFAULT_BOUNDARY}\r\nContent-Type: image/jpeg\r\n").into_bytes();
        if with_length {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn boundary_parsing() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=abc").as_deref(),
            Some("abc")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; Boundary=\"q r\"").as_deref(),
            Some("q r")
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
    }

    #[test]
    fn decodes_length_delimited_parts() {
        let mut decoder = MultipartDecoder::from_content_type(None);
        let mut stream = part(b"first", true);
        stream.extend(part(b"second\r\n--not-a-boundary", true));
        let parts = decoder.push(&stream);
        assert_eq!(parts, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second\r\n--not-a-boundary")]);
    }

    #[test]
    fn decodes_delimiter_terminated_parts() {
        let mut decoder = MultipartDecoder::new(DEFAULT_BOUNDARY);
        let mut stream = part(b"one", false);
        stream.extend(part(b"two", false));
        let parts = decoder.push(&stream);
        assert_eq!(parts, vec![Bytes::from_static(b"one")]);
        // The second body ends only when the next delimiter shows up.
        let parts = decoder.push(&part(b"three", false));
        assert_eq!(parts, vec![Bytes::from_static(b"two")]);
    }

    #[test]
    fn every_split_point_yields_the_same_frames() {
        let mut stream = part(b"\xff\xd8alpha\xff\xd9", true);
        stream.extend(part(b"\xff\xd8beta\xff\xd9", true));
        stream.extend(part(b"\xff\xd8gamma\xff\xd9", true));
        for split in 0..stream.len() {
            let mut decoder = MultipartDecoder::new(DEFAULT_BOUNDARY);
            let mut parts = decoder.push(&stream[..split]);
            parts.extend(decoder.push(&stream[split..]));
            assert_eq!(parts.len(), 3, "split at {split}");
            assert_eq!(&parts[1][..], b"\xff\xd8beta\xff\xd9");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let mut stream = b"preamble junk".to_vec();
        stream.extend(part(b"payload", true));
        let mut decoder = MultipartDecoder::new(DEFAULT_BOUNDARY);
        let parts: Vec<Bytes> = stream.iter().flat_map(|b| decoder.push(&[*b])).collect();
        assert_eq!(parts, vec![Bytes::from_static(b"payload")]);
    }

    #[test]
    fn closing_delimiter_ends_cleanly() {
        let mut decoder = MultipartDecoder::new("b");
        let parts = decoder.push(b"--b\r\n\r\nxyz\r\n--b--\r\n");
        assert_eq!(parts, vec![Bytes::from_static(b"xyz")]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn preamble_buffer_stays_bounded() {
        let mut decoder = MultipartDecoder::new(DEFAULT_BOUNDARY);
        decoder.push(&vec![b'x'; 100_000]);
        assert!(decoder.buffered() < DEFAULT_BOUNDARY.len() + 2);
    }
}
