//! Response observer and the sink it decorates.
//!
//! Handlers never build a response value. They write into a
//! [`ResponseWriter`], which forwards every byte straight to the underlying
//! [`ResponseSink`] and remembers two facts on the way through: the status
//! that was sent and how many body bytes followed it. Outer middleware reads
//! those facts after `next` returns.
//!
//! The head (status + headers) goes out exactly once, on whichever comes
//! first: an explicit [`ResponseWriter::set_status`] or the first body write,
//! which implies `200 OK`.

use std::io;

use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use tracing::debug;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseWriter::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Css,          // text/css; charset=utf-8
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Gif,          // image/gif
    Html,         // text/html; charset=utf-8
    Icon,         // image/x-icon
    Javascript,   // text/javascript; charset=utf-8
    Jpeg,         // image/jpeg
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Wasm,         // application/wasm
    Woff2,        // font/woff2
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css; charset=utf-8",
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Gif         => "image/gif",
            Self::Html        => "text/html; charset=utf-8",
            Self::Icon        => "image/x-icon",
            Self::Javascript  => "text/javascript; charset=utf-8",
            Self::Jpeg        => "image/jpeg",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Wasm        => "application/wasm",
            Self::Woff2       => "font/woff2",
            Self::Xml         => "application/xml",
        }
    }

    /// Guesses a content type from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ct = match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "csv"          => Self::Csv,
            "gif"          => Self::Gif,
            "htm" | "html" => Self::Html,
            "ico"          => Self::Icon,
            "js" | "mjs"   => Self::Javascript,
            "jpg" | "jpeg" => Self::Jpeg,
            "json" | "map" => Self::Json,
            "pdf"          => Self::Pdf,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "wasm"         => Self::Wasm,
            "woff2"        => Self::Woff2,
            "xml"          => Self::Xml,
            _              => return None,
        };
        Some(ct)
    }

    fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── ResponseSink ──────────────────────────────────────────────────────────────

/// Where response bytes actually go.
///
/// The listener supplies one per request. [`ResponseWriter`] guarantees that
/// `send_head` is called at most once and always before `write_body`.
pub trait ResponseSink {
    fn send_head(&mut self, status: StatusCode, headers: HeaderMap);

    /// Forwards one body chunk. Returns how many bytes were accepted.
    fn write_body(&mut self, chunk: &[u8]) -> io::Result<usize>;
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Observing decorator around a [`ResponseSink`].
///
/// Build a fresh one for every request; it carries per-request counters.
pub struct ResponseWriter<'a> {
    sink: &'a mut dyn ResponseSink,
    headers: HeaderMap,
    status: Option<StatusCode>,
    size: usize,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(sink: &'a mut dyn ResponseSink) -> Self {
        Self { sink, headers: HeaderMap::new(), status: None, size: 0 }
    }

    /// Headers that will be sent with the head. Changes made after the head
    /// went out have no effect.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Sends the head with `status`. Ignored once the head is already out.
    pub fn set_status(&mut self, status: StatusCode) {
        if let Some(sent) = self.status {
            debug!(sent = sent.as_u16(), ignored = status.as_u16(), "status already sent");
            return;
        }
        self.status = Some(status);
        self.sink.send_head(status, std::mem::take(&mut self.headers));
    }

    /// Passes `buf` through to the sink, sending a `200 OK` head first if
    /// nothing has been sent yet.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.set_status(StatusCode::OK);
        }
        let n = self.sink.write_body(buf)?;
        self.size += n;
        Ok(n)
    }

    /// Sets `content-type` and writes `body`.
    pub fn send(&mut self, content_type: ContentType, body: &[u8]) -> io::Result<()> {
        if self.status.is_none() {
            self.headers.insert(CONTENT_TYPE, content_type.header_value());
        }
        io::Write::write_all(self, body)
    }

    /// `text/plain; charset=utf-8`.
    pub fn text(&mut self, body: &str) -> io::Result<()> {
        self.send(ContentType::Text, body.as_bytes())
    }

    /// `application/json`. Pass the bytes your serialiser produced.
    pub fn json(&mut self, body: &[u8]) -> io::Result<()> {
        self.send(ContentType::Json, body)
    }

    /// Status that was sent, or `200 OK` if nothing has been sent yet.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Body bytes accepted by the sink so far.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the head has gone out.
    pub fn written(&self) -> bool {
        self.status.is_some()
    }

    /// Flushes a `200 OK` head for handlers that wrote nothing at all.
    pub fn finish(mut self) {
        if self.status.is_none() {
            self.set_status(StatusCode::OK);
        }
    }
}

impl io::Write for ResponseWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
