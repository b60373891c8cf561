//! Streaming downloads: validate a raw response, name it, hand back the stream.

use std::fmt;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, HeaderMap};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

type BoxedStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An open, unbuffered response body.
///
/// Dropping it closes the underlying connection, which aborts that one
/// download without touching any other request in flight.
pub struct ByteStream {
    inner: BoxedStream,
}

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub(crate) fn from_response(resp: reqwest::Response) -> Self {
        Self::new(resp.bytes_stream().map(|chunk| chunk.map_err(Error::from)))
    }

    /// Read the remaining body into memory.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.inner.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Give the stream up without reading it.
    pub fn release(self) {
        drop(self);
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByteStream { .. }")
    }
}

/// Status, headers and the still-unread body of a stream-mode response.
#[derive(Debug)]
pub struct RawDownload {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub stream: ByteStream,
}

/// A validated file download.
#[derive(Debug)]
pub struct DownloadDescriptor {
    pub stream: ByteStream,
    /// Taken from the `Content-Disposition` filename parameter.
    pub file_name: String,
    /// Advisory only; never checked against the bytes actually received.
    pub file_size: Option<u64>,
}

/// Turn a raw stream-mode response into a [`DownloadDescriptor`].
///
/// The presence of a `Content-Disposition` header carrying a filename is the
/// only accepted proof that the body is a file and not an error document.
/// When validation fails the stream is released before the error is
/// returned. No bytes are read from the stream.
pub fn resolve_download(raw: RawDownload) -> Result<DownloadDescriptor> {
    let RawDownload {
        status,
        headers,
        stream,
    } = raw;

    let Some(disposition) = headers.get(CONTENT_DISPOSITION) else {
        stream.release();
        return Err(Error::MalformedDownload(format!(
            "response (HTTP {}) has no content-disposition header",
            status.as_u16()
        )));
    };

    let file_name = disposition.to_str().ok().and_then(disposition_filename);
    let Some(file_name) = file_name else {
        stream.release();
        return Err(Error::MalformedDownload(
            "content-disposition header lacks a filename".into(),
        ));
    };

    let file_size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    debug!(file_name = %file_name, ?file_size, "resolved download");
    Ok(DownloadDescriptor {
        stream,
        file_name,
        file_size,
    })
}

/// Extract the filename parameter of a `Content-Disposition` value.
///
/// An RFC 5987 `filename*` parameter wins over a plain `filename`.
pub(crate) fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(value).into_iter().skip(1) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(val.trim())),
            "filename*" => extended = decode_ext_value(val.trim()),
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

// Split on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unquote(s: &str) -> String {
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => s.to_string(),
    }
}

// charset'language'percent-encoded
fn decode_ext_value(s: &str) -> Option<String> {
    let mut parts = s.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    let bytes = urlencoding::decode_binary(encoded.as_bytes());
    if charset.eq_ignore_ascii_case("utf-8") {
        String::from_utf8(bytes.into_owned()).ok()
    } else if charset.eq_ignore_ascii_case("iso-8859-1") {
        // Latin-1 bytes are the first 256 code points.
        Some(bytes.iter().map(|&b| char::from(b)).collect())
    } else {
        None
    }
}

/// Write a resolved download to `path`, returning the number of bytes written.
///
/// A progress bar is drawn on stderr when `progress` is set.
pub async fn save_to_path(download: DownloadDescriptor, path: &Path, progress: bool) -> Result<u64> {
    let DownloadDescriptor {
        mut stream,
        file_name,
        file_size,
    } = download;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let pb = progress.then(|| progress_bar(file_size, &file_name));
    let mut out = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                if let Some(pb) = &pb {
                    pb.abandon();
                }
                return Err(e);
            }
        };
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if let Some(pb) = &pb {
            pb.inc(chunk.len() as u64);
        }
    }
    out.flush().await?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    if let Some(expected) = file_size.filter(|&n| n != written) {
        warn!(path = %path.display(), expected, written, "download size differs from content-length");
    }
    Ok(written)
}

fn progress_bar(size: Option<u64>, name: &str) -> ProgressBar {
    let (pb, template) = match size {
        Some(n) => (
            ProgressBar::new(n),
            "{spinner:.green} {msg} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        ),
        None => (
            ProgressBar::new_spinner(),
            "{spinner:.green} {msg} {bytes} ({bytes_per_sec})",
        ),
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_message(name.to_string());
    pb
}
