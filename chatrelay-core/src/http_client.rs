use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::Stream;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};
use crate::stream::{FrameStream, RawFrame};

/// Request context carries tracing IDs and idempotency key.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("chatrelay/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    fn decorate(
        &self,
        mut req: RequestBuilder,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> RequestBuilder {
        req = req.header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(ik) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", ik);
        }
        req
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self.decorate(self.inner.post(url).json(body), headers, ctx);
        self.send_json(req, url).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self.decorate(self.inner.get(url).query(query), headers, ctx);
        self.send_json(req, url).await
    }

    async fn send_json<R: DeserializeOwned>(&self, req: RequestBuilder, url: &str) -> CoreResult<R> {
        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::BackendUnavailable {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        tracing::debug!(url, status = status.as_u16(), latency_ms = start.elapsed().as_millis() as u64, "backend responded");
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &text));
        }

        resp.json::<R>().await.map_err(|e| RelayError::Backend {
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }

    /// POST JSON and return the response as a stream of SSE frames.
    /// The handshake (connect + status) completes before this returns; failures
    /// after that arrive as a single `Err` item on the stream.
    pub async fn post_sse<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
        max_event_bytes: usize,
    ) -> CoreResult<FrameStream> {
        let req = self.decorate(
            self.inner
                .post(url)
                .json(body)
                .header("Accept", "text/event-stream"),
            headers,
            ctx,
        );

        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::BackendUnavailable {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }

        let lines = LineStream::new(Box::pin(resp.bytes_stream()), max_event_bytes);
        Ok(Box::pin(SseFrames::new(lines, max_event_bytes)))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> RelayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited { retry_after },
        s if s.is_server_error() => RelayError::BackendUnavailable {
            reason: format!("status {}", s.as_u16()),
        },
        s => RelayError::Backend {
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Room for the field name and separator on a `data:` line.
const LINE_PREFIX_SLACK: usize = "data: ".len();

/// Line splitter over a bytes stream. Lines end on `\n`, `\r\n` or a lone `\r`
/// and are yielded without their terminator. Bytes are buffered until a full
/// line is available, so multi-byte characters split across chunks decode
/// intact. A partial line longer than the event limit is an error.
struct LineStream<S> {
    inner: S,
    buf: BytesMut,
    limit: usize,
    /// The previous line ended on `\r`; a `\n` at the head of the buffer belongs to it.
    skip_lf: bool,
    flushed_tail: bool,
}

impl<S> LineStream<S> {
    fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            limit,
            skip_lf: false,
            flushed_tail: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        if self.skip_lf && !self.buf.is_empty() {
            if self.buf[0] == b'\n' {
                self.buf.advance(1);
            }
            self.skip_lf = false;
        }
        let idx = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r')?;
        let line = self.buf.split_to(idx);
        self.skip_lf = self.buf[0] == b'\r';
        self.buf.advance(1);
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<S, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(line) = this.next_line() {
                return Poll::Ready(Some(Ok(line)));
            }
            if this.buf.len() > this.limit.saturating_add(LINE_PREFIX_SLACK) {
                this.buf = BytesMut::new();
                return Poll::Ready(Some(Err(RelayError::EventTooLarge { limit: this.limit })));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(RelayError::BackendUnavailable {
                        reason: e.to_string(),
                    })));
                }
                Poll::Ready(None) => {
                    if !this.flushed_tail && !this.buf.is_empty() {
                        this.flushed_tail = true;
                        let line = this.buf.split();
                        return Poll::Ready(Some(Ok(String::from_utf8_lossy(&line).into_owned())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Groups lines into event-stream frames. A blank line dispatches the pending
/// frame; a frame made only of `event:`/`id:` lines is dispatched with empty data.
struct SseFrames<S> {
    lines: LineStream<S>,
    max_event_bytes: usize,
    last_id: Option<String>,
    frame_id: Option<String>,
    event: Option<String>,
    data: String,
    has_data: bool,
    pending: bool,
    done: bool,
}

impl<S> SseFrames<S> {
    fn new(lines: LineStream<S>, max_event_bytes: usize) -> Self {
        Self {
            lines,
            max_event_bytes,
            last_id: None,
            frame_id: None,
            event: None,
            data: String::new(),
            has_data: false,
            pending: false,
            done: false,
        }
    }

    fn take_frame(&mut self) -> RawFrame {
        self.pending = false;
        self.has_data = false;
        RawFrame {
            id: self.frame_id.take(),
            last_event_id: self.last_id.clone(),
            event: self.event.take(),
            data: std::mem::take(&mut self.data),
        }
    }

    /// Apply one non-blank line. Returns an error when the data limit is exceeded.
    fn feed(&mut self, line: &str) -> CoreResult<()> {
        if line.starts_with(':') {
            return Ok(());
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
                if self.data.len() > self.max_event_bytes {
                    return Err(RelayError::EventTooLarge {
                        limit: self.max_event_bytes,
                    });
                }
            }
            "id" => {
                if !value.contains('\0') {
                    self.frame_id = Some(value.to_string());
                    if !value.is_empty() {
                        self.last_id = Some(value.to_string());
                    }
                }
            }
            // `retry` and unknown fields do not affect framing
            _ => return Ok(()),
        }
        self.pending = true;
        Ok(())
    }
}

impl<S, E> Stream for SseFrames<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = CoreResult<RawFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match Pin::new(&mut this.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    if line.is_empty() {
                        if this.pending {
                            return Poll::Ready(Some(Ok(this.take_frame())));
                        }
                        continue;
                    }
                    if let Err(e) = this.feed(&line) {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.pending {
                        return Poll::Ready(Some(Ok(this.take_frame())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
