//! 访问日志拦截层：响应体发送完毕（或连接中断）后输出一条结构化日志，不改动响应内容。

use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::info;

/// 包装内部服务的 [`Layer`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessLogLayer;

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLog { inner }
    }
}

#[derive(Clone, Debug)]
pub struct AccessLog<S> {
    inner: S,
}

impl<S, B, ResBody> Service<Request<B>> for AccessLog<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    ResBody: HttpBody + Unpin + 'static,
{
    type Response = Response<LoggedBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let logged = LoggedRequest::from_request(&request);
        let future = self.inner.call(request);
        Box::pin(async move {
            let response = future.await?;
            let status = response.status();
            Ok(response.map(|inner| LoggedBody {
                inner,
                pending: Some((logged, status)),
            }))
        })
    }
}

/// 透传响应体；流结束或被丢弃时输出访问日志，耗时包含传输时间。
#[derive(Debug)]
pub struct LoggedBody<B> {
    inner: B,
    pending: Option<(LoggedRequest, StatusCode)>,
}

impl<B> LoggedBody<B> {
    fn finish(&mut self) {
        if let Some((logged, status)) = self.pending.take() {
            logged.emit(status);
        }
    }
}

impl<B> HttpBody for LoggedBody<B>
where
    B: HttpBody + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(None) = frame {
            this.finish();
        }
        frame
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for LoggedBody<B> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// 一次请求的访问日志记录。
#[derive(Debug)]
struct LoggedRequest {
    start: Instant,
    method: Method,
    uri: String,
    remote_ip: Option<IpAddr>,
    forwarded_for: Option<String>,
}

impl LoggedRequest {
    fn from_request<B>(request: &Request<B>) -> Self {
        let remote_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Self {
            start: Instant::now(),
            method: request.method().clone(),
            uri: request.uri().to_string(),
            remote_ip,
            forwarded_for: forwarded_for(request.headers()),
        }
    }

    fn emit(self, status: StatusCode) {
        let remote_ip = self
            .remote_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            forwarded_for = self.forwarded_for.as_deref().unwrap_or("-"),
            remote_ip,
            method = %self.method,
            uri = self.uri,
            status = status.as_u16(),
            elapsed = ?self.start.elapsed(),
            "request"
        );
    }
}

/// 原样读取 `x-forwarded-for` 头。
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
