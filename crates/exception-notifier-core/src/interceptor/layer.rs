//! Tower middleware that notifies on inner service errors
//!
//! [`ExceptionNotifierLayer`] wraps fallible services whose error type
//! implements [`Exception`]. axum routes never fail at the service level;
//! their handlers turn errors into responses, so for those use
//! [`ErrorResponseLayer`] and attach a [`ReportedError`] to the response.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{Request, Response};
use tower::{Layer, Service};

use crate::models::{Exception, ExceptionInfo, RequestContext};

use super::ExceptionNotifier;

/// Wraps a service so that every error it returns is observed by an
/// [`ExceptionNotifier`] before being passed back out unchanged.
///
/// Per-request options are read from an
/// [`OptionsOverride`](crate::models::OptionsOverride) in the request
/// extensions.
#[derive(Clone)]
pub struct ExceptionNotifierLayer {
    notifier: ExceptionNotifier,
}

impl ExceptionNotifierLayer {
    /// Layer observing errors with `notifier`
    pub fn new(notifier: ExceptionNotifier) -> Self {
        Self { notifier }
    }
}

impl<S> Layer<S> for ExceptionNotifierLayer {
    type Service = ExceptionNotifierService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExceptionNotifierService {
            inner,
            notifier: self.notifier.clone(),
        }
    }
}

/// Service produced by [`ExceptionNotifierLayer`]
#[derive(Clone)]
pub struct ExceptionNotifierService<S> {
    inner: S,
    notifier: ExceptionNotifier,
}

impl<S, ReqBody> Service<Request<ReqBody>> for ExceptionNotifierService<S>
where
    S: Service<Request<ReqBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send + 'static,
    S::Error: Exception,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut context = RequestContext::from_request(&req);
        let notifier = self.notifier.clone();

        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move { notifier.intercept(&mut context, inner.call(req)).await })
    }
}

/// Error carried in response extensions for [`ErrorResponseLayer`].
///
/// Insert it from an `IntoResponse` impl:
///
/// ```ignore
/// impl IntoResponse for AppError {
///     fn into_response(self) -> Response {
///         let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
///         ReportedError::capture(&self).attach(&mut response);
///         response
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ReportedError(pub ExceptionInfo);

impl ReportedError {
    /// Snapshot `error`
    pub fn capture<E: Exception + ?Sized>(error: &E) -> Self {
        Self(ExceptionInfo::capture(error))
    }

    /// Store in `response`'s extensions
    pub fn attach<B>(self, response: &mut Response<B>) {
        response.extensions_mut().insert(self);
    }
}

/// Observes [`ReportedError`]s attached to responses, e.g. by axum handlers.
///
/// The response is returned as-is, extension included.
#[derive(Clone)]
pub struct ErrorResponseLayer {
    notifier: ExceptionNotifier,
}

impl ErrorResponseLayer {
    /// Layer observing reported errors with `notifier`
    pub fn new(notifier: ExceptionNotifier) -> Self {
        Self { notifier }
    }
}

impl<S> Layer<S> for ErrorResponseLayer {
    type Service = ErrorResponseService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorResponseService {
            inner,
            notifier: self.notifier.clone(),
        }
    }
}

/// Service produced by [`ErrorResponseLayer`]
#[derive(Clone)]
pub struct ErrorResponseService<S> {
    inner: S,
    notifier: ExceptionNotifier,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ErrorResponseService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut context = RequestContext::from_request(&req);
        let notifier = self.notifier.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let response = inner.call(req).await?;

            let reported = response.extensions().get::<ReportedError>().cloned();
            if let Some(ReportedError(exception)) = reported {
                notifier.observe_captured(&mut context, &exception).await;
            }

            Ok(response)
        })
    }
}
