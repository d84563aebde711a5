use futures::ready;
use gci_control::{Admission, Interceptor};
use gci_core::ManagedHeap;
use http::header::RETRY_AFTER;
use http::{HeaderValue, Request, Response, StatusCode};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

pub const CONTROL_HEADER: &str = "gci";
pub const HEAP_CHECK: &str = "ch";

pub struct GciLayer<H: ManagedHeap> {
    interceptor: Interceptor<H>,
}

impl<H: ManagedHeap> GciLayer<H> {
    pub fn new(interceptor: Interceptor<H>) -> Self {
        Self { interceptor }
    }
}

impl<H: ManagedHeap> Clone for GciLayer<H> {
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<S, H: ManagedHeap> Layer<S> for GciLayer<H> {
    type Service = GciService<S, H>;

    fn layer(&self, inner: S) -> Self::Service {
        GciService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

pub struct GciService<S, H: ManagedHeap> {
    inner: S,
    interceptor: Interceptor<H>,
}

impl<S: Clone, H: ManagedHeap> Clone for GciService<S, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<S, H, ReqBody, ResBody> Service<Request<ReqBody>> for GciService<S, H>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: ManagedHeap,
    ResBody: Default + From<String>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, H, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        if let Some(value) = request.headers().get(CONTROL_HEADER) {
            if !value.is_empty() {
                return ResponseFuture::ready(self.control(value));
            }
        }

        match self.interceptor.admit() {
            Ok(admission) => ResponseFuture::Inner {
                future: self.inner.call(request),
                admission: Some(admission),
            },
            Err(shed) => {
                tracing::trace!("GciService: shedding, retry in {:?}", shed.unavailability);
                ResponseFuture::ready(unavailable(shed.unavailability))
            }
        }
    }
}

impl<S, H: ManagedHeap> GciService<S, H> {
    fn control<B: Default + From<String>>(&self, value: &HeaderValue) -> Response<B> {
        if value.as_bytes() == HEAP_CHECK.as_bytes() {
            let allocated = self.interceptor.heap_monitor().heap().heap_allocated();
            return Response::new(B::from(allocated.to_string()));
        }
        if !self.interceptor.trigger_collection() {
            tracing::debug!("GciService: collection already in progress");
        }
        Response::new(B::default())
    }
}

fn unavailable<B: Default>(unavailability: Duration) -> Response<B> {
    let secs = unavailability.as_secs() + u64::from(unavailability.subsec_nanos() > 0);
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(secs));
    response
}

#[pin_project(project = ResponseFutureProj)]
pub enum ResponseFuture<F, H: ManagedHeap, B> {
    Ready {
        response: Option<Response<B>>,
    },
    Inner {
        #[pin]
        future: F,
        /// Dropped when the inner future resolves or is itself dropped,
        /// which reports the request as finished.
        admission: Option<Admission<H>>,
    },
}

impl<F, H: ManagedHeap, B> ResponseFuture<F, H, B> {
    fn ready(response: Response<B>) -> Self {
        ResponseFuture::Ready {
            response: Some(response),
        }
    }
}

impl<F, E, H, B> Future for ResponseFuture<F, H, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    H: ManagedHeap,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Ready { response } => {
                Poll::Ready(Ok(response.take().expect("ResponseFuture polled after completion")))
            }
            ResponseFutureProj::Inner { future, admission } => {
                let output = ready!(future.poll(cx));
                if let Some(admission) = admission.take() {
                    admission.finish();
                }
                Poll::Ready(output)
            }
        }
    }
}
