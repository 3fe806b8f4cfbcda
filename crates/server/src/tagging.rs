//! IP tagging middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::ConnectInfo};
use http::{Request, Response};
use ip_tagging::FilterHandle;
use tower::Layer;

use config::ClientIpConfig;

#[derive(Clone)]
pub struct IpTaggingLayer {
    client_ip_config: ClientIpConfig,
    filter: Option<Arc<FilterHandle>>,
}

impl IpTaggingLayer {
    pub fn new(client_ip_config: ClientIpConfig, filter: Option<Arc<FilterHandle>>) -> Self {
        Self {
            client_ip_config,
            filter,
        }
    }
}

impl<Service> Layer<Service> for IpTaggingLayer
where
    Service: Send + Clone,
{
    type Service = IpTaggingService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        IpTaggingService {
            next,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct IpTaggingService<Service> {
    next: Service,
    layer: IpTaggingLayer,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for IpTaggingService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();

        let Some(filter) = self.layer.filter.as_ref() else {
            return Box::pin(next.call(req));
        };

        let ip = extract_client_ip(&self.layer.client_ip_config, &req);

        // The whole decision is synchronous: the snapshot loaded here is the
        // one this request uses even if configuration reloads mid-flight.
        // Whatever the outcome, the request continues to the next service.
        filter.load().on_request(req.headers_mut(), ip);

        Box::pin(next.call(req))
    }
}

fn extract_client_ip<B>(config: &ClientIpConfig, req: &Request<B>) -> Option<IpAddr> {
    if config.x_real_ip
        && let Some(ip) = req
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    {
        return Some(ip);
    }

    if let Some(hops) = config.x_forwarded_for_trusted_hops
        && let Some(ip) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').rev().nth(hops))
            .and_then(|s| s.trim().parse().ok())
    {
        return Some(ip);
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}
