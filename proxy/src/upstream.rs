//! The upstream half of C11: a plain HTTP/2 client the proxy uses to forward
//! both passthrough and rewritten requests. Deliberately dumb -- it never
//! looks past headers/body, matching the core's "never deserialize outside
//! payloads" invariant one layer up.

use http::uri::{Authority, Scheme};
use http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::body::ProxyBody;

#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, ProxyBody>,
    authority: Authority,
}

impl UpstreamClient {
    pub fn new(upstream_addr: &str) -> Result<Self, http::uri::InvalidUri> {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector);
        let authority: Authority = upstream_addr.parse()?;
        Ok(UpstreamClient { client, authority })
    }

    /// Rewrites the request's target to the upstream authority (preserving
    /// the original path/query and every header) and forwards it.
    pub async fn send(
        &self,
        mut request: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        let path_and_query = request
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| "/".parse().expect("'/' is a valid path-and-query"));
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .expect("scheme + authority + existing path-and-query always build a valid URI");
        *request.uri_mut() = uri;
        self.client.request(request).await
    }
}
