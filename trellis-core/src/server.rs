//! hyper transport for the [`Kernel`]
//!
//! Each connection is served on its own task. The kernel handles the request,
//! the response is written, and `terminate` runs once the response is out.

use crate::kernel::Kernel;
use crate::logging::{error, info, warn};
use crate::{Error, HttpRequest, HttpResponse};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Accept connections on `addr` until the listener fails
pub async fn serve(kernel: Arc<Kernel>, addr: SocketAddr) -> Result<(), Error> {
    kernel.bootstrap()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let kernel = kernel.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<IncomingBody>| {
                let kernel = kernel.clone();
                async move { handle_request(req, kernel).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(peer = %peer, error = %err, "Error serving connection");
            }
        });
    }
}

async fn handle_request(
    req: Request<IncomingBody>,
    kernel: Arc<Kernel>,
) -> Result<Response<Full<bytes::Bytes>>, hyper::Error> {
    let request = into_request(req).await?;
    let response = kernel.handle(request.clone()).await;

    let reply = into_response(&response);
    tokio::spawn(async move {
        kernel.terminate(&request, &response).await;
    });
    Ok(reply)
}

/// Convert a hyper request, keeping the query string on the path
async fn into_request(req: Request<IncomingBody>) -> Result<HttpRequest, hyper::Error> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut request = HttpRequest::new(method, path);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.to_string(), value.to_string());
        }
    }

    request.body = req.collect().await?.to_bytes().to_vec();
    Ok(request)
}

fn into_response(response: &HttpResponse) -> Response<Full<bytes::Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (key, value) in &response.headers {
        builder = builder.header(key, value);
    }

    builder
        .body(Full::new(bytes::Bytes::from(response.body.clone())))
        .unwrap_or_else(|e| {
            error!(error = %e, "Response could not be converted");
            let mut fallback = Response::new(Full::new(bytes::Bytes::new()));
            *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
