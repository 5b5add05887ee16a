use axum::{
    body::{Body, Bytes},
    http,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use http_body_util::BodyExt;
use std::time::Duration;
use tokio::time::sleep;
use tower::{service_fn, ServiceBuilder, ServiceExt};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tripwire_log::{
    PooledFormatter, PrefixedFormatter, RoundTripLogLayer, RoundTripLogger, TextRendererConfig,
};

// Upstream handlers; the router plays the part of the HTTP transport
async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await; // Simulate some work
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tripwire_log=debug,demo=info")),
        )
        .init();

    let upstream = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler));

    let formatter = PrefixedFormatter::new(
        "[upstream] ",
        PooledFormatter::text(TextRendererConfig {
            request_body: true,
            response_body: true,
        }),
    );
    let client = ServiceBuilder::new()
        .layer(RoundTripLogLayer::new(RoundTripLogger::new(formatter)))
        .service(upstream);

    let requests = vec![
        http::Request::get("http://upstream.local/hello").body(Body::empty())?,
        http::Request::post("http://upstream.local/echo").body(Body::from("Hello from client"))?,
        http::Request::get("http://upstream.local/streaming").body(Body::empty())?,
        http::Request::get("http://upstream.local/missing").body(Body::empty())?,
    ];

    for request in requests {
        let response = client.clone().oneshot(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        info!(%status, body_size = body.len(), "Client received response");
    }

    // A transport that cannot reach anything
    let unreachable = ServiceBuilder::new()
        .layer(RoundTripLogLayer::new(RoundTripLogger::new(
            tripwire_log::default_formatter(),
        )))
        .service(service_fn(|_request: http::Request<Body>| async {
            Err::<Response, _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
        }));
    let request = http::Request::get("http://offline.local/").body(Body::empty())?;
    if let Err(e) = unreachable.oneshot(request).await {
        info!(error = %e, "Transport failed as expected");
    }

    // Response bodies are logged from a background task once fully read.
    sleep(Duration::from_millis(100)).await;

    Ok(())
}
