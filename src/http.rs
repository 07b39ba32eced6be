use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::GraphQLRequest;
use crate::error::GatewayError;
use crate::gateway::GatewayServer;

const PLAYGROUND_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>Turnpike Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #playground { height: 100vh; }
  </style>
</head>
<body>
  <div id="playground"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: {
          'Content-Type': 'application/json',
          'Authorization': token ? `Bearer ${token}` : '',
        },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('playground')
    );
  </script>
</body>
</html>
"#;

fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(full("Internal Server Error"))
        .unwrap_or_else(|_| Response::new(full("Internal Server Error")))
}

/// Route one request against the gateway. An explicit router value rather
/// than process-global handler registration, and generic over the body so
/// it can be exercised without a live listener.
pub async fn route<B>(
    req: Request<B>,
    gateway: Arc<GatewayServer>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let auth_headers = extract_auth_headers(&req);

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "failed to read request body");
                    return Ok(Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(full("failed to read request body"))
                        .unwrap_or_else(|_| internal_server_error()));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(mut request) => {
                    request.auth_headers = auth_headers;
                    let payload = match gateway.execute(request).await {
                        Ok(result) => result,
                        Err(e) => error_payload(&e),
                    };
                    Response::builder()
                        .header("Content-Type", "application/json")
                        .header("Access-Control-Allow-Origin", "*")
                        .body(full(payload.to_string()))
                        .unwrap_or_else(|_| internal_server_error())
                }
                Err(e) => Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .header("Access-Control-Allow-Origin", "*")
                    .body(full(format!("invalid JSON request: {}", e)))
                    .unwrap_or_else(|_| internal_server_error()),
            }
        }

        (&Method::GET, "/playground") => Response::builder()
            .header("Content-Type", "text/html")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(PLAYGROUND_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/playground")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Access-Control-Allow-Origin", "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(response)
}

fn error_payload(error: &GatewayError) -> serde_json::Value {
    warn!(code = error.code(), error = %error, "request failed");
    json!({
        "errors": [{
            "message": error.to_string(),
            "extensions": { "code": error.code() },
        }]
    })
}

/// Headers forwarded verbatim to every upstream a request fans out to.
fn extract_auth_headers<B>(req: &Request<B>) -> Option<HashMap<String, String>> {
    let mut auth_headers = HashMap::new();

    for header_name in ["Authorization", "x-api-key", "x-token"] {
        if let Some(header_value) = req.headers().get(header_name) {
            if let Ok(value_str) = header_value.to_str() {
                auth_headers.insert(header_name.to_string(), value_str.to_string());
            }
        }
    }

    if auth_headers.is_empty() {
        None
    } else {
        Some(auth_headers)
    }
}

/// Bind the listener and serve until a fatal accept error. Bind failure
/// propagates to the caller; restart policy belongs to the orchestrator.
pub async fn serve(addr: SocketAddr, gateway: Arc<GatewayServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    info!("playground available at http://{}/playground", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| route(req, Arc::clone(&gateway)));

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(%peer, error = %e, "error processing connection");
            }
        });
    }
}
