//! Stats endpoint
//!
//! A second listener serving `GET /stats` with the broker's aggregate
//! counters as JSON. Runs only when `server.stats_port` is configured;
//! configuration validation already guarantees the port differs from the
//! broker's.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use topiq_broker::Broker;
use tracing::{error, info, warn};

pub async fn start(addr: String, broker: Arc<Mutex<Broker>>) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "cannot bind stats endpoint");
            return;
        }
    };
    info!(addr = %addr, "stats endpoint listening");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "cannot accept stats connection");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let broker = broker.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let broker = broker.clone();
                async move { handle_stats(req, broker).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "error serving stats connection");
            }
        });
    }
}

async fn handle_stats(
    req: Request<hyper::body::Incoming>,
    broker: Arc<Mutex<Broker>>,
) -> Result<Response<String>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/stats") => {
            let stats = broker.lock().unwrap().stats();
            let body = serde_json::to_string(&stats).unwrap_or_else(|_| "{}".to_string());
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(body)
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body("Not Found".to_string())
            .unwrap()),
    }
}
