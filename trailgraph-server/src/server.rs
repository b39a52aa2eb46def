//! HTTP/1.1 server

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::handlers::handle_request;
use crate::state::AppState;

pub struct TrailServer {
    state: AppState,
}

impl TrailServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Accept connections until `shutdown` flips to `true`
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        info!("trailgraph server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Accept error: {}", e);
                            continue;
                        }
                    };
                    debug!("New connection from {}", remote_addr);

                    let state = self.state.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(stream, remote_addr, state).await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("server stopped accepting connections");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_connection(stream: TcpStream, remote_addr: SocketAddr, state: AppState) {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let state = state.clone();
            async move { handle_request(req, state).await }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!("Connection error from {}: {}", remote_addr, err);
        }
    }
}
