use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use vatwarden_core::{CallError, Restorer, Transport, TransportError};
use vatwarden_wire::{Request, Response, RpcError, WireError, codes, read_frame, write_frame};

/// Pause after a failed accept, so a persistent error such as fd
/// exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves exported capabilities as newline-delimited JSON-RPC over TCP.
/// Each request is routed to the capability whose token is its `target`.
#[derive(Default)]
pub struct JsonRpcTransport {
    listener: Mutex<Option<TcpListener>>,
}

impl JsonRpcTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for JsonRpcTransport {
    async fn listen(&self, host: Option<&str>, port: u16) -> Result<u16, TransportError> {
        let addr = format!("{}:{port}", host.unwrap_or("0.0.0.0"));
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let bound = listener.local_addr()?.port();
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        Ok(bound)
    }

    async fn serve(&self, restorer: Arc<dyn Restorer>) -> Result<(), TransportError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::NotListening)?;
        info!(addr = %listener.local_addr()?, "accepting connections");
        accept_loop(&listener, restorer).await;
        Ok(())
    }
}

trait Acceptor {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accepts until the process exits. Accept errors are logged and retried.
async fn accept_loop(listener: &impl Acceptor, restorer: Arc<dyn Restorer>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        debug!(%peer, "connection accepted");
        let restorer = restorer.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, restorer).await {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, restorer: Arc<dyn Restorer>) -> Result<(), WireError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let response = match read_frame::<_, Request>(&mut reader).await {
            Ok(Some(request)) => dispatch(request, restorer.as_ref()).await,
            Ok(None) => return Ok(()),
            Err(WireError::Malformed(err)) => {
                Response::failure(0, RpcError::new(codes::PARSE_ERROR, err.to_string()))
            }
            Err(err) => return Err(err),
        };
        write_frame(&mut write, &response).await?;
    }
}

async fn dispatch(request: Request, restorer: &dyn Restorer) -> Response {
    let Some(capability) = restorer.restore(&request.target) else {
        warn!(sturdy_ref = %request.target, "call to unknown sturdy ref");
        return Response::failure(
            request.id,
            RpcError::new(codes::UNKNOWN_TARGET, format!("no capability '{}'", request.target)),
        );
    };
    match capability.call(&request.method, request.params).await {
        Ok(result) => Response::success(request.id, result),
        Err(err) => {
            debug!(method = %request.method, error = %err, "call failed");
            Response::failure(request.id, rpc_error(&err))
        }
    }
}

fn rpc_error(err: &CallError) -> RpcError {
    let code = match err {
        CallError::UnknownMethod(_) => codes::METHOD_NOT_FOUND,
        CallError::InvalidParams(_) => codes::INVALID_PARAMS,
        CallError::Failed(_) => codes::CALL_FAILED,
    };
    RpcError::new(code, err.to_string())
}
