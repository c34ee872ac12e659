use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::endpoint::Endpoint;
use crate::frame::{Request, Response, read_frame, write_frame};
use crate::WireError;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opens a connection, sends one request to the endpoint's target and waits
/// for its response.
pub async fn call(
    endpoint: &Endpoint,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, WireError> {
    tokio::time::timeout(timeout, exchange(endpoint, method, params))
        .await
        .map_err(|_| WireError::Timeout(timeout))?
}

async fn exchange(endpoint: &Endpoint, method: &str, params: Value) -> Result<Value, WireError> {
    let stream = TcpStream::connect(endpoint.address()).await?;
    let (read, mut write) = stream.into_split();

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    write_frame(&mut write, &Request::new(id, &endpoint.target, method, params)).await?;

    let mut reader = BufReader::new(read);
    let response: Response = read_frame(&mut reader).await?.ok_or(WireError::Closed)?;
    if response.id != id {
        return Err(WireError::IdMismatch {
            expected: id,
            got: response.id,
        });
    }
    response.into_result()
}

/// Whether a TCP connection to the endpoint can be opened within `timeout`.
pub async fn probe(endpoint: &Endpoint, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(endpoint.address())).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RpcError;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Answers every request on one connection with `reply(request)`.
    async fn serve_once<F>(reply: F) -> Endpoint
    where
        F: Fn(Request) -> Option<Response> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            while let Ok(Some(request)) = read_frame::<_, Request>(&mut reader).await {
                match reply(request) {
                    Some(response) => write_frame(&mut write, &response).await.unwrap(),
                    None => tokio::time::sleep(Duration::from_secs(3600)).await,
                }
            }
        });
        Endpoint::new("127.0.0.1", port, "admin")
    }

    #[tokio::test]
    async fn call_round_trips_through_a_server() {
        let endpoint = serve_once(|request| {
            assert_eq!(request.target, "admin");
            Some(Response::success(request.id, json!({ "method": request.method })))
        })
        .await;

        let result = call(&endpoint, "identities", Value::Null, DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result, json!({ "method": "identities" }));
    }

    #[tokio::test]
    async fn remote_errors_are_surfaced() {
        let endpoint = serve_once(|request| {
            Some(Response::failure(request.id, RpcError::new(-32601, "unknown method")))
        })
        .await;

        let err = call(&endpoint, "nope", Value::Null, DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Remote { code: -32601, .. }));
    }

    #[tokio::test]
    async fn silent_servers_time_out() {
        let endpoint = serve_once(|_| None).await;
        let err = call(&endpoint, "stop", Value::Null, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Timeout(_)));
    }

    #[tokio::test]
    async fn probe_reports_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::new("127.0.0.1", port, "x");
        assert!(!probe(&endpoint, Duration::from_secs(1)).await);
    }
}
