//! Unix-domain-socket accept loop.
//!
//! One connection per client, one tokio task per connection, one JSON
//! request per line. The service layer underneath is synchronous; every
//! round trip tolerates arbitrary client delay or disappearance — state
//! lives in the store, never in the connection.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, Response, handle};
use crate::service::{CustodyService, ErrorCode};

/// Serves connections until the listener errors or the task is aborted.
pub async fn serve(listener: UnixListener, service: Arc<CustodyService>) -> std::io::Result<()> {
    info!("daemon listening");
    loop {
        let (stream, _addr) = listener.accept().await?;
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &service).await {
                debug!(error = %err, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    service: &CustodyService,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => handle(service, envelope),
            Err(err) => {
                warn!(error = %err, "malformed request");
                Response::Error {
                    code: ErrorCode::Validation,
                    message: format!("malformed request: {err}"),
                }
            }
        };
        let mut payload = serde_json::to_vec(&response).unwrap_or_else(|err| {
            // A response that cannot serialize is a programmer error; send
            // a minimal internal-error line instead of dropping the client.
            format!(
                "{{\"status\":\"error\",\"code\":\"INTERNAL\",\"message\":\"{err}\"}}"
            )
            .into_bytes()
        });
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
    Ok(())
}
