//! Running the opening handshake over an async stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::{Config, Limits};
use crate::connection::{Connection, Negotiation};
use crate::error::{Error, Result};
use crate::protocol::Role;

use super::headers::find_head_end;
use super::negotiator::{ClientHandshake, ServerNegotiator};
use super::request::HandshakeRequest;
use super::response::HandshakeResponse;
use super::trace::UpgradeTrace;

/// Read one HTTP message head. Returns the head and any bytes that
/// followed it.
async fn read_head<S>(io: &mut S, limits: &Limits) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_head_end(&buf) {
            limits.check_handshake_size(end)?;
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        limits.check_handshake_size(buf.len())?;
        let n = io.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::handshake("connection closed during handshake"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn write_response<S>(io: &mut S, response: &HandshakeResponse) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    io.write_all(&response.to_bytes()?).await?;
    io.flush().await?;
    Ok(())
}

/// Perform the server side of the opening handshake on `io`.
///
/// On success the `101 Switching Protocols` response has been written and
/// the returned connection is open. On failure an HTTP error response is
/// written when the request got far enough to deserve one.
///
/// # Errors
///
/// - `Error::HandshakeFailure` for a malformed, oversized or refused request
/// - `Error::Timeout` if the handshake outlasts the configured timeout
/// - `Error::Transport` for I/O failures
pub async fn accept<S>(mut io: S, negotiator: &ServerNegotiator, config: Config) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let upgrade = server_upgrade(&mut io, negotiator, &config.limits);
    let (negotiation, trace) = tokio::time::timeout(config.timeouts.handshake, upgrade)
        .await
        .map_err(|_| Error::Timeout("opening handshake"))??;

    let conn = Connection::with_negotiation(io, Role::Server, config, negotiation)?;
    trace.flush(conn.session_id());
    Ok(conn)
}

async fn server_upgrade<S>(
    io: &mut S,
    negotiator: &ServerNegotiator,
    limits: &Limits,
) -> Result<(Negotiation, UpgradeTrace)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, buffered) = match read_head(io, limits).await {
        Ok(read) => read,
        Err(err @ Error::HandshakeFailure(_)) => {
            // best effort; the peer may already be gone
            let _ = write_response(io, &HandshakeResponse::error(400, "Bad Request")).await;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let request = match HandshakeRequest::parse(&head) {
        Ok(request) => request,
        Err(err) => {
            let mut trace = UpgradeTrace::new();
            trace.record(format!("unparseable request: {err}"));
            trace.flush_failed();
            write_response(io, &HandshakeResponse::error(400, "Bad Request")).await?;
            return Err(err);
        }
    };

    match negotiator.negotiate(&request) {
        Ok(negotiated) => {
            write_response(io, &negotiated.response).await?;
            debug!(path = %request.path, "upgrade accepted");
            Ok((
                Negotiation {
                    protocol: negotiated.protocol,
                    extensions: negotiated.extensions,
                    buffered,
                },
                negotiated.trace,
            ))
        }
        Err(rejection) => {
            let context = rejection.trace.flush_failed();
            warn!(%context, status = rejection.response.status, "upgrade rejected");
            write_response(io, &rejection.response).await?;
            Err(rejection.into())
        }
    }
}

/// Perform the client side of the opening handshake on `io`.
///
/// # Errors
///
/// - `Error::HandshakeFailure` if the server refused the upgrade or its
///   answer does not match the request
/// - `Error::Timeout` if the handshake outlasts the configured timeout
/// - `Error::Transport` for I/O failures
pub async fn connect<S>(mut io: S, client: &ClientHandshake, config: Config) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let upgrade = client_upgrade(&mut io, client, &config.limits);
    let negotiation = tokio::time::timeout(config.timeouts.handshake, upgrade)
        .await
        .map_err(|_| Error::Timeout("opening handshake"))??;
    Connection::with_negotiation(io, Role::Client, config, negotiation)
}

async fn client_upgrade<S>(
    io: &mut S,
    client: &ClientHandshake,
    limits: &Limits,
) -> Result<Negotiation>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    io.write_all(&client.request().to_bytes()?).await?;
    io.flush().await?;

    let (head, buffered) = read_head(io, limits).await?;
    let response = HandshakeResponse::parse(&head)?;
    let agreed = client.verify(&response)?;
    Ok(Negotiation {
        protocol: agreed.protocol,
        extensions: agreed.extensions,
        buffered,
    })
}
