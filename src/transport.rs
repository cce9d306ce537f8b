//! TLS transport for HTTP/2 connections.
//!
//! BoringSSL-based connector negotiating `h2` over ALPN. The connection
//! engine is generic over any `AsyncRead + AsyncWrite`, so this module is
//! only the production path; tests drive the engine over in-memory pipes.

use boring::ssl::{SslConnector, SslMethod, SslVersion};
use http::Uri;
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};

/// A TLS stream carrying an HTTP/2 connection.
pub type TlsStream = SslStream<TcpStream>;

/// Connect a TCP + TLS transport to the URI's authority, requiring the
/// peer to negotiate HTTP/2 via ALPN.
pub async fn connect(uri: &Uri) -> Result<TlsStream> {
    let host = uri
        .host()
        .ok_or_else(|| Error::transport("URI is missing a host"))?;
    let port = uri.port_u16().unwrap_or(443);

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::transport(format!("failed to connect to {}:{}: {}", host, port, e)))?;

    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| Error::transport(format!("failed to create TLS connector: {}", e)))?;
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(|e| Error::transport(format!("failed to set min TLS version: {}", e)))?;
    builder
        .set_alpn_protos(b"\x02h2")
        .map_err(|e| Error::transport(format!("failed to set ALPN: {}", e)))?;

    let config = builder
        .build()
        .configure()
        .map_err(|e| Error::transport(format!("failed to configure TLS: {}", e)))?;

    let stream = tokio_boring::connect(config, host, tcp)
        .await
        .map_err(|e| Error::transport(format!("TLS handshake failed: {}", e)))?;

    match stream.ssl().selected_alpn_protocol() {
        Some(b"h2") => Ok(stream),
        _ => Err(Error::transport("peer did not negotiate h2 via ALPN")),
    }
}
