use lazy_static::lazy_static;
use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;

lazy_static! {
    static ref TLS_CONNECTOR: tokio_rustls::TlsConnector = {
        let mut root_store = rustls::RootCertStore::empty();
        if let Ok(certs) = rustls_native_certs::load_native_certs() {
            for cert in certs {
                let _ = root_store.add(&rustls::Certificate(cert.0));
            }
        }
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        tokio_rustls::TlsConnector::from(std::sync::Arc::new(config))
    };
}

/// One upstream connection, plain or encrypted. Boxed because the TLS variant is an order of
/// magnitude larger than the TCP one.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(Box<TcpStream>),
    Tls(Box<TlsStream<TcpStream>>),
}

pub type TlsError = rustls::Error;

#[derive(Debug)]
pub enum StreamError {
    TlsError(TlsError),
    IoError(std::io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StreamError::TlsError(err) => write!(f, "TLS error: {}", err),
            StreamError::IoError(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl From<TlsError> for StreamError {
    fn from(err: TlsError) -> Self {
        StreamError::TlsError(err)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::IoError(err)
    }
}

impl Stream {
    pub(crate) async fn new_tcp(addr: SocketAddr) -> Result<Stream, StreamError> {
        Ok(Stream::Tcp(TcpStream::connect(addr).await?.into()))
    }

    pub(crate) async fn new_tls(addr: SocketAddr, host_name: &str) -> Result<Stream, StreamError> {
        let tcp_stream = TcpStream::connect(addr).await?;
        let name = rustls::ServerName::try_from(host_name).map_err(|_| {
            StreamError::TlsError(rustls::Error::General(format!(
                "invalid server name: {}",
                host_name
            )))
        })?;
        let tls_stream = TLS_CONNECTOR.connect(name, tcp_stream).await?;
        Ok(Stream::Tls(tls_stream.into()))
    }

    /// Both transports behind one object, so the IO impls below don't repeat the match per
    /// method. Both variants are boxed and `Unpin`, pinning the projection is free.
    fn transport(&mut self) -> Pin<&mut (dyn Transport + '_)> {
        match self {
            Stream::Tcp(stream) => Pin::new(&mut **stream),
            Stream::Tls(stream) => Pin::new(&mut **stream),
        }
    }
}

trait Transport: AsyncRead + AsyncWrite + Unpin {}

impl<T: AsyncRead + AsyncWrite + Unpin> Transport for T {}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<io::Result<()>> {
        self.get_mut().transport().poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.get_mut().transport().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        self.get_mut().transport().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        self.get_mut().transport().poll_shutdown(cx)
    }
}
