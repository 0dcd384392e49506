//! Byte stream source for channels.
//!
//! A transport `Channel` frames packets over any `AsyncRead + AsyncWrite`
//! stream. Outer servers and inner links obtain those streams here: `bind`
//! backs a listening server, `connect` backs an outbound inner link.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opens the streams that channels run on.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// Stream handed to a channel.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// Listener used by servers and inner link acceptors.
    type Listener: StreamListener<Stream = Self::Stream> + 'static;

    /// Listen on `addr`. Port 0 picks a free port, read it back with
    /// [`StreamListener::local_addr`].
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Open an outbound stream to `addr`.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Accepts inbound streams for a bound address.
#[async_trait(?Send)]
pub trait StreamListener {
    /// Stream handed to a channel.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Next inbound stream with the peer address.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Bound address as `host:port`.
    fn local_addr(&self) -> io::Result<String>;
}

/// TCP streams from tokio, with Nagle disabled on both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type Stream = tokio::net::TcpStream;
    type Listener = TokioListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(TokioListener { inner })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        // small frames dominate actor traffic
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// [`StreamListener`] over a tokio TCP listener.
#[derive(Debug)]
pub struct TokioListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl StreamListener for TokioListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        self.inner.local_addr().map(|addr| addr.to_string())
    }
}
