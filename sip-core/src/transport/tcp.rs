use super::streaming::{
    StreamingFactory, StreamingListener, StreamingListenerBuilder, StreamingTransport,
};
use sip_types::uri::SipUri;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

pub const TCP: &str = "TCP";

// ==== Connector

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl StreamingFactory for TcpConnector {
    type Transport = TcpStream;

    async fn connect<A: ToSocketAddrs + Send>(
        &self,
        _uri: &SipUri,
        addr: A,
    ) -> io::Result<Self::Transport> {
        TcpStream::connect(addr).await
    }
}

// ==== Listener

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpListenerBuilder;

#[async_trait::async_trait]
impl StreamingListenerBuilder for TcpListenerBuilder {
    type Transport = TcpStream;
    type StreamingListener = TcpAcceptStream;

    async fn bind<A: ToSocketAddrs + Send>(
        self,
        addr: A,
    ) -> io::Result<(Self::StreamingListener, SocketAddr)> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;

        Ok((TcpAcceptStream { listener }, bound))
    }
}

pub struct TcpAcceptStream {
    listener: TcpListener,
}

#[async_trait::async_trait]
impl StreamingListener for TcpAcceptStream {
    type Transport = TcpStream;

    async fn accept(&mut self) -> io::Result<(Self::Transport, SocketAddr)> {
        self.listener.accept().await
    }
}

// ==== Transport

impl StreamingTransport for TcpStream {
    const NAME: &'static str = TCP;
    const SECURE: bool = false;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}
