//! Listener (C6): bind UDP + TCP on the configured address and dispatch
//! every inbound query.
//!
//! `ReusePort` is applied via the `socket2` crate before handing the raw
//! socket to tokio, the usual way to reach a POSIX option tokio's own
//! `UdpSocket`/`TcpListener` builders don't expose (grounded in `kixdns`'s
//! and the teacher's own dependency on `socket2` for exactly this).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::codec;
use crate::config::Config;
use crate::dispatcher::Dispatcher;

const TCP_BACKLOG: i32 = 1024;

pub struct Listener {
    udp: UdpSocket,
    tcp: TcpListener,
    dispatcher: Arc<Dispatcher>,
    udp_max_size: usize,
}

impl Listener {
    pub async fn bind(config: Arc<Config>) -> io::Result<Self> {
        let udp = bind_udp(config.listen, config.reuse_port)?;
        let tcp = bind_tcp(config.listen, config.reuse_port)?;
        let udp_max_size = config.udp_max_size;
        let dispatcher = Arc::new(Dispatcher::new(config));
        Ok(Self {
            udp,
            tcp,
            dispatcher,
            udp_max_size,
        })
    }

    /// Run the listener loop forever, spawning one task per inbound query
    /// so a slow upstream round-trip never blocks the accept/recv loop.
    pub async fn serve(self) -> io::Result<()> {
        let udp = Arc::new(self.udp);
        let udp_dispatcher = self.dispatcher.clone();
        let udp_max_size = self.udp_max_size;
        let udp_task = tokio::spawn(serve_udp(udp, udp_dispatcher, udp_max_size));

        let tcp_dispatcher = self.dispatcher;
        let tcp_task = tokio::spawn(serve_tcp(self.tcp, tcp_dispatcher));

        tokio::select! {
            res = udp_task => join_result(res),
            res = tcp_task => join_result(res),
        }
    }
}

fn join_result(res: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    match res {
        Ok(inner) => inner,
        Err(e) => Err(io::Error::other(e)),
    }
}

async fn serve_udp(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    udp_max_size: usize,
) -> io::Result<()> {
    let mut buf = vec![0u8; 65535];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let request = buf[..len].to_vec();
        let socket = socket.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.handle(&request, from).await {
                Ok(mut reply) => {
                    codec::truncate_to(&mut reply, udp_max_size);
                    let _ = socket.send_to(&reply, from).await;
                }
                Err(e) => {
                    tracing::debug!(client = %from, error = %e, "dropping malformed client query");
                }
            }
        });
    }
}

async fn serve_tcp(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> io::Result<()> {
    loop {
        let (stream, from) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_tcp_connection(stream, from, dispatcher).await {
                tracing::debug!(client = %from, error = %e, "TCP connection ended");
            }
        });
    }
}

/// One TCP connection may carry multiple pipelined queries; each is framed
/// with the standard two-byte length prefix (spec.md §4.6).
async fn serve_tcp_connection(
    mut stream: TcpStream,
    from: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut request = vec![0u8; len];
        stream.read_exact(&mut request).await?;

        match dispatcher.handle(&request, from).await {
            Ok(reply) => {
                let out_len = u16::try_from(reply.len()).unwrap_or(u16::MAX);
                stream.write_all(&out_len.to_be_bytes()).await?;
                stream.write_all(&reply[..out_len as usize]).await?;
            }
            Err(e) => {
                tracing::debug!(client = %from, error = %e, "dropping malformed client query");
            }
        }
    }
}

fn bind_udp(addr: SocketAddr, reuse_port: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

fn bind_tcp(addr: SocketAddr, reuse_port: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(TCP_BACKLOG)?;
    TcpListener::from_std(socket.into())
}
