//! The accept loop.
//!
//! [`Connector`] listens on a TCP socket and serves every accepted
//! connection on its own tokio task, with a processor taken from a shared
//! [`ProcessorPool`].

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};
use triomphe::Arc;

use crate::adapter::Adapter;
use crate::config::ConnectorConfig;
use crate::connection::ProcessorPool;

/// Idle processors kept between connections.
const DEFAULT_POOL_CAPACITY: usize = 200;

#[derive(Debug)]
pub struct Connector<A> {
    listener: TcpListener,
    config: Arc<ConnectorConfig>,
    pool: Arc<ProcessorPool>,
    adapter: Arc<A>,
}

impl<A> Connector<A>
where
    A: Adapter + Sync + 'static,
{
    /// Binds to `addr`.
    pub async fn bind(addr: impl ToSocketAddrs, config: ConnectorConfig, adapter: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let config = Arc::new(config);
        let pool = Arc::new(ProcessorPool::new(Arc::clone(&config), DEFAULT_POOL_CAPACITY));
        Ok(Self { listener, config, pool, adapter: Arc::new(adapter) })
    }

    /// Binds to all interfaces on the configured port.
    pub async fn bind_port(config: ConnectorConfig, adapter: A) -> io::Result<Self> {
        let port = config.port();
        Self::bind(("0.0.0.0", port), config, adapter).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self) -> io::Result<()> {
        info!(addr = ?self.listener.local_addr()?, "start listening");
        loop {
            let (mut stream, remote_addr) = match self.listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(cause = %e, "failed to set TCP_NODELAY");
            }

            let pool = Arc::clone(&self.pool);
            let adapter = Arc::clone(&self.adapter);
            tokio::spawn(async move {
                debug!(%remote_addr, "accepted connection");
                let mut processor = pool.acquire();
                processor.run(&mut stream, &*adapter).await;
                pool.release(processor);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Exchange;
    use crate::protocol::BoxError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Hello;

    impl Adapter for Hello {
        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
            exchange.response_mut().set_content_length(5);
            exchange.write("hello").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let connector = Connector::bind("127.0.0.1:0", ConnectorConfig::default(), Hello).await.unwrap();
        let addr = connector.local_addr().unwrap();
        tokio::spawn(connector.serve());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("\r\n\r\nhello"));
    }
}
