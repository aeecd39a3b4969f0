//! Framed TCP connections on tokio.
//!
//! Every connection gets a reader task that turns frames into
//! [`NetworkEvent::Message`] and a writer task fed through the outbox
//! handed to the node loop in [`NetworkEvent::PeerConnected`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::codec::{read_frame, write_frame};
use super::{Message, NetworkError, PeerId};

/// Outgoing messages queued per connection
const OUTBOX_CAPACITY: usize = 256;

/// Events reported to the node loop
#[derive(Debug)]
pub enum NetworkEvent {
    /// A connection is up
    PeerConnected {
        /// Connection id
        peer: PeerId,
        /// Remote address
        addr: SocketAddr,
        /// Queue feeding the connection's writer
        outbox: mpsc::Sender<Message>,
    },
    /// A frame arrived
    Message {
        /// Connection id
        peer: PeerId,
        /// Decoded message
        message: Message,
    },
    /// The connection is gone
    PeerDisconnected(PeerId),
}

/// Connection factory sharing one event channel
#[derive(Clone, Debug)]
pub struct Network {
    events: mpsc::Sender<NetworkEvent>,
    next_peer: Arc<AtomicU64>,
}

impl Network {
    /// Create the factory and the receiving end of its events
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NetworkEvent>) {
        let (events, receiver) = mpsc::channel(capacity);
        (
            Self {
                events,
                next_peer: Arc::new(AtomicU64::new(1)),
            },
            receiver,
        )
    }

    /// Accept connections on `addr` in a background task
    ///
    /// # Errors
    /// Returns error if the address cannot be bound
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "listening");
        let network = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        if network.attach(stream, remote).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => warn!(error = %error, "accept failed"),
                }
            }
        });
        Ok(local)
    }

    /// Open a connection to `addr`
    ///
    /// # Errors
    /// Returns error if the address is invalid or unreachable
    pub async fn dial(&self, addr: &str) -> Result<PeerId, NetworkError> {
        let stream = TcpStream::connect(addr).await?;
        let remote = stream
            .peer_addr()
            .map_err(|_| NetworkError::InvalidAddress(addr.to_string()))?;
        self.attach(stream, remote).await
    }

    async fn attach(&self, stream: TcpStream, addr: SocketAddr) -> Result<PeerId, NetworkError> {
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (mut reader, mut writer) = stream.into_split();
        let (outbox, mut queue) = mpsc::channel::<Message>(OUTBOX_CAPACITY);

        self.events
            .send(NetworkEvent::PeerConnected { peer, addr, outbox })
            .await
            .map_err(|_| NetworkError::ChannelClosed)?;
        debug!(peer, addr = %addr, "peer connected");

        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let Err(error) = write_frame(&mut writer, &message).await {
                    debug!(peer, error = %error, "write failed");
                    break;
                }
            }
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(message)) => {
                        if events
                            .send(NetworkEvent::Message { peer, message })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(peer, error = %error, "dropping connection");
                        break;
                    }
                }
            }
            let _ = events.send(NetworkEvent::PeerDisconnected(peer)).await;
        });
        Ok(peer)
    }
}
