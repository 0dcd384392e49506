//! Core channel implementation.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::config::ChannelConfig;
use super::error::{ChannelError, ChannelResult};
use crate::buffer::ChunkBuffer;
use crate::wire::{Packet, PacketParser, ServiceType, encode_into};
use fibernet_core::{NetworkProvider, Providers, TaskProvider, TimeProvider};

/// Something that happened on a channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A complete inbound packet.
    Packet(Packet),
    /// The channel failed and is now closed. Emitted once.
    Error(ChannelError),
}

/// Receiving side of a channel's event stream.
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// State shared between the channel handle and its background tasks.
struct ChannelShared {
    /// Framed bytes not yet written to the stream.
    outbound: ChunkBuffer,

    /// Whether a drain loop is scheduled or running.
    sending: bool,

    /// Set once; the channel never reopens.
    closed: Option<ChannelError>,

    events_tx: mpsc::UnboundedSender<ChannelEvent>,

    bytes_sent: u64,
    bytes_received: u64,
}

/// A framed, bidirectional connection.
///
/// Must be created inside a `tokio::task::LocalSet`; the reader and writer
/// run as local tasks. Dropping the channel closes it.
pub struct Channel {
    id: u64,
    service: ServiceType,
    remote_address: Option<String>,
    shared: Rc<RefCell<ChannelShared>>,
    data_to_send: Rc<Notify>,
    shutdown: CancellationToken,
    events_rx: Option<ChannelEvents>,
}

impl Channel {
    /// Wrap an established stream.
    pub fn new<P, S>(
        providers: &P,
        id: u64,
        stream: S,
        service: ServiceType,
        config: ChannelConfig,
    ) -> Self
    where
        P: Providers,
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Rc::new(RefCell::new(ChannelShared {
            outbound: ChunkBuffer::with_chunk_size(config.chunk_size),
            sending: false,
            closed: None,
            events_tx,
            bytes_sent: 0,
            bytes_received: 0,
        }));
        let data_to_send = Rc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let (read_half, write_half) = tokio::io::split(stream);

        providers.task().spawn_task(
            "channel_writer",
            writer_task(
                id,
                shared.clone(),
                data_to_send.clone(),
                shutdown.clone(),
                write_half,
            ),
        );
        providers.task().spawn_task(
            "channel_reader",
            reader_task(
                id,
                shared.clone(),
                shutdown.clone(),
                read_half,
                service,
                config.chunk_size,
            ),
        );

        tracing::debug!(channel = id, ?service, "channel opened");

        Self {
            id,
            service,
            remote_address: None,
            shared,
            data_to_send,
            shutdown,
            events_rx: Some(events_rx),
        }
    }

    /// Connect to `address` through the network provider.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectTimeout`] after
    /// `config.connect_timeout`, or [`ChannelError::ConnectFailed`].
    pub async fn connect<P: Providers>(
        providers: &P,
        id: u64,
        address: &str,
        service: ServiceType,
        config: ChannelConfig,
    ) -> ChannelResult<Self> {
        let stream = providers
            .time()
            .timeout(config.connect_timeout, providers.network().connect(address))
            .await
            .map_err(|_| ChannelError::ConnectTimeout {
                address: address.to_string(),
            })?
            .map_err(|e| ChannelError::ConnectFailed {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(channel = id, address, "connected");
        Ok(Self::new(providers, id, stream, service, config).with_remote_address(address))
    }

    /// Record the remote address for diagnostics.
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Channel id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Frame layout of this channel.
    pub fn service(&self) -> ServiceType {
        self.service
    }

    /// Remote address, when known.
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    /// Whether the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed.is_some()
    }

    /// The error that closed the channel, if any.
    pub fn close_reason(&self) -> Option<ChannelError> {
        self.shared.borrow().closed.clone()
    }

    /// Bytes framed but not yet written.
    pub fn pending_send_bytes(&self) -> usize {
        self.shared.borrow().outbound.len()
    }

    /// Total bytes written to and read from the stream.
    pub fn traffic(&self) -> (u64, u64) {
        let state = self.shared.borrow();
        (state.bytes_sent, state.bytes_received)
    }

    /// Take ownership of the event stream.
    ///
    /// Returns `None` if it was already taken.
    pub fn take_events(&mut self) -> Option<ChannelEvents> {
        self.events_rx.take()
    }

    /// Queue one packet. `actor_id` is ignored on outer channels.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] on a closed channel, or
    /// [`ChannelError::Wire`] if the packet is too large. An oversized
    /// packet does not close the channel.
    pub fn send(&self, opcode: u16, actor_id: u64, body: &[u8]) -> ChannelResult<()> {
        let mut state = self.shared.borrow_mut();
        if state.closed.is_some() {
            return Err(ChannelError::Closed);
        }

        encode_into(&mut state.outbound, self.service, opcode, actor_id, body)?;

        if !state.sending {
            state.sending = true;
            self.data_to_send.notify_one();
        }
        Ok(())
    }

    /// Close the channel without emitting an error event.
    ///
    /// Unsent bytes are discarded. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.borrow_mut();
        if state.closed.is_none() {
            state.closed = Some(ChannelError::Closed);
            state.outbound.clear();
            tracing::debug!(channel = self.id, "channel closed");
        }
        self.shutdown.cancel();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Close the channel because of `error` and report it once.
fn fail(
    id: u64,
    shared: &RefCell<ChannelShared>,
    shutdown: &CancellationToken,
    error: ChannelError,
) {
    let mut state = shared.borrow_mut();
    if state.closed.is_some() {
        return;
    }
    tracing::debug!(channel = id, %error, "channel failed");
    state.closed = Some(error.clone());
    state.outbound.clear();
    let _ = state.events_tx.send(ChannelEvent::Error(error));
    shutdown.cancel();
}

/// Drain the outbound buffer, one front chunk per write.
async fn writer_task<W: AsyncWrite + Unpin>(
    id: u64,
    shared: Rc<RefCell<ChannelShared>>,
    data_to_send: Rc<Notify>,
    shutdown: CancellationToken,
    mut writer: W,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = data_to_send.notified() => {}
        }

        loop {
            // Copy out so no borrow is held across the write.
            let chunk = {
                let mut state = shared.borrow_mut();
                if state.closed.is_some() {
                    return;
                }
                let front = state.outbound.front_slice();
                if front.is_empty() {
                    state.sending = false;
                    break;
                }
                front.to_vec()
            };

            let written = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = writer.write_all(&chunk) => result,
            };
            if let Err(e) = written {
                fail(id, &shared, &shutdown, e.into());
                return;
            }

            let mut state = shared.borrow_mut();
            if state.closed.is_some() {
                return;
            }
            if let Err(e) = state.outbound.consume(chunk.len()) {
                drop(state);
                tracing::error!(channel = id, error = %e, "outbound buffer out of sync");
                fail(id, &shared, &shutdown, crate::wire::WireError::Buffer(e).into());
                return;
            }
            state.bytes_sent += chunk.len() as u64;
        }
    }
}

/// Read into the inbound buffer and emit every complete packet.
async fn reader_task<R: AsyncRead + Unpin>(
    id: u64,
    shared: Rc<RefCell<ChannelShared>>,
    shutdown: CancellationToken,
    mut reader: R,
    service: ServiceType,
    chunk_size: usize,
) {
    let mut inbound = ChunkBuffer::with_chunk_size(chunk_size);
    let mut parser = PacketParser::new(service);
    let events_tx = shared.borrow().events_tx.clone();

    loop {
        let read = {
            let tail = inbound.writable_slice();
            tokio::select! {
                _ = shutdown.cancelled() => return,
                result = reader.read(tail) => result,
            }
        };

        let n = match read {
            Ok(0) => {
                fail(id, &shared, &shutdown, ChannelError::PeerClosed);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                fail(id, &shared, &shutdown, e.into());
                return;
            }
        };
        if let Err(e) = inbound.commit(n) {
            fail(id, &shared, &shutdown, crate::wire::WireError::Buffer(e).into());
            return;
        }
        shared.borrow_mut().bytes_received += n as u64;

        loop {
            match parser.parse(&mut inbound) {
                Ok(true) => {
                    if let Some(packet) = parser.take_packet() {
                        tracing::trace!(channel = id, opcode = packet.opcode, "packet received");
                        if events_tx.send(ChannelEvent::Packet(packet)).is_err() {
                            tracing::debug!(channel = id, "event receiver dropped");
                        }
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(channel = id, error = %e, "framing error");
                    fail(id, &shared, &shutdown, e.into());
                    return;
                }
            }
        }
    }
}
