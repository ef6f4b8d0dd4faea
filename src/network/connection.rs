use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use mxbus_error::BrokerError;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::{mpsc, watch, Notify},
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, trace, warn};

use super::{
    connection_state::CloseReason,
    outbox::{outbox, OutboxReceiver},
    server::BrokerConfig,
    wire::{Frame, FrameDecoder},
};
use crate::{
    pubsub::{ComponentId, Control, Router},
    timer::deadline_after,
};

/// Начальная ёмкость буфера чтения.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Обработчик отдельного соединения брокера.
///
/// Читающая половина разбирает кадры и передаёт их маршрутизатору;
/// пишущая половина живёт в отдельной задаче и вычитывает очередь
/// исходящих кадров.
pub struct ConnectionHandler {
    id: ComponentId,
    peer: SocketAddr,
    reader: OwnedReadHalf,
    router: Arc<Router>,
    config: Arc<BrokerConfig>,
    closed: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    /// Обслуживает соединение до его закрытия и отсоединяет компонент.
    pub async fn serve(
        socket: TcpStream,
        peer: SocketAddr,
        router: Arc<Router>,
        config: Arc<BrokerConfig>,
    ) {
        let (tx, rx) = outbox(config.outbound_queue_frames);
        let OutboxReceiver { frames, closed } = rx;
        let id = router.attach(peer, tx);
        debug!(component = %id, %peer, "Connection accepted");

        let (reader, writer) = socket.into_split();
        let write_timeout = config.write_timeout;
        let writer = tokio::spawn(write_loop(id, writer, frames, write_timeout));
        let abort = writer.abort_handle();

        let handler = Self {
            id,
            peer,
            reader,
            shutdown: router.shutdown_signal(),
            router: router.clone(),
            config,
            closed,
        };
        let reason = handler.run().await;

        router.detach(id, reason);

        match reason {
            CloseReason::SlowConsumer | CloseReason::ProtocolError | CloseReason::HandshakeTimeout => {
                abort.abort();
            }
            CloseReason::PeerClosed | CloseReason::Shutdown => {
                // Очередь закрыта после detach: писатель дописывает остаток и выходит.
                if timeout(write_timeout, writer).await.is_err() {
                    abort.abort();
                }
            }
        }
        debug!(component = %id, %peer, ?reason, "Connection closed");
    }

    async fn run(mut self) -> CloseReason {
        let decoder = FrameDecoder::new(self.config.max_frame_len);
        let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
        let handshake_deadline = deadline_after(Instant::now(), self.config.handshake_timeout);
        let mut active = false;

        if *self.shutdown.borrow() {
            return CloseReason::Shutdown;
        }

        loop {
            // Сначала разбираем всё, что уже в буфере.
            loop {
                let frame = match decoder.decode(&mut buf) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(component = %self.id, peer = %self.peer, error = %e, "Framing error, closing connection");
                        return CloseReason::ProtocolError;
                    }
                };
                trace!(component = %self.id, kind = ?frame.kind(), "Frame received");

                let is_hello = matches!(frame, Frame::Hello { .. });
                match self.router.handle(self.id, frame) {
                    Ok(Control::Continue) => active |= is_hello,
                    // Маршрутизатор уже закрыл компонент (очередь переполнена
                    // или писатель завершился).
                    Ok(Control::Close) => return CloseReason::SlowConsumer,
                    Ok(Control::Shutdown) => return CloseReason::Shutdown,
                    Err(e) => {
                        warn!(component = %self.id, "{e}");
                        return CloseReason::ProtocolError;
                    }
                }
            }

            select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return CloseReason::Shutdown;
                    }
                }
                _ = self.closed.notified() => {
                    return CloseReason::SlowConsumer;
                }
                _ = sleep_until(handshake_deadline), if !active => {
                    let err = BrokerError::HandshakeTimeout {
                        peer: self.peer.to_string(),
                        timeout_ms: self.config.handshake_timeout.as_millis() as u64,
                    };
                    warn!("{err}");
                    return CloseReason::HandshakeTimeout;
                }
                read = self.reader.read_buf(&mut buf) => match read {
                    Ok(0) => return CloseReason::PeerClosed,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(component = %self.id, error = %e, "Read failed");
                        return CloseReason::PeerClosed;
                    }
                },
            }
        }
    }
}

/// Переносит кадры из очереди в сокет, пока очередь не закрыта.
async fn write_loop(
    id: ComponentId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
) -> io::Result<()> {
    while let Some(frame) = frames.recv().await {
        match timeout(write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(component = %id, error = %e, "Write failed");
                return Err(e);
            }
            Err(_) => {
                warn!(component = %id, ?write_timeout, "Write timed out");
                return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
            }
        }
    }
    writer.shutdown().await
}
