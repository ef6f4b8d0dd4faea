use std::{io, time::Duration};

use bytes::{Bytes, BytesMut};
use mxbus_error::{ensure, ClientError, FramingError, MxResult};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, trace};

use crate::{
    network::wire::{frame::LEN_PREFIX, Frame, FrameDecoder},
    pubsub::ComponentId,
};

/// Начальная ёмкость буфера чтения.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Клиентское соединение с брокером.
///
/// Чтение выполняет владелец соединения (цикл событий клиента), запись
/// вынесена в отдельную задачу: кадры передаются ей через неограниченный
/// канал, поэтому отправка никогда не блокирует цикл.
pub struct ClientConnection {
    /// Адрес брокера
    address: String,
    reader: OwnedReadHalf,
    read_buf: BytesMut,
    decoder: FrameDecoder,
    outgoing: Option<mpsc::UnboundedSender<Bytes>>,
    writer: Option<JoinHandle<()>>,
    /// Идентификатор, выданный брокером
    id: ComponentId,
    /// Итоговое имя компонента (с суффиксом `/N`, если имя было занято)
    name: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientConnection {
    /// Подключается к брокеру и выполняет рукопожатие.
    pub async fn connect(
        address: &str,
        name: &str,
        connect_timeout: Duration,
        handshake_timeout: Duration,
        max_frame_len: usize,
    ) -> MxResult<Self> {
        debug!(%address, "Connecting to broker");

        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                address: address.to_string(),
                timeout: connect_timeout,
            })?
            .map_err(|e| ClientError::ConnectFailure {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (mut reader, mut writer) = stream.into_split();
        let decoder = FrameDecoder::new(max_frame_len);
        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

        let hello = Frame::Hello {
            name: name.to_string(),
            host: local_host(),
            pid: std::process::id(),
        };
        let handshake = async {
            writer.write_all(&hello.to_bytes()).await?;
            read_frame(&mut reader, &mut read_buf, &decoder).await
        };

        let reply = timeout(handshake_timeout, handshake)
            .await
            .map_err(|_| ClientError::HandshakeFailed {
                reason: format!("no reply within {handshake_timeout:?}"),
            })?
            .map_err(|e| ClientError::HandshakeFailed {
                reason: e.to_string(),
            })?;

        let (id, name) = match reply {
            Frame::HelloReply { id, name } => (id, name),
            other => {
                return Err(ClientError::HandshakeFailed {
                    reason: format!("expected HelloReply, got {:?}", other.kind()),
                }
                .into())
            }
        };
        debug!(%address, component = %id, %name, "Handshake complete");

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(id, writer, rx));

        Ok(Self {
            address: address.to_string(),
            reader,
            read_buf,
            decoder,
            outgoing: Some(tx),
            writer: Some(writer),
            id,
            name,
        })
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Ставит кадр в очередь на отправку.
    ///
    /// Кадр длиннее `max_frame_len` не отправляется: брокер с тем же лимитом
    /// закрыл бы из-за него всё соединение.
    ///
    /// # Ошибки
    /// - `FramingError::FrameTooLarge`: кадр превышает лимит;
    /// - `ClientError::ConnectionClosed`: задача записи завершилась.
    pub fn send_frame(
        &self,
        frame: &Frame,
    ) -> MxResult<()> {
        let bytes = frame.to_bytes();
        let len = bytes.len() - LEN_PREFIX;
        let max = self.decoder.max_frame_len();
        ensure!(len <= max, FramingError::FrameTooLarge { len, max });

        trace!(kind = ?frame.kind(), len, "Queueing frame");
        let tx = self.outgoing.as_ref().ok_or(ClientError::ConnectionClosed)?;
        tx.send(bytes).map_err(|_| ClientError::ConnectionClosed)?;
        Ok(())
    }

    /// Следующий полностью принятый кадр из буфера, без ожидания сокета.
    pub fn next_buffered(&mut self) -> Result<Option<Frame>, FramingError> {
        self.decoder.decode(&mut self.read_buf)
    }

    /// Дочитывает очередную порцию байт из сокета.
    ///
    /// Отменяема: при отмене данные не теряются. `Ok(0)` означает, что
    /// брокер закрыл соединение.
    pub async fn fill(&mut self) -> io::Result<usize> {
        self.reader.read_buf(&mut self.read_buf).await
    }

    /// Отбрасывает непрочитанные байты (после ошибки разбора поток
    /// рассинхронизирован).
    pub fn discard_buffered(&mut self) {
        self.read_buf.clear();
    }

    /// Закрывает канал записи и ждёт, пока задача записи допишет очередь.
    pub async fn close(
        &mut self,
        flush_timeout: Duration,
    ) {
        self.outgoing.take();
        if let Some(writer) = self.writer.take() {
            if timeout(flush_timeout, writer).await.is_err() {
                debug!(component = %self.id, "Writer did not finish in time");
            }
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("address", &self.address)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("buffered", &self.read_buf.len())
            .field("open", &self.outgoing.is_some())
            .finish()
    }
}

/// Читает ровно один кадр (используется только при рукопожатии).
async fn read_frame(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    decoder: &FrameDecoder,
) -> MxResult<Frame> {
    loop {
        if let Some(frame) = decoder.decode(buf)? {
            return Ok(frame);
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(ClientError::ConnectionClosed.into());
        }
    }
}

/// Пишет кадры из канала в сокет, объединяя готовые кадры в одну запись.
async fn write_loop(
    id: ComponentId,
    writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut writer = BufWriter::new(writer);

    while let Some(frame) = rx.recv().await {
        let mut result = writer.write_all(&frame).await;
        while result.is_ok() {
            match rx.try_recv() {
                Ok(next) => result = writer.write_all(&next).await,
                Err(_) => break,
            }
        }
        if let Err(e) = result.and(writer.flush().await) {
            debug!(component = %id, error = %e, "Write to broker failed");
            return;
        }
    }

    let _ = writer.shutdown().await;
    trace!(component = %id, "Writer finished");
}

fn local_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
