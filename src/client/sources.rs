//! Пользовательские источники байтов, которые цикл событий клиента
//! опрашивает наравне с сокетом брокера.
//!
//! Источник задаётся любым `AsyncRead`: половиной сокета, каналом,
//! `tokio::io::duplex` в тестах. Источники опрашиваются по кругу, чтобы
//! один говорливый источник не мешал остальным.

use std::{
    collections::BTreeMap,
    fmt,
    future::poll_fn,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

/// Сколько байт читается из источника за один раз.
pub const READ_CHUNK: usize = 8 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Идентификатор источника, выданный `Client::on_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataSourceId(pub u64);

/// Что произошло с источником.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Прочитана очередная порция байт
    Data(Bytes),
    /// Конец потока или ошибка чтения; источник уже снят
    Closed,
}

/// Набор источников с круговым опросом.
#[derive(Default)]
pub struct DataSources {
    readers: BTreeMap<DataSourceId, BoxedReader>,
    next_id: u64,
    /// С какого идентификатора начинать следующий опрос
    cursor: u64,
}

////////////////////////////////////////////////////////////////////////////////
// DataSourceId
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for DataSourceId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        reader: BoxedReader,
    ) -> DataSourceId {
        self.next_id += 1;
        let id = DataSourceId(self.next_id);
        self.readers.insert(id, reader);
        id
    }

    pub fn remove(
        &mut self,
        id: DataSourceId,
    ) -> bool {
        self.readers.remove(&id).is_some()
    }

    pub fn contains(
        &self,
        id: DataSourceId,
    ) -> bool {
        self.readers.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// Ждёт, пока один из источников что-нибудь вернёт.
    ///
    /// Пустой `Ok` означает конец потока. Future можно бросить в любой
    /// момент: прочитанные байты возвращаются сразу, а не копятся внутри.
    /// На пустом наборе никогда не завершается.
    pub async fn ready(&mut self) -> (DataSourceId, io::Result<Bytes>) {
        poll_fn(|cx| self.poll_ready(cx)).await
    }

    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<(DataSourceId, io::Result<Bytes>)> {
        let start = DataSourceId(self.cursor);
        let order: Vec<DataSourceId> = self
            .readers
            .range(start..)
            .chain(self.readers.range(..start))
            .map(|(id, _)| *id)
            .collect();

        let mut chunk = [0u8; READ_CHUNK];
        for id in order {
            let Some(reader) = self.readers.get_mut(&id) else {
                continue;
            };
            let mut buf = ReadBuf::new(&mut chunk);
            let read = match Pin::new(reader).poll_read(cx, &mut buf) {
                Poll::Ready(Ok(())) => Ok(Bytes::copy_from_slice(buf.filled())),
                Poll::Ready(Err(e)) => Err(e),
                Poll::Pending => continue,
            };
            self.cursor = id.0 + 1;
            return Poll::Ready((id, read));
        }
        Poll::Pending
    }
}

impl fmt::Debug for DataSources {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DataSources")
            .field("ids", &self.readers.keys().collect::<Vec<_>>())
            .field("cursor", &self.cursor)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
