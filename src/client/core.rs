use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fmt,
    io,
    time::Duration,
};

use bytes::Bytes;
use mxbus_error::{bail, ClientError, MxResult, ResultExt};
use tokio::{
    io::AsyncRead,
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    directory::Directory,
    handlers::{
        restore, ComponentEvent, DataCallback, Hook, Hooks, MessageCallback, MessageTypeEvent,
        PublisherEvent, Slot, SubscriberEvent, TimerCallback,
    },
    sources::{DataSourceId, DataSources, SourceEvent},
    wait::PendingWaits,
    ClientConnection,
};
use crate::{
    config::{effective_host, effective_name, effective_port_for},
    network::wire::{Frame, WatchTopic, DEFAULT_MAX_FRAME_LEN},
    pubsub::{ComponentId, Delivery, Envelope, MessageTypeId, Role},
    timer::{deadline_after, TimerId, TimerQueue},
};

/// Конфигурация клиента.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Имя шины; определяет порт по умолчанию
    pub bus: Option<String>,
    /// Хост брокера
    pub host: Option<String>,
    /// Порт брокера
    pub port: Option<u16>,
    /// Желаемое имя компонента; пустое - брокер выберет сам
    pub name: String,
    /// Таймаут подключения
    pub connect_timeout: Duration,
    /// Таймаут рукопожатия и `register`
    pub request_timeout: Duration,
    /// Максимальный размер входящего кадра
    pub max_frame_len: usize,
}

/// Чем завершился `Client::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Вызван `Client::shutdown`
    Shutdown,
    /// Брокер закрыл соединение
    ConnectionLost,
}

/// Результат ожидания ответа.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Received(Delivery),
    TimedOut,
}

/// Исход одного шага цикла событий.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Сработал таймер, обработан кадр или прочитаны байты брокера либо
    /// пользовательского источника
    Progress,
    /// Наступил срок ожидания, ничего не произошло
    Idle,
    /// Соединение потеряно и буфер разобран
    Lost,
}

/// Компонент шины: одно соединение с брокером, локальные таймеры,
/// обработчики сообщений и ожидания ответов.
///
/// Цикл событий однопоточный. Обработчики получают `&mut Client` и могут
/// отправлять сообщения, управлять таймерами, подписками и источниками, вызывать
/// [`Client::shutdown`]; `run`, `await_message`, `send_and_wait` и
/// `register` изнутри обработчика возвращают `ClientError::ReentrantRun`.
pub struct Client {
    conn: ClientConnection,
    config: ClientConfig,
    timers: TimerQueue,
    timer_callbacks: HashMap<TimerId, Slot<TimerCallback>>,
    handlers: HashMap<MessageTypeId, Slot<MessageCallback>>,
    hooks: Hooks,
    directory: Directory,
    /// Типы, которые компонент объявил публикуемыми
    publications: BTreeSet<MessageTypeId>,
    sources: DataSources,
    data_callbacks: HashMap<DataSourceId, Slot<DataCallback>>,
    waits: PendingWaits,
    /// Порядковые номера отправленных `Register`, ответы приходят по порядку
    pending_registers: VecDeque<u64>,
    next_register: u64,
    current_register: Option<u64>,
    register_result: Option<MessageTypeId>,
    dispatch_depth: u32,
    shutdown_requested: bool,
    lost: bool,
}

////////////////////////////////////////////////////////////////////////////////
// ClientConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bus: None,
            host: None,
            port: None,
            name: String::new(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self::default().with_name(name)
    }

    pub fn with_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_bus(
        mut self,
        bus: impl Into<String>,
    ) -> Self {
        self.bus = Some(bus.into());
        self
    }

    pub fn with_host(
        mut self,
        host: impl Into<String>,
    ) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(
        mut self,
        port: u16,
    ) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(
        mut self,
        len: usize,
    ) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Итоговый адрес брокера `host:port`.
    pub fn address(&self) -> String {
        let bus = effective_name(self.bus.as_deref());
        let host = effective_host(self.host.as_deref());
        format!("{host}:{}", effective_port_for(self.port, &bus))
    }
}

////////////////////////////////////////////////////////////////////////////////
// WaitOutcome
////////////////////////////////////////////////////////////////////////////////

impl WaitOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn into_delivery(self) -> Option<Delivery> {
        match self {
            Self::Received(d) => Some(d),
            Self::TimedOut => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Client {
    /// Подключается к брокеру и выполняет рукопожатие.
    ///
    /// # Ошибки
    /// - `ClientError::ConnectFailure` / `ConnectTimeout`: брокер недоступен;
    /// - `ClientError::HandshakeFailed`: брокер не ответил на `Hello`.
    pub async fn connect(config: ClientConfig) -> MxResult<Self> {
        let address = config.address();
        let conn = ClientConnection::connect(
            &address,
            &config.name,
            config.connect_timeout,
            config.request_timeout,
            config.max_frame_len,
        )
        .await
        .with_context(|| format!("connecting to broker at {address}"))?;
        info!(component = %conn.id(), name = %conn.name(), %address, "Connected to broker");

        Ok(Self {
            conn,
            config,
            timers: TimerQueue::new(),
            timer_callbacks: HashMap::new(),
            handlers: HashMap::new(),
            hooks: Hooks::default(),
            directory: Directory::new(),
            publications: BTreeSet::new(),
            sources: DataSources::new(),
            data_callbacks: HashMap::new(),
            waits: PendingWaits::new(),
            pending_registers: VecDeque::new(),
            next_register: 0,
            current_register: None,
            register_result: None,
            dispatch_depth: 0,
            shutdown_requested: false,
            lost: false,
        })
    }

    /// Идентификатор, выданный брокером.
    pub fn id(&self) -> ComponentId {
        self.conn.id()
    }

    /// Итоговое имя компонента.
    pub fn name(&self) -> &str {
        self.conn.name()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `false` после того, как брокер закрыл соединение.
    pub fn is_connected(&self) -> bool {
        !self.lost
    }

    ///////////////////////////////////////////////////////////////////////////
    // Типы сообщений и подписки
    ///////////////////////////////////////////////////////////////////////////

    /// Возвращает идентификатор типа `name`, регистрируя его на брокере.
    ///
    /// Уже известные именованные типы возвращаются без обращения к брокеру.
    /// Пустое имя каждый раз создаёт новый анонимный тип.
    pub async fn register(
        &mut self,
        name: &str,
    ) -> MxResult<MessageTypeId> {
        self.guard("register")?;
        self.release_waits();
        if !name.is_empty() {
            if let Some(id) = self.directory.lookup_type(name) {
                return Ok(id);
            }
        }

        self.next_register += 1;
        let seq = self.next_register;
        self.conn.send_frame(&Frame::Register {
            name: name.to_string(),
        })?;
        self.pending_registers.push_back(seq);
        self.current_register = Some(seq);
        self.register_result = None;

        let timeout = self.config.request_timeout;
        let deadline = deadline_after(Instant::now(), timeout);
        let outcome = loop {
            if let Some(id) = self.register_result.take() {
                break Ok(id);
            }
            match self.step(Some(deadline)).await {
                Ok(Step::Lost) => break Err(ClientError::ConnectionClosed.into()),
                Ok(Step::Idle) if Instant::now() >= deadline => {
                    break Err(ClientError::RequestTimeout {
                        request: format!("register '{name}'"),
                        timeout,
                    }
                    .into())
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };
        self.current_register = None;

        if let Ok(id) = outcome {
            debug!(msg_type = %id, name, "Message type registered");
        }
        outcome
    }

    /// Устанавливает обработчик сообщений типа `msg_type`.
    ///
    /// Один обработчик на тип: повторный вызов заменяет прежний без
    /// повторной подписки на брокере.
    pub fn subscribe<F>(
        &mut self,
        msg_type: MessageTypeId,
        callback: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &Delivery) -> MxResult<()> + Send + 'static,
    {
        let replaced = self
            .handlers
            .insert(msg_type, Slot::Idle(Box::new(callback)))
            .is_some();
        if !replaced {
            self.conn.send_frame(&Frame::Subscribe { msg_type })?;
            debug!(msg_type = %msg_type, "Subscribed");
        }
        Ok(())
    }

    /// Снимает обработчик и отменяет подписку на брокере.
    ///
    /// # Возвращает
    /// `false`, если подписки не было.
    pub fn cancel(
        &mut self,
        msg_type: MessageTypeId,
    ) -> MxResult<bool> {
        if self.handlers.remove(&msg_type).is_none() {
            return Ok(false);
        }
        self.conn.send_frame(&Frame::Unsubscribe { msg_type })?;
        debug!(msg_type = %msg_type, "Subscription cancelled");
        Ok(true)
    }

    /// Объявляет, что компонент публикует `msg_type`.
    ///
    /// Объявление нужно только для обнаружения: другие компоненты видят
    /// публикатора через `on_new_publisher`, а сам компонент начинает
    /// следить за подписчиками типа, чтобы [`Client::subscriber_count`]
    /// был актуален. `broadcast` работает и без объявления.
    pub fn publish(
        &mut self,
        msg_type: MessageTypeId,
    ) -> MxResult<()> {
        if self.publications.insert(msg_type) {
            self.conn.send_frame(&Frame::Publish { msg_type })?;
            debug!(msg_type = %msg_type, "Publication declared");
        }
        self.track(WatchTopic::Subscribers(msg_type))?;
        Ok(())
    }

    /// Снимает объявление публикации.
    ///
    /// # Возвращает
    /// `false`, если тип не был объявлен.
    pub fn withdraw(
        &mut self,
        msg_type: MessageTypeId,
    ) -> MxResult<bool> {
        if !self.publications.remove(&msg_type) {
            return Ok(false);
        }
        self.conn.send_frame(&Frame::Withdraw { msg_type })?;
        debug!(msg_type = %msg_type, "Publication withdrawn");
        Ok(true)
    }

    pub fn is_publishing(
        &self,
        msg_type: MessageTypeId,
    ) -> bool {
        self.publications.contains(&msg_type)
    }

    /// Отправляет конверт одному компоненту. Доставка не подтверждается.
    pub fn send(
        &self,
        target: ComponentId,
        msg_type: MessageTypeId,
        version: u32,
        payload: impl Into<Bytes>,
    ) -> MxResult<()> {
        self.conn.send_frame(&Frame::Send {
            target,
            envelope: Envelope::new(msg_type, version, payload),
        })
    }

    /// Рассылает конверт всем подписчикам типа.
    pub fn broadcast(
        &self,
        msg_type: MessageTypeId,
        version: u32,
        payload: impl Into<Bytes>,
    ) -> MxResult<()> {
        self.conn.send_frame(&Frame::Broadcast {
            envelope: Envelope::new(msg_type, version, payload),
        })
    }

    /// Просит брокер завершить работу.
    pub fn quit_broker(&self) -> MxResult<()> {
        self.conn.send_frame(&Frame::Quit)
    }

    ///////////////////////////////////////////////////////////////////////////
    // Таймеры
    ///////////////////////////////////////////////////////////////////////////

    pub fn create_timer<F>(
        &mut self,
        deadline: Instant,
        callback: F,
    ) -> TimerId
    where
        F: FnMut(&mut Client, TimerId) -> MxResult<()> + Send + 'static,
    {
        let id = self.timers.schedule(deadline, None);
        self.timer_callbacks
            .insert(id, Slot::Idle(Box::new(callback)));
        id
    }

    /// Таймер, срабатывающий в `deadline` и затем каждые `interval`.
    pub fn create_repeating_timer<F>(
        &mut self,
        deadline: Instant,
        interval: Duration,
        callback: F,
    ) -> TimerId
    where
        F: FnMut(&mut Client, TimerId) -> MxResult<()> + Send + 'static,
    {
        let id = self.timers.schedule(deadline, Some(interval));
        self.timer_callbacks
            .insert(id, Slot::Idle(Box::new(callback)));
        id
    }

    /// Переносит таймер. Для уже сработавшего таймера ничего не делает.
    pub fn adjust_timer(
        &mut self,
        id: TimerId,
        deadline: Instant,
    ) -> bool {
        self.timers.adjust(id, deadline)
    }

    pub fn cancel_timer(
        &mut self,
        id: TimerId,
    ) -> bool {
        let known = self.timer_callbacks.remove(&id).is_some();
        self.timers.cancel(id) || known
    }

    ///////////////////////////////////////////////////////////////////////////
    // Пользовательские источники данных
    ///////////////////////////////////////////////////////////////////////////

    /// Добавляет источник, который цикл событий читает вместе с сокетом
    /// брокера. `callback` получает каждую прочитанную порцию, а в конце
    /// потока или при ошибке чтения один раз получает
    /// [`SourceEvent::Closed`], после чего источник снимается.
    pub fn on_data<R, F>(
        &mut self,
        reader: R,
        callback: F,
    ) -> DataSourceId
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: FnMut(&mut Client, DataSourceId, &SourceEvent) -> MxResult<()> + Send + 'static,
    {
        let id = self.sources.add(Box::new(reader));
        self.data_callbacks
            .insert(id, Slot::Idle(Box::new(callback)));
        debug!(source = %id, "Data source added");
        id
    }

    /// Снимает источник без вызова обработчика.
    pub fn drop_data(
        &mut self,
        id: DataSourceId,
    ) -> bool {
        let known = self.data_callbacks.remove(&id).is_some();
        self.sources.remove(id) || known
    }

    ///////////////////////////////////////////////////////////////////////////
    // Обнаружение
    ///////////////////////////////////////////////////////////////////////////

    /// Вызывается для каждого подключившегося компонента, включая уже
    /// подключённые к моменту установки.
    pub fn on_new_component<F>(
        &mut self,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &ComponentEvent) -> MxResult<()> + Send + 'static,
    {
        let mut hook: Hook<ComponentEvent> = Box::new(hook);
        if !self.track(WatchTopic::Components)? {
            let known = self.components();
            self.replay(&mut hook, &known, "new_component");
        }
        self.hooks.new_component.push(hook);
        Ok(())
    }

    pub fn on_end_component<F>(
        &mut self,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &ComponentEvent) -> MxResult<()> + Send + 'static,
    {
        self.track(WatchTopic::Components)?;
        self.hooks.end_component.push(Box::new(hook));
        Ok(())
    }

    /// Вызывается для каждого нового подписчика `msg_type`, включая уже
    /// подписанных.
    pub fn on_new_subscriber<F>(
        &mut self,
        msg_type: MessageTypeId,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &SubscriberEvent) -> MxResult<()> + Send + 'static,
    {
        let mut hook: Hook<SubscriberEvent> = Box::new(hook);
        if !self.track(WatchTopic::Subscribers(msg_type))? {
            let known = self.subscribers(msg_type);
            self.replay(&mut hook, &known, "new_subscriber");
        }
        self.hooks
            .new_subscriber
            .entry(msg_type)
            .or_default()
            .push(hook);
        Ok(())
    }

    pub fn on_end_subscriber<F>(
        &mut self,
        msg_type: MessageTypeId,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &SubscriberEvent) -> MxResult<()> + Send + 'static,
    {
        self.track(WatchTopic::Subscribers(msg_type))?;
        self.hooks
            .end_subscriber
            .entry(msg_type)
            .or_default()
            .push(Box::new(hook));
        Ok(())
    }

    /// Вызывается для каждого компонента, объявившего публикацию
    /// `msg_type`, включая объявивших раньше.
    pub fn on_new_publisher<F>(
        &mut self,
        msg_type: MessageTypeId,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &PublisherEvent) -> MxResult<()> + Send + 'static,
    {
        let mut hook: Hook<PublisherEvent> = Box::new(hook);
        if !self.track(WatchTopic::Publishers(msg_type))? {
            let known = self.publishers(msg_type);
            self.replay(&mut hook, &known, "new_publisher");
        }
        self.hooks
            .new_publisher
            .entry(msg_type)
            .or_default()
            .push(hook);
        Ok(())
    }

    /// Вызывается, когда публикатор снял объявление или отключился.
    pub fn on_end_publisher<F>(
        &mut self,
        msg_type: MessageTypeId,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &PublisherEvent) -> MxResult<()> + Send + 'static,
    {
        self.track(WatchTopic::Publishers(msg_type))?;
        self.hooks
            .end_publisher
            .entry(msg_type)
            .or_default()
            .push(Box::new(hook));
        Ok(())
    }

    /// Начинает следить за подписчиками типа без обработчиков.
    pub fn watch_subscribers(
        &mut self,
        msg_type: MessageTypeId,
    ) -> MxResult<()> {
        self.track(WatchTopic::Subscribers(msg_type)).map(drop)
    }

    pub fn watch_publishers(
        &mut self,
        msg_type: MessageTypeId,
    ) -> MxResult<()> {
        self.track(WatchTopic::Publishers(msg_type)).map(drop)
    }

    /// Вызывается для каждого нового именованного типа, включая уже
    /// зарегистрированные.
    pub fn on_new_message<F>(
        &mut self,
        hook: F,
    ) -> MxResult<()>
    where
        F: FnMut(&mut Client, &MessageTypeEvent) -> MxResult<()> + Send + 'static,
    {
        let mut hook: Hook<MessageTypeEvent> = Box::new(hook);
        if !self.track(WatchTopic::Messages)? {
            let known: Vec<_> = self
                .directory
                .types()
                .map(|(msg_type, name)| MessageTypeEvent {
                    msg_type,
                    name: name.to_string(),
                })
                .collect();
            self.replay(&mut hook, &known, "new_message");
        }
        self.hooks.new_message.push(hook);
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////////////
    // Ожидание ответов и цикл событий
    ///////////////////////////////////////////////////////////////////////////

    /// Ждёт сообщение `expected` от `target` не дольше `timeout`.
    ///
    /// Пока ожидание не завершено, остальные кадры и таймеры обрабатываются
    /// как обычно. Подходящая доставка забирается ожиданием и не попадает
    /// в обработчик подписки. Если future брошен, ожидание до своего срока
    /// блокирует повтор с тем же типом, а доставки идут обработчикам.
    ///
    /// # Ошибки
    /// - `ClientError::DuplicateWait`: ожидание этого типа уже есть;
    /// - `ClientError::ConnectionClosed`: соединение потеряно.
    pub async fn await_message(
        &mut self,
        target: ComponentId,
        timeout: Duration,
        expected: MessageTypeId,
    ) -> MxResult<WaitOutcome> {
        self.guard("await_message")?;
        self.release_waits();
        let now = Instant::now();
        let deadline = deadline_after(now, timeout);
        self.waits.begin(target, expected, deadline, now)?;
        self.wait_for(expected, deadline).await
    }

    /// Отправляет запрос `target` и ждёт ответ типа `reply_type`.
    pub async fn send_and_wait(
        &mut self,
        target: ComponentId,
        timeout: Duration,
        reply_type: MessageTypeId,
        request_type: MessageTypeId,
        version: u32,
        payload: impl Into<Bytes>,
    ) -> MxResult<WaitOutcome> {
        self.guard("send_and_wait")?;
        self.release_waits();
        let now = Instant::now();
        let deadline = deadline_after(now, timeout);
        self.waits.begin(target, reply_type, deadline, now)?;

        if let Err(e) = self.send(target, request_type, version, payload) {
            self.waits.finish(reply_type);
            return Err(e);
        }
        self.wait_for(reply_type, deadline).await
    }

    /// Цикл событий: работает до [`Client::shutdown`] или потери соединения.
    ///
    /// # Ошибки
    /// Некорректный кадр от брокера.
    pub async fn run(&mut self) -> MxResult<RunStatus> {
        self.guard("run")?;
        self.release_waits();
        self.current_register = None;
        debug!(component = %self.id(), "Event loop started");

        let status = loop {
            if std::mem::take(&mut self.shutdown_requested) {
                break RunStatus::Shutdown;
            }
            if self.step(None).await? == Step::Lost {
                break RunStatus::ConnectionLost;
            }
        };

        info!(component = %self.id(), ?status, "Event loop stopped");
        Ok(status)
    }

    /// Просит `run` вернуться после текущего шага. Можно вызывать из
    /// обработчиков.
    pub fn shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Дописывает очередь отправки и закрывает соединение.
    pub async fn close(mut self) {
        let flush_timeout = self.config.request_timeout;
        self.conn.close(flush_timeout).await;
        debug!(component = %self.id(), "Connection closed");
    }

    ///////////////////////////////////////////////////////////////////////////
    // Запросы к локальному справочнику
    ///////////////////////////////////////////////////////////////////////////

    /// Идентификатор именованного типа, если он уже известен клиенту.
    pub fn message_type(
        &self,
        name: &str,
    ) -> Option<MessageTypeId> {
        self.directory.lookup_type(name)
    }

    pub fn message_name(
        &self,
        msg_type: MessageTypeId,
    ) -> Option<&str> {
        self.directory.type_name(msg_type)
    }

    /// Известные компоненты (заполняется после `on_new_component`).
    pub fn components(&self) -> Vec<ComponentEvent> {
        self.directory
            .components()
            .map(|(id, name)| ComponentEvent {
                id,
                name: name.to_string(),
            })
            .collect()
    }

    /// Известные подписчики типа (заполняется после `on_new_subscriber`,
    /// `watch_subscribers` или `publish`).
    pub fn subscribers(
        &self,
        msg_type: MessageTypeId,
    ) -> Vec<SubscriberEvent> {
        self.directory
            .members(Role::Subscriber, msg_type)
            .map(|(id, name)| SubscriberEvent {
                msg_type,
                id,
                name: name.to_string(),
            })
            .collect()
    }

    /// Известные публикаторы типа (заполняется после `on_new_publisher`
    /// или `watch_publishers`).
    pub fn publishers(
        &self,
        msg_type: MessageTypeId,
    ) -> Vec<PublisherEvent> {
        self.directory
            .members(Role::Publisher, msg_type)
            .map(|(id, name)| PublisherEvent {
                msg_type,
                id,
                name: name.to_string(),
            })
            .collect()
    }

    /// Число известных подписчиков типа, включая сам компонент.
    ///
    /// # Возвращает
    /// `None`, если за подписчиками типа никто не следит.
    pub fn subscriber_count(
        &self,
        msg_type: MessageTypeId,
    ) -> Option<usize> {
        self.member_count(Role::Subscriber, msg_type)
    }

    /// Число известных публикаторов типа, включая сам компонент.
    pub fn publisher_count(
        &self,
        msg_type: MessageTypeId,
    ) -> Option<usize> {
        self.member_count(Role::Publisher, msg_type)
    }

    ///////////////////////////////////////////////////////////////////////////
    // Внутреннее
    ///////////////////////////////////////////////////////////////////////////

    fn guard(
        &self,
        operation: &'static str,
    ) -> MxResult<()> {
        if self.dispatch_depth > 0 {
            bail!(ClientError::ReentrantRun { operation });
        }
        Ok(())
    }

    fn member_count(
        &self,
        role: Role,
        msg_type: MessageTypeId,
    ) -> Option<usize> {
        self.directory
            .is_watching(WatchTopic::members(role, msg_type))
            .then(|| self.directory.members(role, msg_type).count())
    }

    /// Отмечает тему как наблюдаемую и при первом обращении отправляет
    /// `Watch`.
    ///
    /// # Возвращает
    /// `true`, если тема до этого не наблюдалась.
    fn track(
        &mut self,
        topic: WatchTopic,
    ) -> MxResult<bool> {
        if !self.directory.watch(topic) {
            return Ok(false);
        }
        self.watch(topic)?;
        Ok(true)
    }

    /// Отдаёт обработчикам доставки, оставшиеся у брошенных ожиданий.
    fn release_waits(&mut self) {
        for delivery in self.waits.release() {
            self.deliver(delivery);
        }
    }

    fn watch(
        &mut self,
        topic: WatchTopic,
    ) -> MxResult<()> {
        debug!(?topic, "Watching");
        self.conn.send_frame(&Frame::Watch { topic })
    }

    /// Один шаг цикла: таймеры, затем разобранный кадр, затем ожидание
    /// сокета, пользовательского источника или ближайшего срока.
    async fn step(
        &mut self,
        wake_at: Option<Instant>,
    ) -> MxResult<Step> {
        if self.fire_due_timers() {
            return Ok(Step::Progress);
        }

        match self.conn.next_buffered() {
            Ok(Some(frame)) => {
                self.dispatch(frame);
                return Ok(Step::Progress);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Malformed frame from broker, dropping connection");
                self.conn.discard_buffered();
                self.lost = true;
                return Err(e.into());
            }
        }

        if self.lost {
            return Ok(Step::Lost);
        }

        let wake = match (self.timers.next_deadline(), wake_at) {
            (Some(timer), Some(wait)) => Some(timer.min(wait)),
            (timer, wait) => timer.or(wait),
        };
        let sleep_at = wake.unwrap_or_else(Instant::now);

        select! {
            // Уже пришедшие байты важнее истёкшего срока.
            biased;
            read = self.conn.fill() => match read {
                Ok(0) => {
                    debug!("Broker closed the connection");
                    self.lost = true;
                }
                Ok(n) => trace!(bytes = n, "Read from broker"),
                Err(e) => {
                    debug!(error = %e, "Read from broker failed");
                    self.lost = true;
                }
            },
            (id, read) = self.sources.ready(), if !self.sources.is_empty() => {
                self.source_ready(id, read);
            }
            _ = sleep_until(sleep_at), if wake.is_some() => return Ok(Step::Idle),
        }
        Ok(Step::Progress)
    }

    async fn wait_for(
        &mut self,
        expected: MessageTypeId,
        deadline: Instant,
    ) -> MxResult<WaitOutcome> {
        loop {
            if let Some(delivery) = self.waits.take_result(expected) {
                return Ok(WaitOutcome::Received(delivery));
            }
            match self.step(Some(deadline)).await {
                Ok(Step::Lost) => {
                    self.waits.finish(expected);
                    return Err(ClientError::ConnectionClosed.into());
                }
                Ok(Step::Idle) if Instant::now() >= deadline => {
                    self.waits.finish(expected);
                    trace!(msg_type = %expected, "Wait timed out");
                    return Ok(WaitOutcome::TimedOut);
                }
                Ok(_) => {}
                Err(e) => {
                    self.waits.finish(expected);
                    return Err(e);
                }
            }
        }
    }

    /// Запускает обработчики всех наступивших таймеров.
    fn fire_due_timers(&mut self) -> bool {
        let due = self.timers.pop_due(Instant::now());
        if due.is_empty() {
            return false;
        }

        for expired in due {
            let id = expired.id;
            let one_shot = !self.timers.contains(id);
            let callback = if one_shot {
                match self.timer_callbacks.remove(&id) {
                    Some(Slot::Idle(cb)) => Some(cb),
                    _ => None,
                }
            } else {
                self.timer_callbacks.get_mut(&id).and_then(Slot::take)
            };
            // Отменён обработчиком, сработавшим раньше в этом же шаге.
            let Some(mut cb) = callback else {
                continue;
            };

            if let Err(e) = self.guarded(|client| cb(client, id)) {
                error!(timer = %id, error = %e, "Timer callback failed");
            }
            if !one_shot {
                restore(&mut self.timer_callbacks, &id, cb);
            }
        }
        true
    }

    fn dispatch(
        &mut self,
        frame: Frame,
    ) {
        match frame {
            Frame::Deliver { source, envelope } => self.deliver(Delivery { source, envelope }),
            Frame::RegisterReply { msg_type, name } => {
                self.directory.record_type(msg_type, &name);
                let seq = self.pending_registers.pop_front();
                if seq.is_some() && seq == self.current_register {
                    self.register_result = Some(msg_type);
                }
            }
            Frame::NotifyNewComponent { id, name } => {
                self.directory.component_joined(id, &name);
                let event = ComponentEvent { id, name };
                self.run_hooks(|h| &mut h.new_component, &event, "new_component");
            }
            Frame::NotifyEndComponent { id, name } => {
                self.directory.component_left(id);
                let event = ComponentEvent { id, name };
                self.run_hooks(|h| &mut h.end_component, &event, "end_component");
            }
            Frame::NotifyNewSubscriber { msg_type, id, name } => {
                self.directory
                    .member_joined(Role::Subscriber, msg_type, id, &name);
                let event = SubscriberEvent { msg_type, id, name };
                self.run_hooks(
                    |h| h.new_subscriber.entry(msg_type).or_default(),
                    &event,
                    "new_subscriber",
                );
            }
            Frame::NotifyEndSubscriber { msg_type, id, name } => {
                self.directory
                    .member_left(Role::Subscriber, msg_type, id);
                let event = SubscriberEvent { msg_type, id, name };
                self.run_hooks(
                    |h| h.end_subscriber.entry(msg_type).or_default(),
                    &event,
                    "end_subscriber",
                );
            }
            Frame::NotifyNewPublisher { msg_type, id, name } => {
                self.directory
                    .member_joined(Role::Publisher, msg_type, id, &name);
                let event = PublisherEvent { msg_type, id, name };
                self.run_hooks(
                    |h| h.new_publisher.entry(msg_type).or_default(),
                    &event,
                    "new_publisher",
                );
            }
            Frame::NotifyEndPublisher { msg_type, id, name } => {
                self.directory
                    .member_left(Role::Publisher, msg_type, id);
                let event = PublisherEvent { msg_type, id, name };
                self.run_hooks(
                    |h| h.end_publisher.entry(msg_type).or_default(),
                    &event,
                    "end_publisher",
                );
            }
            Frame::NotifyNewMessage { msg_type, name } => {
                self.directory.record_type(msg_type, &name);
                let event = MessageTypeEvent { msg_type, name };
                self.run_hooks(|h| &mut h.new_message, &event, "new_message");
            }
            other => warn!(kind = ?other.kind(), "Unexpected frame from broker ignored"),
        }
    }

    fn deliver(
        &mut self,
        delivery: Delivery,
    ) {
        let Some(delivery) = self.waits.offer(delivery, Instant::now()) else {
            trace!("Delivery claimed by a pending wait");
            return;
        };

        let msg_type = delivery.msg_type();
        let Some(mut cb) = self.handlers.get_mut(&msg_type).and_then(Slot::take) else {
            debug!(msg_type = %msg_type, source = %delivery.source, "No handler for delivered message");
            return;
        };

        if let Err(e) = self.guarded(|client| cb(client, &delivery)) {
            error!(msg_type = %msg_type, source = %delivery.source, error = %e, "Message callback failed");
        }
        restore(&mut self.handlers, &msg_type, cb);
    }

    /// Передаёт обработчику порцию данных источника или его закрытие.
    fn source_ready(
        &mut self,
        id: DataSourceId,
        read: io::Result<Bytes>,
    ) {
        let event = match read {
            Ok(data) if data.is_empty() => {
                debug!(source = %id, "Data source reached end of stream");
                SourceEvent::Closed
            }
            Ok(data) => {
                trace!(source = %id, bytes = data.len(), "Read from data source");
                SourceEvent::Data(data)
            }
            Err(e) => {
                warn!(source = %id, error = %e, "Data source read failed, dropping it");
                SourceEvent::Closed
            }
        };

        let closed = event == SourceEvent::Closed;
        let callback = if closed {
            self.sources.remove(id);
            match self.data_callbacks.remove(&id) {
                Some(Slot::Idle(cb)) => Some(cb),
                _ => None,
            }
        } else {
            self.data_callbacks.get_mut(&id).and_then(Slot::take)
        };
        let Some(mut cb) = callback else {
            return;
        };

        if let Err(e) = self.guarded(|client| cb(client, id, &event)) {
            error!(source = %id, error = %e, "Data callback failed");
        }
        if !closed {
            restore(&mut self.data_callbacks, &id, cb);
        }
    }

    /// Вызывает обработчики темы. Обработчики, добавленные во время
    /// вызова, сохраняются после существующих.
    fn run_hooks<E: 'static>(
        &mut self,
        pick: impl Fn(&mut Hooks) -> &mut Vec<Hook<E>>,
        event: &E,
        topic: &'static str,
    ) {
        let mut hooks = std::mem::take(pick(&mut self.hooks));
        for hook in hooks.iter_mut() {
            if let Err(e) = self.guarded(|client| hook(client, event)) {
                error!(hook = topic, error = %e, "Discovery hook failed");
            }
        }
        let added = std::mem::replace(pick(&mut self.hooks), hooks);
        pick(&mut self.hooks).extend(added);
    }

    /// Проигрывает новому обработчику уже известное состояние.
    fn replay<E: 'static>(
        &mut self,
        hook: &mut Hook<E>,
        events: &[E],
        topic: &'static str,
    ) {
        for event in events {
            if let Err(e) = self.guarded(|client| hook(client, event)) {
                error!(hook = topic, error = %e, "Discovery hook failed during replay");
            }
        }
    }

    /// Выполняет обработчик с поднятым счётчиком вложенности.
    fn guarded(
        &mut self,
        f: impl FnOnce(&mut Client) -> MxResult<()>,
    ) -> MxResult<()> {
        self.dispatch_depth += 1;
        let result = f(self);
        self.dispatch_depth -= 1;
        result
    }
}

impl fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Client")
            .field("conn", &self.conn)
            .field("timers", &self.timers.len())
            .field("handlers", &self.handlers.len())
            .field("hooks", &self.hooks)
            .field("publications", &self.publications)
            .field("sources", &self.sources.len())
            .field("waits", &self.waits.len())
            .field("lost", &self.lost)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
