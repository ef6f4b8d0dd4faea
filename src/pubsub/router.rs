use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    net::SocketAddr,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use mxbus_error::BrokerError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    message_types::MessageTypeRegistry, ComponentId, Envelope, MessageTypeId, Role,
};
use crate::network::{
    connection_registry::ConnectionRegistry,
    connection_state::{CloseReason, ComponentSnapshot, ConnectionState},
    outbox::{Outbox, PushError},
    wire::{Frame, WatchTopic},
};

/// Получает ли отправитель собственную широковещательную рассылку.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastEcho {
    /// Получает, если сам подписан на тип
    #[default]
    IfSubscribed,
    /// Не получает никогда
    Never,
}

/// Что делать соединению после обработки кадра.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Соединение уже закрыто маршрутизатором
    Close,
    /// Получен `Quit`: брокер останавливается
    Shutdown,
}

/// Счётчики маршрутизатора.
#[derive(Debug, Default)]
pub struct RouterStats {
    pub frames_routed: AtomicU64,
    pub broadcasts: AtomicU64,
    pub deliveries: AtomicU64,
    pub unknown_targets: AtomicU64,
    pub slow_consumers: AtomicU64,
}

/// Снимок счётчиков для `BrokerHandle::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    pub frames_routed: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub unknown_targets: u64,
    pub slow_consumers: u64,
    pub components: usize,
    pub message_types: usize,
}

/// Ядро брокера.
///
/// Всё состояние (соединения, типы, подписки) находится под одной
/// блокировкой. Исходящие кадры ставятся в очереди соединений без ожидания,
/// поэтому блокировка никогда не удерживается через `.await`.
#[derive(Debug)]
pub struct Router {
    state: Mutex<RouterState>,
    echo: BroadcastEcho,
    stats: RouterStats,
    shutdown: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct RouterState {
    connections: ConnectionRegistry,
    types: MessageTypeRegistry,
    /// Индекс подписчиков по типу; зеркало `ComponentEntry::subscriptions`
    subscribers: HashMap<MessageTypeId, BTreeSet<ComponentId>>,
    /// Индекс публикаторов; зеркало `ComponentEntry::publications`
    publishers: HashMap<MessageTypeId, BTreeSet<ComponentId>>,
    /// Соединения, которые нужно закрыть после текущей операции
    doomed: Vec<(ComponentId, CloseReason)>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Router {
    pub fn new(echo: BroadcastEcho) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(RouterState::default()),
            echo,
            stats: RouterStats::default(),
            shutdown,
        }
    }

    pub fn echo(&self) -> BroadcastEcho {
        self.echo
    }

    /// Приёмник сигнала остановки брокера.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Регистрирует принятое соединение (состояние `Connecting`).
    pub fn attach(
        &self,
        peer: SocketAddr,
        outbox: Outbox,
    ) -> ComponentId {
        self.state.lock().connections.register(peer, outbox)
    }

    /// Применяет входящий кадр соединения `id`.
    ///
    /// # Возвращает
    /// - `Ok(Control)`: продолжать, закрыть или остановить брокер;
    /// - `Err(BrokerError::ProtocolViolation)`: кадр недопустим, соединение
    ///   следует закрыть.
    pub fn handle(
        &self,
        id: ComponentId,
        frame: Frame,
    ) -> Result<Control, BrokerError> {
        let mut st = self.state.lock();
        let Some(entry) = st.connections.get_mut(id) else {
            return Ok(Control::Close);
        };
        entry.stats.frames_in += 1;
        let state = entry.meta.state;
        let peer = entry.meta.peer;
        self.stats.frames_routed.fetch_add(1, Ordering::Relaxed);

        let violation = |reason: String| BrokerError::ProtocolViolation {
            peer: peer.to_string(),
            reason,
        };

        let result = match (state, frame) {
            (ConnectionState::Closed, _) => Ok(Control::Close),
            (ConnectionState::Connecting, Frame::Hello { name, host, pid }) => {
                st.hello(&self.stats, id, &name, &host, pid);
                Ok(Control::Continue)
            }
            (ConnectionState::Connecting, other) => Err(violation(format!(
                "expected Hello, got {:?}",
                other.kind()
            ))),
            (ConnectionState::Active, Frame::Hello { .. }) => {
                Err(violation("second Hello".to_string()))
            }
            (ConnectionState::Active, Frame::Register { name }) => {
                st.register(&self.stats, id, &name);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Subscribe { msg_type }) => {
                st.join(&self.stats, Role::Subscriber, id, msg_type);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Unsubscribe { msg_type }) => {
                st.leave(&self.stats, Role::Subscriber, id, msg_type);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Publish { msg_type }) => {
                st.join(&self.stats, Role::Publisher, id, msg_type);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Withdraw { msg_type }) => {
                st.leave(&self.stats, Role::Publisher, id, msg_type);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Send { target, envelope }) => {
                st.send(&self.stats, id, target, envelope);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Broadcast { envelope }) => {
                st.broadcast(&self.stats, self.echo, id, envelope);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Watch { topic }) => {
                st.watch(&self.stats, id, topic);
                Ok(Control::Continue)
            }
            (ConnectionState::Active, Frame::Quit) => {
                info!(component = %id, "Quit requested, shutting down broker");
                self.request_shutdown();
                Ok(Control::Shutdown)
            }
            (ConnectionState::Active, other) => Err(violation(format!(
                "{:?} is a broker-to-component frame",
                other.kind()
            ))),
        };

        st.reap(&self.stats);

        // Собственная очередь могла переполниться во время обработки.
        match (&result, st.connections.is_active(id)) {
            (Ok(Control::Continue), false) if state.is_active() => Ok(Control::Close),
            _ => result,
        }
    }

    /// Удаляет соединение: рассылает уведомления об уходе и освобождает id.
    pub fn detach(
        &self,
        id: ComponentId,
        reason: CloseReason,
    ) {
        let mut st = self.state.lock();
        st.doomed.push((id, reason));
        st.reap(&self.stats);
        st.connections.unregister(id);
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        let st = self.state.lock();
        RouterStatsSnapshot {
            frames_routed: self.stats.frames_routed.load(Ordering::Relaxed),
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            unknown_targets: self.stats.unknown_targets.load(Ordering::Relaxed),
            slow_consumers: self.stats.slow_consumers.load(Ordering::Relaxed),
            components: st.connections.active_count(),
            message_types: st.types.len(),
        }
    }

    pub fn components(&self) -> Vec<ComponentSnapshot> {
        self.state.lock().connections.all_snapshots()
    }

    /// Текущие подписчики типа.
    pub fn subscribers_of(
        &self,
        msg_type: MessageTypeId,
    ) -> Vec<ComponentId> {
        self.members_of(Role::Subscriber, msg_type)
    }

    pub fn publishers_of(
        &self,
        msg_type: MessageTypeId,
    ) -> Vec<ComponentId> {
        self.members_of(Role::Publisher, msg_type)
    }

    fn members_of(
        &self,
        role: Role,
        msg_type: MessageTypeId,
    ) -> Vec<ComponentId> {
        self.state
            .lock()
            .index(role)
            .get(&msg_type)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn message_type(
        &self,
        name: &str,
    ) -> Option<MessageTypeId> {
        self.state.lock().types.lookup(name)
    }
}

impl RouterState {
    fn hello(
        &mut self,
        stats: &RouterStats,
        id: ComponentId,
        requested: &str,
        host: &str,
        pid: u32,
    ) {
        let Some(name) = self.connections.activate(id, requested, host, pid) else {
            return;
        };
        info!(component = %id, name = %name, host, pid, "Component connected");

        self.push(
            stats,
            id,
            Frame::HelloReply {
                id,
                name: name.clone(),
            }
            .to_bytes(),
        );

        // Сам компонент ещё ни за чем не следит.
        self.notify(stats, WatchTopic::Components, Frame::NotifyNewComponent { id, name });
    }

    fn register(
        &mut self,
        stats: &RouterStats,
        id: ComponentId,
        name: &str,
    ) {
        let reg = self.types.register(name);
        if reg.created {
            debug!(msg_type = %reg.id, name, "Message type registered");
        }

        self.push(
            stats,
            id,
            Frame::RegisterReply {
                msg_type: reg.id,
                name: name.to_string(),
            }
            .to_bytes(),
        );

        if reg.created && !name.is_empty() {
            let frame = Frame::NotifyNewMessage {
                msg_type: reg.id,
                name: name.to_string(),
            };
            self.notify(stats, WatchTopic::Messages, frame);
        }
    }

    /// Добавляет `id` к участникам типа в роли `role`. Повтор ничего не
    /// меняет и ничего не рассылает.
    fn join(
        &mut self,
        stats: &RouterStats,
        role: Role,
        id: ComponentId,
        msg_type: MessageTypeId,
    ) {
        if !self.types.contains(msg_type) {
            warn!(component = %id, msg_type = %msg_type, ?role, "Unknown message type ignored");
            return;
        }
        let Some(entry) = self.connections.get_mut(id) else {
            return;
        };
        if !entry.roles_mut(role).insert(msg_type) {
            return;
        }
        let name = entry.meta.name.clone();
        self.index_mut(role).entry(msg_type).or_default().insert(id);
        debug!(component = %id, msg_type = %msg_type, ?role, "Role taken");

        let frame = Frame::role_joined(role, msg_type, id, name);
        self.notify(stats, WatchTopic::members(role, msg_type), frame);
    }

    fn leave(
        &mut self,
        stats: &RouterStats,
        role: Role,
        id: ComponentId,
        msg_type: MessageTypeId,
    ) {
        if !self.types.contains(msg_type) {
            warn!(component = %id, msg_type = %msg_type, ?role, "Unknown message type ignored");
            return;
        }
        let Some(entry) = self.connections.get_mut(id) else {
            return;
        };
        if !entry.roles_mut(role).remove(&msg_type) {
            return;
        }
        let name = entry.meta.name.clone();
        self.remove_member(role, msg_type, id);
        debug!(component = %id, msg_type = %msg_type, ?role, "Role dropped");

        let frame = Frame::role_left(role, msg_type, id, name);
        self.notify(stats, WatchTopic::members(role, msg_type), frame);
    }

    fn send(
        &mut self,
        stats: &RouterStats,
        source: ComponentId,
        target: ComponentId,
        envelope: Envelope,
    ) {
        if !self.connections.is_active(target) {
            stats.unknown_targets.fetch_add(1, Ordering::Relaxed);
            let err = BrokerError::UnknownTarget { target: target.0 };
            debug!(component = %source, msg_type = %envelope.msg_type, "{err}");
            return;
        }
        let frame = Frame::Deliver { source, envelope }.to_bytes();
        if self.push(stats, target, frame) {
            stats.deliveries.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn broadcast(
        &mut self,
        stats: &RouterStats,
        echo: BroadcastEcho,
        source: ComponentId,
        envelope: Envelope,
    ) {
        stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        let recipients: Vec<ComponentId> = match self.subscribers.get(&envelope.msg_type) {
            Some(set) => set
                .iter()
                .copied()
                .filter(|id| echo == BroadcastEcho::IfSubscribed || *id != source)
                .collect(),
            None => return,
        };

        let frame = Frame::Deliver { source, envelope }.to_bytes();
        for target in recipients {
            if self.push(stats, target, frame.clone()) {
                stats.deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn watch(
        &mut self,
        stats: &RouterStats,
        id: ComponentId,
        topic: WatchTopic,
    ) {
        let Some(entry) = self.connections.get_mut(id) else {
            return;
        };

        entry.watches.insert(topic);

        let replay: Vec<Bytes> = match topic {
            WatchTopic::Components => self
                .connections
                .active()
                .filter(|e| e.meta.id != id)
                .map(|e| {
                    Frame::NotifyNewComponent {
                        id: e.meta.id,
                        name: e.meta.name.clone(),
                    }
                    .to_bytes()
                })
                .collect(),
            WatchTopic::Messages => self
                .types
                .named()
                .map(|(msg_type, name)| {
                    Frame::NotifyNewMessage {
                        msg_type,
                        name: name.to_string(),
                    }
                    .to_bytes()
                })
                .collect(),
            WatchTopic::Subscribers(msg_type) => self.replay_members(Role::Subscriber, msg_type),
            WatchTopic::Publishers(msg_type) => self.replay_members(Role::Publisher, msg_type),
        };
        debug!(component = %id, ?topic, replayed = replay.len(), "Watch registered");

        for frame in replay {
            self.push(stats, id, frame);
        }
    }

    /// Уведомления `NotifyNew*` обо всех текущих участниках типа.
    fn replay_members(
        &self,
        role: Role,
        msg_type: MessageTypeId,
    ) -> Vec<Bytes> {
        self.index(role)
            .get(&msg_type)
            .into_iter()
            .flatten()
            .filter_map(|member| {
                let name = self.connections.name_of(*member)?;
                Some(Frame::role_joined(role, msg_type, *member, name.to_string()).to_bytes())
            })
            .collect()
    }

    /// Рассылает кадр всем, кто следит за `topic`.
    fn notify(
        &mut self,
        stats: &RouterStats,
        topic: WatchTopic,
        frame: Frame,
    ) {
        let frame = frame.to_bytes();
        for watcher in self.connections.watchers(topic) {
            self.push(stats, watcher, frame.clone());
        }
    }

    /// Ставит кадр в очередь активного компонента.
    ///
    /// Переполненная или закрытая очередь помечает компонент к закрытию;
    /// само закрытие выполняет `reap`.
    fn push(
        &mut self,
        stats: &RouterStats,
        target: ComponentId,
        frame: Bytes,
    ) -> bool {
        let Some(entry) = self.connections.get_mut(target) else {
            return false;
        };
        if !entry.meta.state.is_active() {
            return false;
        }
        let len = frame.len();
        match entry.outbox.try_push(frame) {
            Ok(()) => {
                entry.stats.record_out(len);
                true
            }
            Err(PushError::Full) => {
                let err = BrokerError::SlowConsumer {
                    component: target.0,
                    queued: entry.outbox.queued(),
                };
                warn!(name = %entry.meta.name, "{err}");
                stats.slow_consumers.fetch_add(1, Ordering::Relaxed);
                self.doomed.push((target, CloseReason::SlowConsumer));
                false
            }
            Err(PushError::Closed) => {
                self.doomed.push((target, CloseReason::PeerClosed));
                false
            }
        }
    }

    /// Закрывает помеченные компоненты.
    ///
    /// Уведомления об уходе сами могут переполнить очереди наблюдателей,
    /// поэтому обработка идёт по списку, пока он не опустеет.
    fn reap(
        &mut self,
        stats: &RouterStats,
    ) {
        while let Some((id, reason)) = self.doomed.pop() {
            let Some(name) = self.connections.get(id).map(|e| e.meta.name.clone()) else {
                continue;
            };
            let Some(closed) = self.connections.close(id) else {
                continue;
            };
            if closed.prev != ConnectionState::Active {
                debug!(component = %id, ?reason, "Connection closed before handshake");
                continue;
            }
            info!(component = %id, name = %name, ?reason, "Component disconnected");

            let roles = [
                (Role::Subscriber, closed.subscriptions),
                (Role::Publisher, closed.publications),
            ];
            for (role, types) in roles {
                for msg_type in types {
                    self.remove_member(role, msg_type, id);
                    let frame = Frame::role_left(role, msg_type, id, name.clone());
                    self.notify(stats, WatchTopic::members(role, msg_type), frame);
                }
            }

            self.notify(stats, WatchTopic::Components, Frame::NotifyEndComponent { id, name });
        }
    }

    fn index(
        &self,
        role: Role,
    ) -> &HashMap<MessageTypeId, BTreeSet<ComponentId>> {
        match role {
            Role::Subscriber => &self.subscribers,
            Role::Publisher => &self.publishers,
        }
    }

    fn index_mut(
        &mut self,
        role: Role,
    ) -> &mut HashMap<MessageTypeId, BTreeSet<ComponentId>> {
        match role {
            Role::Subscriber => &mut self.subscribers,
            Role::Publisher => &mut self.publishers,
        }
    }

    fn remove_member(
        &mut self,
        role: Role,
        msg_type: MessageTypeId,
        id: ComponentId,
    ) {
        let index = self.index_mut(role);
        if let Some(set) = index.get_mut(&msg_type) {
            set.remove(&id);
            if set.is_empty() {
                index.remove(&msg_type);
            }
        }
    }
}

impl FromStr for BroadcastEcho {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "if_subscribed" => Ok(Self::IfSubscribed),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown broadcast echo policy: {other}")),
        }
    }
}

impl fmt::Display for BroadcastEcho {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::IfSubscribed => "if_subscribed",
            Self::Never => "never",
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::outbox::{outbox, OutboxReceiver};

    struct Peer {
        id: ComponentId,
        rx: OutboxReceiver,
    }

    impl Peer {
        /// Все кадры, уже стоящие в очереди.
        fn drain(&mut self) -> Vec<Frame> {
            let mut frames = Vec::new();
            while let Ok(bytes) = self.rx.frames.try_recv() {
                frames.push(Frame::decode(bytes).unwrap());
            }
            frames
        }
    }

    fn join_with(
        router: &Router,
        name: &str,
        capacity: usize,
    ) -> Peer {
        let (tx, rx) = outbox(capacity);
        let id = router.attach("127.0.0.1:1".parse().unwrap(), tx);
        let control = router
            .handle(
                id,
                Frame::Hello {
                    name: name.into(),
                    host: "h".into(),
                    pid: 1,
                },
            )
            .unwrap();
        assert_eq!(control, Control::Continue);
        Peer { id, rx }
    }

    fn join(
        router: &Router,
        name: &str,
    ) -> Peer {
        let mut peer = join_with(router, name, 64);
        peer.drain();
        peer
    }

    fn register(
        router: &Router,
        peer: &mut Peer,
        name: &str,
    ) -> MessageTypeId {
        router
            .handle(peer.id, Frame::Register { name: name.into() })
            .unwrap();
        peer.drain()
            .into_iter()
            .find_map(|f| match f {
                Frame::RegisterReply { msg_type, .. } => Some(msg_type),
                _ => None,
            })
            .unwrap()
    }

    fn envelope(msg_type: MessageTypeId) -> Envelope {
        Envelope::new(msg_type, 1, Bytes::from_static(b"data"))
    }

    #[test]
    fn test_hello_reply() {
        let router = Router::new(BroadcastEcho::default());
        let mut peer = join_with(&router, "ping", 8);
        assert_eq!(
            peer.drain(),
            vec![Frame::HelloReply {
                id: peer.id,
                name: "ping".into()
            }]
        );
        assert_eq!(router.stats().components, 1);
    }

    #[test]
    fn test_first_frame_must_be_hello() {
        let router = Router::new(BroadcastEcho::default());
        let (tx, _rx) = outbox(8);
        let id = router.attach("127.0.0.1:1".parse().unwrap(), tx);
        let err = router.handle(id, Frame::Register { name: "x".into() });
        assert!(matches!(err, Err(BrokerError::ProtocolViolation { .. })));
    }

    #[test]
    fn test_second_hello_is_violation() {
        let router = Router::new(BroadcastEcho::default());
        let peer = join(&router, "a");
        let err = router.handle(
            peer.id,
            Frame::Hello {
                name: "b".into(),
                host: String::new(),
                pid: 0,
            },
        );
        assert!(matches!(err, Err(BrokerError::ProtocolViolation { .. })));
    }

    #[test]
    fn test_register_same_name_same_id() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let mut b = join(&router, "b");
        let t1 = register(&router, &mut a, "ping");
        let t2 = register(&router, &mut b, "ping");
        assert_eq!(t1, t2);
        assert_eq!(t1, MessageTypeId(1));
        assert_eq!(router.message_type("ping"), Some(t1));
    }

    #[test]
    fn test_send_to_target() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let mut b = join(&router, "b");
        let t = register(&router, &mut a, "ping");

        router
            .handle(
                a.id,
                Frame::Send {
                    target: b.id,
                    envelope: envelope(t),
                },
            )
            .unwrap();
        assert_eq!(
            b.drain(),
            vec![Frame::Deliver {
                source: a.id,
                envelope: envelope(t)
            }]
        );
        assert!(a.drain().is_empty());
    }

    #[test]
    fn test_send_to_unknown_target_is_dropped() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let t = register(&router, &mut a, "ping");
        let control = router
            .handle(
                a.id,
                Frame::Send {
                    target: ComponentId(42),
                    envelope: envelope(t),
                },
            )
            .unwrap();
        assert_eq!(control, Control::Continue);
        assert_eq!(router.stats().unknown_targets, 1);
    }

    #[test]
    fn test_broadcast_reaches_subscribers_only() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let mut b = join(&router, "b");
        let mut c = join(&router, "c");
        let t = register(&router, &mut a, "tick");

        router.handle(b.id, Frame::Subscribe { msg_type: t }).unwrap();
        router
            .handle(a.id, Frame::Broadcast { envelope: envelope(t) })
            .unwrap();

        assert_eq!(b.drain().len(), 1);
        assert!(c.drain().is_empty());
        assert!(a.drain().is_empty());
        assert_eq!(router.stats().deliveries, 1);
    }

    #[test]
    fn test_broadcast_echo_if_subscribed() {
        let router = Router::new(BroadcastEcho::IfSubscribed);
        let mut a = join(&router, "a");
        let t = register(&router, &mut a, "tick");
        router.handle(a.id, Frame::Subscribe { msg_type: t }).unwrap();
        router
            .handle(a.id, Frame::Broadcast { envelope: envelope(t) })
            .unwrap();
        assert_eq!(a.drain().len(), 1);
    }

    #[test]
    fn test_broadcast_echo_never() {
        let router = Router::new(BroadcastEcho::Never);
        let mut a = join(&router, "a");
        let mut b = join(&router, "b");
        let t = register(&router, &mut a, "tick");
        router.handle(a.id, Frame::Subscribe { msg_type: t }).unwrap();
        router.handle(b.id, Frame::Subscribe { msg_type: t }).unwrap();
        router
            .handle(a.id, Frame::Broadcast { envelope: envelope(t) })
            .unwrap();
        assert!(a.drain().is_empty());
        assert_eq!(b.drain().len(), 1);
    }

    #[test]
    fn test_subscribe_unknown_type_ignored() {
        let router = Router::new(BroadcastEcho::default());
        let a = join(&router, "a");
        router
            .handle(
                a.id,
                Frame::Subscribe {
                    msg_type: MessageTypeId(77),
                },
            )
            .unwrap();
        assert!(router.subscribers_of(MessageTypeId(77)).is_empty());
    }

    #[test]
    fn test_new_message_notifies_registrant_too() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        router
            .handle(a.id, Frame::Watch { topic: WatchTopic::Messages })
            .unwrap();
        router
            .handle(a.id, Frame::Register { name: "ping".into() })
            .unwrap();
        let frames = a.drain();
        assert_eq!(
            frames,
            vec![
                Frame::RegisterReply {
                    msg_type: MessageTypeId(1),
                    name: "ping".into()
                },
                Frame::NotifyNewMessage {
                    msg_type: MessageTypeId(1),
                    name: "ping".into()
                },
            ]
        );
    }

    #[test]
    fn test_watch_components_replays_and_follows() {
        let router = Router::new(BroadcastEcho::default());
        let a = join(&router, "a");
        let mut w = join(&router, "watcher");
        router
            .handle(w.id, Frame::Watch { topic: WatchTopic::Components })
            .unwrap();
        assert_eq!(
            w.drain(),
            vec![Frame::NotifyNewComponent {
                id: a.id,
                name: "a".into()
            }]
        );

        let b = join(&router, "b");
        router.detach(a.id, CloseReason::PeerClosed);
        assert_eq!(
            w.drain(),
            vec![
                Frame::NotifyNewComponent {
                    id: b.id,
                    name: "b".into()
                },
                Frame::NotifyEndComponent {
                    id: a.id,
                    name: "a".into()
                },
            ]
        );
    }

    #[test]
    fn test_watch_subscribers() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let mut w = join(&router, "w");
        let t = register(&router, &mut a, "tick");
        router.handle(a.id, Frame::Subscribe { msg_type: t }).unwrap();

        router
            .handle(
                w.id,
                Frame::Watch {
                    topic: WatchTopic::Subscribers(t),
                },
            )
            .unwrap();
        assert_eq!(
            w.drain(),
            vec![Frame::NotifyNewSubscriber {
                msg_type: t,
                id: a.id,
                name: "a".into()
            }]
        );

        router.handle(a.id, Frame::Unsubscribe { msg_type: t }).unwrap();
        // Повторная отписка ничего не меняет и ничего не рассылает.
        router.handle(a.id, Frame::Unsubscribe { msg_type: t }).unwrap();
        assert_eq!(
            w.drain(),
            vec![Frame::NotifyEndSubscriber {
                msg_type: t,
                id: a.id,
                name: "a".into()
            }]
        );
    }

    #[test]
    fn test_detach_removes_subscriptions() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let mut w = join(&router, "w");
        let t = register(&router, &mut a, "tick");
        router.handle(a.id, Frame::Subscribe { msg_type: t }).unwrap();
        router
            .handle(
                w.id,
                Frame::Watch {
                    topic: WatchTopic::Subscribers(t),
                },
            )
            .unwrap();
        w.drain();

        router.detach(a.id, CloseReason::PeerClosed);
        assert!(router.subscribers_of(t).is_empty());
        assert_eq!(
            w.drain(),
            vec![Frame::NotifyEndSubscriber {
                msg_type: t,
                id: a.id,
                name: "a".into()
            }]
        );
        assert_eq!(router.stats().components, 1);
    }

    #[test]
    fn test_publishers_follow_subscriber_rules() {
        let router = Router::new(BroadcastEcho::default());
        let mut clock = join(&router, "clock");
        let mut w = join(&router, "w");
        let t = register(&router, &mut clock, "tick");
        let topic = WatchTopic::Publishers(t);

        router.handle(w.id, Frame::Watch { topic }).unwrap();
        assert!(w.drain().is_empty());

        router.handle(clock.id, Frame::Publish { msg_type: t }).unwrap();
        router.handle(clock.id, Frame::Publish { msg_type: t }).unwrap();
        let joined = Frame::NotifyNewPublisher {
            msg_type: t,
            id: clock.id,
            name: "clock".into(),
        };
        assert_eq!(w.drain(), vec![joined.clone()]);
        assert_eq!(router.publishers_of(t), vec![clock.id]);
        assert!(router.subscribers_of(t).is_empty());

        // Новый наблюдатель получает уже объявленных публикаторов.
        let mut late = join(&router, "late");
        router.handle(late.id, Frame::Watch { topic }).unwrap();
        assert_eq!(late.drain(), vec![joined]);

        router.handle(clock.id, Frame::Withdraw { msg_type: t }).unwrap();
        router.handle(clock.id, Frame::Withdraw { msg_type: t }).unwrap();
        assert_eq!(
            w.drain(),
            vec![Frame::NotifyEndPublisher {
                msg_type: t,
                id: clock.id,
                name: "clock".into()
            }]
        );
        assert!(router.publishers_of(t).is_empty());
    }

    #[test]
    fn test_detach_withdraws_publications() {
        let router = Router::new(BroadcastEcho::default());
        let mut clock = join(&router, "clock");
        let mut w = join(&router, "w");
        let t = register(&router, &mut clock, "tick");
        router.handle(clock.id, Frame::Publish { msg_type: t }).unwrap();
        router.handle(clock.id, Frame::Subscribe { msg_type: t }).unwrap();
        router.handle(w.id, Frame::Watch { topic: WatchTopic::Publishers(t) }).unwrap();
        router.handle(w.id, Frame::Watch { topic: WatchTopic::Subscribers(t) }).unwrap();
        w.drain();

        router.detach(clock.id, CloseReason::PeerClosed);
        assert_eq!(
            w.drain(),
            vec![
                Frame::NotifyEndSubscriber {
                    msg_type: t,
                    id: clock.id,
                    name: "clock".into()
                },
                Frame::NotifyEndPublisher {
                    msg_type: t,
                    id: clock.id,
                    name: "clock".into()
                },
            ]
        );
        assert!(router.publishers_of(t).is_empty());
    }

    #[test]
    fn test_publish_unknown_type_ignored() {
        let router = Router::new(BroadcastEcho::default());
        let a = join(&router, "a");
        router
            .handle(
                a.id,
                Frame::Publish {
                    msg_type: MessageTypeId(9),
                },
            )
            .unwrap();
        assert!(router.publishers_of(MessageTypeId(9)).is_empty());
    }

    /// Тест проверяет, что медленный потребитель закрывается, а остальные
    /// подписчики продолжают получать сообщения.
    #[test]
    fn test_slow_consumer_is_closed() {
        let router = Router::new(BroadcastEcho::default());
        let mut a = join(&router, "a");
        let mut fast = join(&router, "fast");
        let t = register(&router, &mut a, "tick");

        let mut slow = join_with(&router, "slow", 1);
        slow.drain();
        router.handle(slow.id, Frame::Subscribe { msg_type: t }).unwrap();
        router.handle(fast.id, Frame::Subscribe { msg_type: t }).unwrap();

        for _ in 0..3 {
            router
                .handle(a.id, Frame::Broadcast { envelope: envelope(t) })
                .unwrap();
        }

        assert_eq!(fast.drain().len(), 3);
        assert_eq!(slow.drain().len(), 1);
        assert_eq!(router.subscribers_of(t), vec![fast.id]);
        assert_eq!(router.stats().slow_consumers, 1);

        // id занят, пока соединение не отсоединится.
        let other = join(&router, "other");
        assert_ne!(other.id, slow.id);
        router.detach(slow.id, CloseReason::SlowConsumer);
        let reused = join(&router, "again");
        assert_eq!(reused.id, slow.id);
    }

    #[test]
    fn test_duplicate_names_suffixed() {
        let router = Router::new(BroadcastEcho::default());
        let mut first = join_with(&router, "ping", 8);
        let mut second = join_with(&router, "ping", 8);
        assert!(matches!(
            first.drain().as_slice(),
            [Frame::HelloReply { name, .. }] if name == "ping"
        ));
        assert!(matches!(
            second.drain().as_slice(),
            [Frame::HelloReply { name, .. }] if name == "ping/2"
        ));
    }

    #[test]
    fn test_quit_requests_shutdown() {
        let router = Router::new(BroadcastEcho::default());
        let a = join(&router, "a");
        let signal = router.shutdown_signal();
        assert!(!*signal.borrow());

        assert_eq!(router.handle(a.id, Frame::Quit).unwrap(), Control::Shutdown);
        assert!(router.is_shutting_down());
        assert!(*signal.borrow());
    }

    #[test]
    fn test_broadcast_echo_parse() {
        assert_eq!("never".parse::<BroadcastEcho>(), Ok(BroadcastEcho::Never));
        assert_eq!(
            "if-subscribed".parse::<BroadcastEcho>(),
            Ok(BroadcastEcho::IfSubscribed)
        );
        assert!("always".parse::<BroadcastEcho>().is_err());
        assert_eq!(BroadcastEcho::Never.to_string(), "never");
    }
}
