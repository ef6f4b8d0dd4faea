use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
};

use crate::{
    network::{
        connection_state::{
            ComponentMetadata, ComponentSnapshot, ConnectionState, ConnectionStats,
        },
        outbox::Outbox,
        wire::WatchTopic,
    },
    pubsub::{ComponentId, MessageTypeId, Role},
};

/// Запись о соединённом компоненте.
#[derive(Debug)]
pub struct ComponentEntry {
    pub meta: ComponentMetadata,
    /// Типы сообщений, на которые подписан компонент
    pub subscriptions: BTreeSet<MessageTypeId>,
    /// Типы сообщений, которые компонент объявил рассылаемыми
    pub publications: BTreeSet<MessageTypeId>,
    pub watches: Watches,
    pub stats: ConnectionStats,
    pub outbox: Outbox,
}

/// Темы обнаружения, за которыми следит компонент.
#[derive(Debug, Default, Clone)]
pub struct Watches {
    pub components: bool,
    pub messages: bool,
    pub subscribers: BTreeSet<MessageTypeId>,
    pub publishers: BTreeSet<MessageTypeId>,
}

/// Что осталось от компонента после `close`.
#[derive(Debug)]
pub struct ClosedEntry {
    pub prev: ConnectionState,
    pub subscriptions: BTreeSet<MessageTypeId>,
    pub publications: BTreeSet<MessageTypeId>,
}

/// Реестр соединений брокера.
///
/// Выдаёт идентификаторы компонентов (наименьший свободный переиспользуется
/// первым), хранит метаданные, подписки и очередь исходящих кадров каждого
/// компонента. Сам по себе не синхронизирован: живёт внутри состояния
/// маршрутизатора под его блокировкой.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: BTreeMap<ComponentId, ComponentEntry>,
    free_ids: BTreeSet<u32>,
    next_id: u32,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionRegistry {
    /// Создаёт новый пустой реестр.
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует только что принятое соединение в состоянии `Connecting`.
    ///
    /// # Возвращает
    /// - Выданный `ComponentId`.
    pub fn register(
        &mut self,
        peer: SocketAddr,
        outbox: Outbox,
    ) -> ComponentId {
        let id = self.allocate_id();
        self.entries.insert(
            id,
            ComponentEntry {
                meta: ComponentMetadata::new(id, peer),
                subscriptions: BTreeSet::new(),
                publications: BTreeSet::new(),
                watches: Watches::default(),
                stats: ConnectionStats::default(),
                outbox,
            },
        );
        id
    }

    /// Завершает рукопожатие: назначает имя и переводит в `Active`.
    ///
    /// Пустое `requested` заменяется на `host:pid`. Если имя уже занято
    /// другим активным компонентом, добавляется суффикс `/N`.
    ///
    /// # Возвращает
    /// - `Some(name)` с итоговым именем;
    /// - `None`, если компонента нет или он уже активирован.
    pub fn activate(
        &mut self,
        id: ComponentId,
        requested: &str,
        host: &str,
        pid: u32,
    ) -> Option<String> {
        if !self
            .entries
            .get(&id)
            .is_some_and(|e| e.meta.state == ConnectionState::Connecting)
        {
            return None;
        }

        let base = default_name(requested, host, pid);
        let name = self.unique_name(&base);

        let entry = self.entries.get_mut(&id)?;
        entry.meta.base_name = base;
        entry.meta.name = name.clone();
        entry.meta.host = host.to_string();
        entry.meta.pid = pid;
        entry.meta.transition(ConnectionState::Active);
        Some(name)
    }

    /// Переводит компонент в `Closed`, сохраняя запись и идентификатор до
    /// `unregister`. Подписки, публикации и интересы обнаружения очищаются.
    ///
    /// # Возвращает
    /// - `Some(ClosedEntry)`, если переход выполнен;
    /// - `None`, если компонента нет или он уже закрыт.
    pub fn close(
        &mut self,
        id: ComponentId,
    ) -> Option<ClosedEntry> {
        let entry = self.entries.get_mut(&id)?;
        let prev = entry.meta.state;
        if !entry.meta.transition(ConnectionState::Closed) {
            return None;
        }
        entry.outbox.close();
        entry.watches = Watches::default();
        Some(ClosedEntry {
            prev,
            subscriptions: std::mem::take(&mut entry.subscriptions),
            publications: std::mem::take(&mut entry.publications),
        })
    }

    /// Удаляет компонент и освобождает его идентификатор.
    ///
    /// # Примечание
    /// Если `id` отсутствует, метод ничего не делает.
    pub fn unregister(
        &mut self,
        id: ComponentId,
    ) -> Option<ComponentEntry> {
        let mut entry = self.entries.remove(&id)?;
        entry.meta.transition(ConnectionState::Closed);
        self.free_ids.insert(id.0);
        Some(entry)
    }

    pub fn get(
        &self,
        id: ComponentId,
    ) -> Option<&ComponentEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(
        &mut self,
        id: ComponentId,
    ) -> Option<&mut ComponentEntry> {
        self.entries.get_mut(&id)
    }

    /// Активен ли компонент (прошёл рукопожатие).
    pub fn is_active(
        &self,
        id: ComponentId,
    ) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.meta.state.is_active())
    }

    /// Имя активного компонента.
    pub fn name_of(
        &self,
        id: ComponentId,
    ) -> Option<&str> {
        self.entries
            .get(&id)
            .filter(|e| e.meta.state.is_active())
            .map(|e| e.meta.name.as_str())
    }

    /// Активные компоненты в порядке идентификаторов.
    pub fn active(&self) -> impl Iterator<Item = &ComponentEntry> {
        self.entries.values().filter(|e| e.meta.state.is_active())
    }

    pub fn active_ids(&self) -> Vec<ComponentId> {
        self.active().map(|e| e.meta.id).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Все записи, включая соединения без рукопожатия.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Активные компоненты, следящие за темой `topic`.
    pub fn watchers(
        &self,
        topic: WatchTopic,
    ) -> Vec<ComponentId> {
        self.active()
            .filter(|e| e.watches.contains(topic))
            .map(|e| e.meta.id)
            .collect()
    }

    /// Снимок состояния компонента.
    pub fn snapshot(
        &self,
        id: ComponentId,
    ) -> Option<ComponentSnapshot> {
        self.entries.get(&id).map(|e| ComponentSnapshot {
            id,
            name: e.meta.name.clone(),
            peer: e.meta.peer.to_string(),
            state: e.meta.state,
            uptime_secs: e.meta.uptime().as_secs(),
            subscriptions: e.subscriptions.iter().copied().collect(),
            publications: e.publications.iter().copied().collect(),
            stats: e.stats,
        })
    }

    pub fn all_snapshots(&self) -> Vec<ComponentSnapshot> {
        self.entries
            .keys()
            .filter_map(|id| self.snapshot(*id))
            .collect()
    }

    fn allocate_id(&mut self) -> ComponentId {
        if let Some(id) = self.free_ids.pop_first() {
            return ComponentId(id);
        }
        self.next_id += 1;
        ComponentId(self.next_id)
    }

    fn unique_name(
        &self,
        base: &str,
    ) -> String {
        let taken = |name: &str| self.active().any(|e| e.meta.name == name);
        let same_base = self.active().filter(|e| e.meta.base_name == base).count();
        if same_base == 0 && !taken(base) {
            return base.to_string();
        }

        let mut n = same_base + 1;
        loop {
            let candidate = format!("{base}/{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl ComponentEntry {
    /// Типы, к которым компонент относится в роли `role`.
    pub fn roles_mut(
        &mut self,
        role: Role,
    ) -> &mut BTreeSet<MessageTypeId> {
        match role {
            Role::Subscriber => &mut self.subscriptions,
            Role::Publisher => &mut self.publications,
        }
    }
}

impl Watches {
    pub fn contains(
        &self,
        topic: WatchTopic,
    ) -> bool {
        match topic {
            WatchTopic::Components => self.components,
            WatchTopic::Messages => self.messages,
            WatchTopic::Subscribers(t) => self.subscribers.contains(&t),
            WatchTopic::Publishers(t) => self.publishers.contains(&t),
        }
    }

    /// Отмечает тему наблюдаемой.
    ///
    /// # Возвращает
    /// `false`, если тема уже наблюдалась.
    pub fn insert(
        &mut self,
        topic: WatchTopic,
    ) -> bool {
        match topic {
            WatchTopic::Components => !std::mem::replace(&mut self.components, true),
            WatchTopic::Messages => !std::mem::replace(&mut self.messages, true),
            WatchTopic::Subscribers(t) => self.subscribers.insert(t),
            WatchTopic::Publishers(t) => self.publishers.insert(t),
        }
    }
}

/// Имя по умолчанию для компонента, не назвавшего себя.
fn default_name(
    requested: &str,
    host: &str,
    pid: u32,
) -> String {
    if !requested.is_empty() {
        return requested.to_string();
    }
    if host.is_empty() {
        return "component".to_string();
    }
    format!("{host}:{pid}")
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::outbox::outbox;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn connect(reg: &mut ConnectionRegistry) -> ComponentId {
        let (tx, _rx) = outbox(8);
        reg.register(peer(), tx)
    }

    fn connect_named(
        reg: &mut ConnectionRegistry,
        name: &str,
    ) -> (ComponentId, String) {
        let id = connect(reg);
        let name = reg.activate(id, name, "host", 1).unwrap();
        (id, name)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut reg = ConnectionRegistry::new();
        assert_eq!(connect(&mut reg), ComponentId(1));
        assert_eq!(connect(&mut reg), ComponentId(2));
        assert_eq!(connect(&mut reg), ComponentId(3));
    }

    /// Тест проверяет, что освобождённый наименьший id выдаётся первым.
    #[test]
    fn test_lowest_free_id_reused() {
        let mut reg = ConnectionRegistry::new();
        let a = connect(&mut reg);
        let b = connect(&mut reg);
        let _c = connect(&mut reg);

        reg.unregister(b);
        reg.unregister(a);
        assert_eq!(connect(&mut reg), a);
        assert_eq!(connect(&mut reg), b);
        assert_eq!(connect(&mut reg), ComponentId(4));
    }

    #[test]
    fn test_connecting_entries_are_not_active() {
        let mut reg = ConnectionRegistry::new();
        let id = connect(&mut reg);
        assert!(!reg.is_active(id));
        assert_eq!(reg.name_of(id), None);
        assert_eq!(reg.active_count(), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_activate_assigns_name() {
        let mut reg = ConnectionRegistry::new();
        let (id, name) = connect_named(&mut reg, "ping");
        assert_eq!(name, "ping");
        assert!(reg.is_active(id));
        assert_eq!(reg.name_of(id), Some("ping"));
        assert!(reg.activate(id, "again", "host", 1).is_none());
    }

    #[test]
    fn test_empty_name_uses_host_and_pid() {
        let mut reg = ConnectionRegistry::new();
        let id = connect(&mut reg);
        assert_eq!(reg.activate(id, "", "box", 42).as_deref(), Some("box:42"));

        let id = connect(&mut reg);
        assert_eq!(reg.activate(id, "", "", 7).as_deref(), Some("component"));
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let mut reg = ConnectionRegistry::new();
        assert_eq!(connect_named(&mut reg, "ping").1, "ping");
        assert_eq!(connect_named(&mut reg, "ping").1, "ping/2");
        assert_eq!(connect_named(&mut reg, "ping").1, "ping/3");
    }

    #[test]
    fn test_suffix_skips_names_still_in_use() {
        let mut reg = ConnectionRegistry::new();
        let (first, _) = connect_named(&mut reg, "ping");
        let (_, second) = connect_named(&mut reg, "ping");
        assert_eq!(second, "ping/2");

        reg.unregister(first);
        // "ping" свободно, но "ping/2" ещё занято.
        assert_eq!(connect_named(&mut reg, "ping").1, "ping/3");
        assert_eq!(connect_named(&mut reg, "other").1, "other");
    }

    /// Тест проверяет, что закрытый компонент держит свой id до `unregister`.
    #[test]
    fn test_close_keeps_id_reserved() {
        let mut reg = ConnectionRegistry::new();
        let (id, _) = connect_named(&mut reg, "slow");
        reg.get_mut(id)
            .unwrap()
            .subscriptions
            .insert(MessageTypeId(2));

        reg.get_mut(id)
            .unwrap()
            .roles_mut(Role::Publisher)
            .insert(MessageTypeId(5));

        let closed = reg.close(id).unwrap();
        assert_eq!(closed.prev, ConnectionState::Active);
        assert_eq!(closed.subscriptions.into_iter().collect::<Vec<_>>(), vec![MessageTypeId(2)]);
        assert_eq!(closed.publications.into_iter().collect::<Vec<_>>(), vec![MessageTypeId(5)]);
        assert!(!reg.is_active(id));
        assert!(reg.close(id).is_none());

        assert_eq!(connect(&mut reg), ComponentId(2));
        reg.unregister(id);
        assert_eq!(connect(&mut reg), id);
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let mut reg = ConnectionRegistry::new();
        assert!(reg.unregister(ComponentId(9)).is_none());
        assert_eq!(connect(&mut reg), ComponentId(1));
    }

    #[test]
    fn test_watchers() {
        let mut reg = ConnectionRegistry::new();
        let (a, _) = connect_named(&mut reg, "a");
        let (b, _) = connect_named(&mut reg, "b");
        let t = MessageTypeId(3);
        assert!(reg.get_mut(a).unwrap().watches.insert(WatchTopic::Components));
        assert!(reg.get_mut(b).unwrap().watches.insert(WatchTopic::Messages));
        assert!(reg.get_mut(b).unwrap().watches.insert(WatchTopic::Subscribers(t)));
        assert!(reg.get_mut(a).unwrap().watches.insert(WatchTopic::Publishers(t)));
        assert!(!reg.get_mut(a).unwrap().watches.insert(WatchTopic::Components));

        assert_eq!(reg.watchers(WatchTopic::Components), vec![a]);
        assert_eq!(reg.watchers(WatchTopic::Messages), vec![b]);
        assert_eq!(reg.watchers(WatchTopic::Subscribers(t)), vec![b]);
        assert_eq!(reg.watchers(WatchTopic::Publishers(t)), vec![a]);
        assert!(reg.watchers(WatchTopic::Subscribers(MessageTypeId(4))).is_empty());
    }

    #[test]
    fn test_snapshot() {
        let mut reg = ConnectionRegistry::new();
        let (id, _) = connect_named(&mut reg, "pong");
        reg.get_mut(id)
            .unwrap()
            .subscriptions
            .insert(MessageTypeId(1));

        let snap = reg.snapshot(id).unwrap();
        assert_eq!(snap.name, "pong");
        assert_eq!(snap.state, ConnectionState::Active);
        assert_eq!(snap.subscriptions, vec![MessageTypeId(1)]);
        assert_eq!(reg.all_snapshots().len(), 1);
    }
}
