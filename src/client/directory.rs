use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    network::wire::WatchTopic,
    pubsub::{ComponentId, MessageTypeId, MessageTypeRegistry, Role},
};

/// Локальная копия того, что клиент узнал от брокера.
///
/// Компоненты, подписчики и публикаторы известны только по темам, на
/// которые клиент подписан через `Watch`; зеркало типов пополняется ещё и
/// ответами на `Register`.
#[derive(Debug, Default)]
pub struct Directory {
    components: BTreeMap<ComponentId, String>,
    members: HashMap<(Role, MessageTypeId), BTreeMap<ComponentId, String>>,
    types: MessageTypeRegistry,
    watching: HashSet<WatchTopic>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Отмечает тему как наблюдаемую.
    ///
    /// # Возвращает
    /// `true`, если тема наблюдается впервые (нужно отправить `Watch`).
    pub fn watch(
        &mut self,
        topic: WatchTopic,
    ) -> bool {
        self.watching.insert(topic)
    }

    pub fn is_watching(
        &self,
        topic: WatchTopic,
    ) -> bool {
        self.watching.contains(&topic)
    }

    pub fn component_joined(
        &mut self,
        id: ComponentId,
        name: &str,
    ) {
        self.components.insert(id, name.to_string());
    }

    pub fn component_left(
        &mut self,
        id: ComponentId,
    ) {
        self.components.remove(&id);
    }

    pub fn member_joined(
        &mut self,
        role: Role,
        msg_type: MessageTypeId,
        id: ComponentId,
        name: &str,
    ) {
        self.members
            .entry((role, msg_type))
            .or_default()
            .insert(id, name.to_string());
    }

    pub fn member_left(
        &mut self,
        role: Role,
        msg_type: MessageTypeId,
        id: ComponentId,
    ) {
        let key = (role, msg_type);
        if let Some(set) = self.members.get_mut(&key) {
            set.remove(&id);
            if set.is_empty() {
                self.members.remove(&key);
            }
        }
    }

    pub fn record_type(
        &mut self,
        msg_type: MessageTypeId,
        name: &str,
    ) {
        self.types.record(msg_type, name);
    }

    pub fn lookup_type(
        &self,
        name: &str,
    ) -> Option<MessageTypeId> {
        self.types.lookup(name)
    }

    pub fn type_name(
        &self,
        msg_type: MessageTypeId,
    ) -> Option<&str> {
        self.types.name_of(msg_type)
    }

    /// Известные именованные типы в порядке идентификаторов.
    pub fn types(&self) -> impl Iterator<Item = (MessageTypeId, &str)> {
        self.types.named()
    }

    /// Известные компоненты в порядке идентификаторов.
    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &str)> {
        self.components.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Известные участники типа в роли `role`.
    pub fn members(
        &self,
        role: Role,
        msg_type: MessageTypeId,
    ) -> impl Iterator<Item = (ComponentId, &str)> {
        self.members
            .get(&(role, msg_type))
            .into_iter()
            .flatten()
            .map(|(id, name)| (*id, name.as_str()))
    }
}
