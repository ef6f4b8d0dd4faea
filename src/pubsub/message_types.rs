use std::collections::{BTreeMap, HashMap};

use super::MessageTypeId;

/// Результат регистрации имени типа.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: MessageTypeId,
    /// `true`, если тип создан этим вызовом
    pub created: bool,
}

/// Двунаправленный реестр типов сообщений: имя <-> идентификатор.
///
/// В брокере является источником истины, в клиенте используется как кэш
/// (`record`). Идентификаторы начинаются с `1` и никогда не удаляются.
/// Пустое имя создаёт анонимный тип, который не попадает в индекс по имени.
#[derive(Debug)]
pub struct MessageTypeRegistry {
    by_name: HashMap<String, MessageTypeId>,
    by_id: BTreeMap<MessageTypeId, String>,
    next_id: u32,
}

impl Default for MessageTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MessageTypeRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Возвращает идентификатор для имени, создавая тип при первом обращении.
    pub fn register(
        &mut self,
        name: &str,
    ) -> Registration {
        if !name.is_empty() {
            if let Some(&id) = self.by_name.get(name) {
                return Registration { id, created: false };
            }
        }

        let id = MessageTypeId(self.next_id);
        self.next_id += 1;
        self.by_id.insert(id, name.to_string());
        if !name.is_empty() {
            self.by_name.insert(name.to_string(), id);
        }
        Registration { id, created: true }
    }

    /// Запоминает пару, выданную брокером (зеркало на стороне клиента).
    pub fn record(
        &mut self,
        id: MessageTypeId,
        name: &str,
    ) {
        self.by_id.insert(id, name.to_string());
        if !name.is_empty() {
            self.by_name.insert(name.to_string(), id);
        }
        self.next_id = self.next_id.max(id.0.saturating_add(1));
    }

    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<MessageTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(
        &self,
        id: MessageTypeId,
    ) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn contains(
        &self,
        id: MessageTypeId,
    ) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Именованные типы в порядке идентификаторов.
    pub fn named(&self) -> impl Iterator<Item = (MessageTypeId, &str)> {
        self.by_id
            .iter()
            .filter(|(_, name)| !name.is_empty())
            .map(|(id, name)| (*id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
