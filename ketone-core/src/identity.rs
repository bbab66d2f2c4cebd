use indexmap::IndexMap;
use std::collections::HashMap;

use crate::id::RecordId;
use crate::record::Record;

/// Canonical (type, id) -> record table, plus every record of a type in the
/// order it entered the store.
#[derive(Default)]
pub(crate) struct IdentityMap {
    by_id: HashMap<String, HashMap<RecordId, Record>>,
    by_type: IndexMap<String, Vec<Record>>,
}

impl IdentityMap {
    pub(crate) fn get(&self, type_name: &str, id: &RecordId) -> Option<Record> {
        self.by_id.get(type_name)?.get(id).cloned()
    }

    /// Adds a record that is not in the map yet.
    pub(crate) fn track(&mut self, record: &Record) {
        self.by_type
            .entry(record.type_name().to_string())
            .or_default()
            .push(record.clone());
    }

    /// Binds `id` to `record`. Returns the record previously bound to the
    /// key, if it was a different instance.
    pub(crate) fn insert(&mut self, type_name: &str, id: RecordId, record: &Record) -> Option<Record> {
        let previous = self
            .by_id
            .entry(type_name.to_string())
            .or_default()
            .insert(id, record.clone());
        previous.filter(|previous| previous != record)
    }

    pub(crate) fn records_of(&self, type_name: &str) -> Vec<Record> {
        self.by_type.get(type_name).cloned().unwrap_or_default()
    }

    /// Every record, in the order records entered the store.
    pub(crate) fn all(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.by_type.values().flatten().cloned().collect();
        records.sort_by_key(Record::client_id);
        records
    }

    /// Removes the record under every key it is bound to.
    pub(crate) fn remove(&mut self, record: &Record) {
        if let Some(ids) = self.by_id.get_mut(record.type_name()) {
            ids.retain(|_, bound| bound != record);
        }
        if let Some(records) = self.by_type.get_mut(record.type_name()) {
            records.retain(|tracked| tracked != record);
        }
    }

    pub(crate) fn clear(&mut self) -> Vec<Record> {
        self.by_id.clear();
        self.by_type.drain(..).flat_map(|(_, records)| records).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordState;
    use crate::schema::TypeDescriptor;
    use std::sync::{Arc, Weak};

    fn record(client_id: u64, type_name: &str, id: i64) -> Record {
        Record::new(
            client_id,
            Arc::new(TypeDescriptor::new(type_name)),
            Weak::new(),
            Some(RecordId::from(id)),
            RecordState::Loaded,
        )
    }

    #[test]
    fn aliases_share_one_instance() {
        let mut map = IdentityMap::default();
        let person = record(1, "person", 1);
        map.track(&person);
        assert!(map.insert("person", RecordId::from("me"), &person).is_none());
        assert!(map.insert("person", RecordId::from(1), &person).is_none());
        assert_eq!(map.get("person", &RecordId::from("1")), Some(person.clone()));
        assert_eq!(map.get("person", &RecordId::from("me")), Some(person.clone()));
        assert!(map.get("group", &RecordId::from(1)).is_none());

        map.remove(&person);
        assert!(map.get("person", &RecordId::from("me")).is_none());
        assert!(map.records_of("person").is_empty());
    }

    #[test]
    fn insert_reports_displaced_records() {
        let mut map = IdentityMap::default();
        let first = record(1, "person", 1);
        let second = record(2, "person", 1);
        map.insert("person", RecordId::from(1), &first);
        assert_eq!(map.insert("person", RecordId::from(1), &second), Some(first));
    }

    #[test]
    fn all_is_in_arrival_order() {
        let mut map = IdentityMap::default();
        let a = record(1, "person", 1);
        let b = record(2, "group", 1);
        let c = record(3, "person", 2);
        for r in [&a, &b, &c] {
            map.track(r);
        }
        assert_eq!(map.all(), vec![a.clone(), b, c.clone()]);
        assert_eq!(map.records_of("person"), vec![a, c]);
    }
}
