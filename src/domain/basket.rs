//! Mail basket and source grouping.
//!
//! A basket is the set of items flagged for mail on one case. [`group`]
//! splits it into one [`Group`] per information source and renders the
//! plain-text block a user pastes into a message.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CaseId, InformationSource, ItemKey, ItemKind, MailableItem, SourceId};

/// Display name of the group holding items without a source.
pub const UNASSIGNED_GROUP_NAME: &str = "Unassigned";

/// Items flagged for mail on a case, as of `fetched_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basket {
    pub case_id: CaseId,
    pub items: Vec<MailableItem>,
    /// Issue time of the request that produced this basket.
    pub fetched_at: DateTime<Utc>,
}

impl Basket {
    pub fn new(case_id: CaseId, items: Vec<MailableItem>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            case_id,
            items,
            fetched_at,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Looks up an item by key.
    pub fn item(&self, key: &ItemKey) -> Option<&MailableItem> {
        self.items.iter().find(|item| item.key() == *key)
    }

    /// Points an item at another source. Returns false if the item is gone.
    pub fn set_source(&mut self, key: &ItemKey, source_id: Option<SourceId>) -> bool {
        match self.items.iter_mut().find(|item| item.key() == *key) {
            Some(item) => {
                item.source_id = source_id;
                true
            }
            None => false,
        }
    }

    /// Replaces an item's note. Returns false if the item is gone.
    pub fn set_note(&mut self, key: &ItemKey, note: &str) -> bool {
        match self.items.iter_mut().find(|item| item.key() == *key) {
            Some(item) => {
                item.note_text = note.to_string();
                true
            }
            None => false,
        }
    }

    /// Takes an item out of the basket, returning its former position.
    pub fn remove(&mut self, key: &ItemKey) -> Option<(usize, MailableItem)> {
        let index = self.items.iter().position(|item| item.key() == *key)?;
        Some((index, self.items.remove(index)))
    }

    /// Puts a removed item back at its former position.
    ///
    /// Does nothing if an item with the same key is already present (a
    /// refetch may have brought it back first).
    pub fn restore(&mut self, index: usize, item: MailableItem) {
        if self.item(&item.key()).is_some() {
            return;
        }
        let index = index.min(self.items.len());
        self.items.insert(index, item);
    }

    /// Empties the basket, returning what was in it.
    pub fn clear(&mut self) -> Vec<MailableItem> {
        std::mem::take(&mut self.items)
    }

    /// Groups the basket's items by source.
    pub fn groups(&self, sources: &[InformationSource]) -> Vec<Group> {
        group(&self.items, sources)
    }
}

/// Key of a source group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Source(SourceId),
    Unassigned,
}

impl From<Option<SourceId>> for GroupKey {
    fn from(source_id: Option<SourceId>) -> Self {
        source_id.map_or(GroupKey::Unassigned, GroupKey::Source)
    }
}

/// Items of a basket that share one information source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub key: GroupKey,
    pub name: String,
    /// Activities in basket order.
    pub activities: Vec<MailableItem>,
    /// Documents in basket order.
    pub documents: Vec<MailableItem>,
    /// Plain-text listing for pasting into a message body.
    pub export_text: String,
}

impl Group {
    pub fn len(&self) -> usize {
        self.activities.len() + self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty() && self.documents.is_empty()
    }

    /// Whether the group holds the given item.
    pub fn contains(&self, key: &ItemKey) -> bool {
        self.activities
            .iter()
            .chain(self.documents.iter())
            .any(|item| item.key() == *key)
    }
}

/// Groups items by information source.
///
/// Groups are sorted by source name (case-insensitively, ties broken by the
/// exact name and then the id) with the unassigned group always last. Items
/// keep their input order inside a group. Only non-empty groups are returned.
pub fn group(items: &[MailableItem], sources: &[InformationSource]) -> Vec<Group> {
    let names: BTreeMap<SourceId, &str> = sources
        .iter()
        .map(|source| (source.id, source.name.as_str()))
        .collect();

    let mut buckets: BTreeMap<GroupKey, (Vec<MailableItem>, Vec<MailableItem>)> = BTreeMap::new();
    for item in items {
        let bucket = buckets.entry(GroupKey::from(item.source_id)).or_default();
        match item.kind {
            ItemKind::Activity => bucket.0.push(item.clone()),
            ItemKind::Document => bucket.1.push(item.clone()),
        }
    }

    let mut groups: Vec<Group> = buckets
        .into_iter()
        .map(|(key, (activities, documents))| Group {
            key,
            name: group_name(key, &names),
            activities,
            documents,
            export_text: String::new(),
        })
        .collect();

    groups.sort_by(compare_groups);

    for (index, group) in groups.iter_mut().enumerate() {
        group.export_text = export_text(index + 1, &group.activities, &group.documents);
    }

    groups
}

fn group_name(key: GroupKey, names: &BTreeMap<SourceId, &str>) -> String {
    match key {
        GroupKey::Source(id) => names
            .get(&id)
            .map(|name| (*name).to_string())
            .unwrap_or_else(|| format!("Source {}", id)),
        GroupKey::Unassigned => UNASSIGNED_GROUP_NAME.to_string(),
    }
}

fn compare_groups(a: &Group, b: &Group) -> Ordering {
    let a_unassigned = a.key == GroupKey::Unassigned;
    let b_unassigned = b.key == GroupKey::Unassigned;

    a_unassigned
        .cmp(&b_unassigned)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.key.cmp(&b.key))
}

fn export_text(group_nr: usize, activities: &[MailableItem], documents: &[MailableItem]) -> String {
    let activity_lines: Vec<String> = activities.iter().map(|item| export_line("", item)).collect();
    let document_lines: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(index, item)| export_line(&format!("{}.{} ", group_nr, index + 1), item))
        .collect();

    [activity_lines, document_lines]
        .into_iter()
        .filter(|lines| !lines.is_empty())
        .map(|lines| lines.join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn export_line(prefix: &str, item: &MailableItem) -> String {
    match item.effective_title() {
        Some(title) => format!("- {}{} - {}", prefix, item.label, title),
        None => format!("- {}{}", prefix, item.label),
    }
}
