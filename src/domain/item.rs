//! Deliverable items flagged for inclusion in mail.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ItemId, SourceId};

/// What kind of record a mailable item wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A case activity (task, meeting, note).
    Activity,
    /// An uploaded or generated document.
    Document,
}

impl ItemKind {
    /// Returns the string representation used in logs and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Activity => "activity",
            ItemKind::Document => "document",
        }
    }
}

/// Identity of an item across both item tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub kind: ItemKind,
    pub id: ItemId,
}

impl ItemKey {
    pub fn activity(id: impl Into<ItemId>) -> Self {
        Self {
            kind: ItemKind::Activity,
            id: id.into(),
        }
    }

    pub fn document(id: impl Into<ItemId>) -> Self {
        Self {
            kind: ItemKind::Document,
            id: id.into(),
        }
    }
}

/// An item key that is not `activity:<id>` or `document:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid item key {0:?}, expected activity:<id> or document:<id>")]
pub struct ParseItemKeyError(String);

impl FromStr for ItemKey {
    type Err = ParseItemKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseItemKeyError(s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        let id: i64 = id.trim().parse().map_err(|_| invalid())?;
        match kind.trim() {
            "activity" => Ok(ItemKey::activity(id)),
            "document" => Ok(ItemKey::document(id)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// An activity or document whose "include in mail" flag is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailableItem {
    pub id: ItemId,
    pub kind: ItemKind,
    /// Activity title or document file name.
    pub label: String,
    /// Free-text note attached to the item.
    #[serde(default)]
    pub note_text: String,
    /// Information source the item is grouped under, if any.
    pub source_id: Option<SourceId>,
    /// Title typed by the user for this item.
    pub title_override: Option<String>,
    /// Default title derived from the item's template.
    pub template_title: Option<String>,
}

impl MailableItem {
    /// Creates an activity with no source and no titles.
    pub fn activity(id: impl Into<ItemId>, label: impl Into<String>) -> Self {
        Self::new(ItemKind::Activity, id.into(), label.into())
    }

    /// Creates a document with no source and no titles.
    pub fn document(id: impl Into<ItemId>, label: impl Into<String>) -> Self {
        Self::new(ItemKind::Document, id.into(), label.into())
    }

    fn new(kind: ItemKind, id: ItemId, label: String) -> Self {
        Self {
            id,
            kind,
            label,
            note_text: String::new(),
            source_id: None,
            title_override: None,
            template_title: None,
        }
    }

    /// Sets the information source.
    pub fn with_source(mut self, source_id: SourceId) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Sets the user's title override.
    pub fn with_title_override(mut self, title: impl Into<String>) -> Self {
        self.title_override = Some(title.into());
        self
    }

    /// Sets the template-derived default title.
    pub fn with_template_title(mut self, title: impl Into<String>) -> Self {
        self.template_title = Some(title.into());
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            kind: self.kind,
            id: self.id,
        }
    }

    /// The title shown after the label: the override, else the template
    /// default, else nothing. Blank strings count as absent.
    pub fn effective_title(&self) -> Option<&str> {
        non_blank(self.title_override.as_deref())
            .or_else(|| non_blank(self.template_title.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A party that deliverables can be addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationSource {
    pub id: SourceId,
    pub name: String,
}

impl InformationSource {
    pub fn new(id: impl Into<SourceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_keys_parse_from_display_form() {
        let key: ItemKey = "document:12".parse().unwrap();
        assert_eq!(key, ItemKey::document(12));
        assert_eq!(key.to_string().parse::<ItemKey>().unwrap(), key);
        assert!("folder:1".parse::<ItemKey>().is_err());
        assert!("activity:x".parse::<ItemKey>().is_err());
        assert!("7".parse::<ItemKey>().is_err());
    }

    #[test]
    fn override_wins_over_template_title() {
        let item = MailableItem::activity(1, "Valuation")
            .with_template_title("Standard valuation")
            .with_title_override("Updated valuation");
        assert_eq!(item.effective_title(), Some("Updated valuation"));
    }

    #[test]
    fn template_title_used_without_override() {
        let item = MailableItem::document(2, "deed.pdf").with_template_title("Deed");
        assert_eq!(item.effective_title(), Some("Deed"));
    }

    #[test]
    fn blank_override_falls_through() {
        let item = MailableItem::document(2, "deed.pdf")
            .with_title_override("   ")
            .with_template_title("Deed");
        assert_eq!(item.effective_title(), Some("Deed"));

        let bare = MailableItem::document(3, "plan.pdf").with_title_override("");
        assert_eq!(bare.effective_title(), None);
    }

    #[test]
    fn item_keys_distinguish_kinds() {
        let activity = MailableItem::activity(5, "Call bank");
        let document = MailableItem::document(5, "loan.pdf");
        assert_ne!(activity.key(), document.key());
        assert_eq!(activity.key().to_string(), "activity:5");
    }

    #[test]
    fn item_kind_serialization() {
        let json = serde_json::to_string(&ItemKind::Document).unwrap();
        assert_eq!(json, "\"document\"");
    }
}
