use std::fmt;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

pub type ItemId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemKind {
    Group,
    Entry,
}

/// One row of a view: a copy of a group or entry, never a reference into the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub subtitle: String,
    pub kind: ItemKind,
}

impl Item {
    pub fn new(id: ItemId, kind: ItemKind, title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            subtitle: subtitle.into(),
            kind,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ItemKind::Group
    }
}

/// Subscription of one open view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Token {
    #[default]
    Unregistered,
    /// Reserved for the single active search view.
    Search,
    Subscribed(u64),
}

impl Token {
    pub fn is_registered(&self) -> bool {
        !matches!(self, Token::Unregistered)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Unregistered => f.write_str("unregistered"),
            Token::Search => f.write_str("search"),
            Token::Subscribed(id) => write!(f, "#{id}"),
        }
    }
}

/// What a registered token is listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    MasterGroups,
    GroupContents(ItemId),
    Search { query: String, root: Option<ItemId> },
}

impl Listing {
    pub fn is_search(&self) -> bool {
        matches!(self, Listing::Search { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ItemRole {
    Id,
    Title,
    Subtitle,
    Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleValue<'a> {
    Id(ItemId),
    Text(&'a str),
    Kind(ItemKind),
}
