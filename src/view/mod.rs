use crate::model::{Item, ItemId, ItemKind, ItemRole, RoleValue, Token};

mod proxy;

pub use proxy::{Completion, ViewKind, ViewProxy};

/// Structural change applied by a single `ViewState` mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDelta {
    Unchanged,
    Inserted { row: usize },
    Removed { row: usize },
    Updated { row: usize },
    Reset { removed: usize },
}

impl ViewDelta {
    pub fn changed(&self) -> bool {
        !matches!(self, ViewDelta::Unchanged)
    }
}

/// Notifications a presentation layer consumes to animate the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSignal {
    RowInserted(usize),
    RowRemoved(usize),
    RowChanged(usize),
    Reset,
    /// Fired only when the row count crosses between zero and one.
    IsEmptyChanged(bool),
    DataChanged,
}

/// Ordered rows backing one open view, groups always ahead of entries.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    token: Token,
    items: Vec<Item>,
    signals: Vec<ViewSignal>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn set_token(&mut self, token: Token) {
        self.token = token;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn row(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn data(&self, index: usize, role: ItemRole) -> Option<RoleValue<'_>> {
        let item = self.row(index)?;
        Some(match role {
            ItemRole::Id => RoleValue::Id(item.id),
            ItemRole::Title => RoleValue::Text(&item.title),
            ItemRole::Subtitle => RoleValue::Text(&item.subtitle),
            ItemRole::Kind => RoleValue::Kind(item.kind),
        })
    }

    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.position(id).is_some()
    }

    /// Entries append after the last entry; groups go after the last group.
    pub fn insert(&mut self, item: Item) -> ViewDelta {
        if self.contains(item.id) {
            return ViewDelta::Unchanged;
        }
        let row = match item.kind {
            ItemKind::Entry => self.items.len(),
            ItemKind::Group => self
                .items
                .iter()
                .take_while(|existing| existing.kind == ItemKind::Group)
                .count(),
        };
        self.items.insert(row, item);
        self.signals.push(ViewSignal::RowInserted(row));
        if self.items.len() == 1 {
            self.signals.push(ViewSignal::IsEmptyChanged(false));
        }
        self.signals.push(ViewSignal::DataChanged);
        ViewDelta::Inserted { row }
    }

    pub fn update(&mut self, id: ItemId, title: &str, subtitle: &str) -> ViewDelta {
        let Some(row) = self.position(id) else {
            return ViewDelta::Unchanged;
        };
        let item = &mut self.items[row];
        item.title = title.to_string();
        item.subtitle = subtitle.to_string();
        self.signals.push(ViewSignal::RowChanged(row));
        self.signals.push(ViewSignal::DataChanged);
        ViewDelta::Updated { row }
    }

    pub fn remove(&mut self, id: ItemId) -> ViewDelta {
        let Some(row) = self.position(id) else {
            return ViewDelta::Unchanged;
        };
        self.items.remove(row);
        self.signals.push(ViewSignal::RowRemoved(row));
        if self.items.is_empty() {
            self.signals.push(ViewSignal::IsEmptyChanged(true));
        }
        self.signals.push(ViewSignal::DataChanged);
        ViewDelta::Removed { row }
    }

    /// Empties the rows and revokes the token.
    pub fn clear(&mut self) -> ViewDelta {
        self.token = Token::Unregistered;
        if self.items.is_empty() {
            return ViewDelta::Unchanged;
        }
        let removed = self.items.len();
        self.items.clear();
        self.signals.push(ViewSignal::Reset);
        self.signals.push(ViewSignal::IsEmptyChanged(true));
        self.signals.push(ViewSignal::DataChanged);
        ViewDelta::Reset { removed }
    }

    pub fn take_signals(&mut self) -> Vec<ViewSignal> {
        std::mem::take(&mut self.signals)
    }

    pub fn has_pending_signals(&self) -> bool {
        !self.signals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: ItemId) -> Item {
        Item::new(id, ItemKind::Group, format!("group {id}"), "")
    }

    fn entry(id: ItemId) -> Item {
        Item::new(id, ItemKind::Entry, format!("entry {id}"), "")
    }

    fn groups_precede_entries(state: &ViewState) -> bool {
        let first_entry = state
            .items()
            .iter()
            .position(|item| item.kind == ItemKind::Entry)
            .unwrap_or(state.len());
        state.items()[first_entry..]
            .iter()
            .all(|item| item.kind == ItemKind::Entry)
    }

    fn empty_transitions(signals: &[ViewSignal]) -> Vec<bool> {
        signals
            .iter()
            .filter_map(|signal| match signal {
                ViewSignal::IsEmptyChanged(empty) => Some(*empty),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn interleaved_inserts_keep_groups_first() {
        let mut state = ViewState::new();
        let sequence = [entry(1), group(2), entry(3), group(4), group(5), entry(6)];
        for item in sequence {
            state.insert(item);
            assert!(groups_precede_entries(&state));
        }
        let ids: Vec<_> = state.items().iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![2, 4, 5, 1, 3, 6]);
    }

    #[test]
    fn insert_reports_the_row_it_used() {
        let mut state = ViewState::new();
        assert_eq!(state.insert(entry(1)), ViewDelta::Inserted { row: 0 });
        assert_eq!(state.insert(group(2)), ViewDelta::Inserted { row: 0 });
        assert_eq!(state.insert(entry(3)), ViewDelta::Inserted { row: 2 });
        assert_eq!(state.insert(group(4)), ViewDelta::Inserted { row: 1 });
    }

    #[test]
    fn duplicate_ids_are_not_inserted_twice() {
        let mut state = ViewState::new();
        state.insert(entry(1));
        assert_eq!(state.insert(entry(1)), ViewDelta::Unchanged);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn is_empty_fires_only_on_edges() {
        let mut state = ViewState::new();
        state.insert(group(1));
        state.insert(entry(2));
        state.update(2, "renamed", "sub");
        state.remove(1);
        state.remove(99);
        assert_eq!(empty_transitions(&state.take_signals()), vec![false]);

        state.remove(2);
        assert_eq!(empty_transitions(&state.take_signals()), vec![true]);

        state.insert(entry(3));
        state.clear();
        assert_eq!(empty_transitions(&state.take_signals()), vec![false, true]);

        state.clear();
        assert!(state.take_signals().is_empty());
    }

    #[test]
    fn missing_ids_are_no_ops() {
        let mut state = ViewState::new();
        state.insert(entry(1));
        state.take_signals();
        assert_eq!(state.update(5, "x", "y"), ViewDelta::Unchanged);
        assert_eq!(state.remove(5), ViewDelta::Unchanged);
        assert!(!state.has_pending_signals());
    }

    #[test]
    fn update_rewrites_title_and_subtitle_in_place() {
        let mut state = ViewState::new();
        state.insert(group(1));
        state.insert(entry(2));
        assert_eq!(state.update(2, "Mail", "bob"), ViewDelta::Updated { row: 1 });
        assert_eq!(state.data(1, ItemRole::Title), Some(RoleValue::Text("Mail")));
        assert_eq!(state.data(1, ItemRole::Subtitle), Some(RoleValue::Text("bob")));
        assert_eq!(state.data(1, ItemRole::Kind), Some(RoleValue::Kind(ItemKind::Entry)));
        assert_eq!(state.data(7, ItemRole::Id), None);
    }

    #[test]
    fn clear_revokes_the_token() {
        let mut state = ViewState::new();
        state.set_token(Token::Subscribed(4));
        state.insert(entry(1));
        assert_eq!(state.clear(), ViewDelta::Reset { removed: 1 });
        assert_eq!(state.token(), Token::Unregistered);
    }
}
