use indexmap::IndexMap;

use crate::error::{Result, VaultError};
use crate::model::{Item, ItemId, ItemKind};
use crate::search::SearchQuery;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    pub kind: ItemKind,
    pub title: String,
    pub subtitle: String,
}

impl Record {
    pub fn to_item(&self) -> Item {
        Item::new(self.id, self.kind, self.title.clone(), self.subtitle.clone())
    }
}

#[derive(Debug, Clone)]
struct Node {
    record: Record,
    children: Vec<ItemId>,
}

/// Authoritative group/entry hierarchy owned by the database worker.
///
/// Children keep their insertion order; listings put groups before entries
/// without any alphabetic sorting.
#[derive(Debug, Clone)]
pub struct DatabaseTree {
    root: ItemId,
    nodes: IndexMap<ItemId, Node>,
    next_id: ItemId,
}

impl DatabaseTree {
    pub fn new(root_id: ItemId, root_title: impl Into<String>) -> Self {
        let root = Record {
            id: root_id,
            parent: None,
            kind: ItemKind::Group,
            title: root_title.into(),
            subtitle: String::new(),
        };
        let mut nodes = IndexMap::new();
        nodes.insert(
            root_id,
            Node {
                record: root,
                children: Vec::new(),
            },
        );
        Self {
            root: root_id,
            nodes,
            next_id: root_id + 1,
        }
    }

    pub fn root(&self) -> ItemId {
        self.root
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<&Record> {
        self.nodes.get(&id).map(|node| &node.record)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn group_count(&self) -> usize {
        self.count_kind(ItemKind::Group)
    }

    pub fn entry_count(&self) -> usize {
        self.count_kind(ItemKind::Entry)
    }

    fn count_kind(&self, kind: ItemKind) -> usize {
        self.nodes
            .values()
            .filter(|node| node.record.kind == kind && node.record.id != self.root)
            .count()
    }

    pub fn master_groups(&self) -> Vec<&Record> {
        self.children_of(self.root).unwrap_or_default()
    }

    /// Subgroups then entries of `group`, each run in insertion order.
    pub fn children_of(&self, group: ItemId) -> Result<Vec<&Record>> {
        let node = self.group_node(group)?;
        let (mut groups, entries): (Vec<&Record>, Vec<&Record>) = node
            .children
            .iter()
            .filter_map(|id| self.get(*id))
            .partition(|record| record.kind == ItemKind::Group);
        groups.extend(entries);
        Ok(groups)
    }

    /// Entries under `scope` (the whole tree when `None`) in pre-order.
    pub fn search(&self, query: &SearchQuery, scope: Option<ItemId>) -> Result<Vec<&Record>> {
        let mut hits = self.matches_under(query, scope)?;
        query.limit(&mut hits);
        Ok(hits)
    }

    /// Number of entries under `scope` matching `query`, ignoring the result cap.
    pub fn count_matches(&self, query: &SearchQuery, scope: Option<ItemId>) -> Result<usize> {
        self.matches_under(query, scope).map(|hits| hits.len())
    }

    fn matches_under(&self, query: &SearchQuery, scope: Option<ItemId>) -> Result<Vec<&Record>> {
        let scope = scope.unwrap_or(self.root);
        self.group_node(scope)?;
        let mut hits = Vec::new();
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if query.matches(&node.record) {
                hits.push(&node.record);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(hits)
    }

    /// True when `id` lies inside the subtree rooted at `ancestor` (inclusive).
    pub fn is_within(&self, id: ItemId, ancestor: ItemId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.get(current).and_then(|record| record.parent);
        }
        false
    }

    pub fn insert(
        &mut self,
        parent: ItemId,
        kind: ItemKind,
        title: &str,
        subtitle: &str,
    ) -> Result<Record> {
        let record = Record {
            id: self.next_id,
            parent: Some(parent),
            kind,
            title: title.to_string(),
            subtitle: subtitle.to_string(),
        };
        self.attach(record.clone())?;
        Ok(record)
    }

    /// Inserts a record whose id was chosen by the caller, e.g. a store loader.
    pub fn attach(&mut self, record: Record) -> Result<()> {
        if self.nodes.contains_key(&record.id) {
            return Err(VaultError::InvalidRequest(format!(
                "item {} already exists",
                record.id
            )));
        }
        let parent = record
            .parent
            .ok_or_else(|| VaultError::InvalidRequest("only the root may lack a parent".into()))?;
        self.group_node(parent)?;
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(record.id);
        }
        self.next_id = self.next_id.max(record.id + 1);
        self.nodes.insert(
            record.id,
            Node {
                record,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn rename(&mut self, id: ItemId, title: &str, subtitle: &str) -> Result<&Record> {
        let node = self.nodes.get_mut(&id).ok_or(VaultError::NotFound(id))?;
        node.record.title = title.to_string();
        node.record.subtitle = subtitle.to_string();
        Ok(&node.record)
    }

    /// Removes `id` and its whole subtree, returning every removed id (parent first).
    pub fn remove(&mut self, id: ItemId) -> Result<Vec<ItemId>> {
        if id == self.root {
            return Err(VaultError::InvalidRequest(
                "the root group cannot be deleted".into(),
            ));
        }
        let parent = self
            .get(id)
            .ok_or(VaultError::NotFound(id))?
            .parent;
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|child| *child != id);
        }
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.shift_remove(&current) {
                removed.push(current);
                pending.extend(node.children.iter().rev().copied());
            }
        }
        Ok(removed)
    }

    fn group_node(&self, id: ItemId) -> Result<&Node> {
        let node = self.nodes.get(&id).ok_or(VaultError::NotFound(id))?;
        if node.record.kind != ItemKind::Group {
            return Err(VaultError::InvalidRequest(format!("item {id} is not a group")));
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchOptions;
    use assert_matches::assert_matches;

    fn sample() -> anyhow::Result<(DatabaseTree, ItemId, ItemId)> {
        let mut tree = DatabaseTree::new(0, "Root");
        let email = tree.insert(0, ItemKind::Group, "Email", "")?.id;
        tree.insert(email, ItemKind::Entry, "email pass1", "alice")?;
        let banking = tree.insert(0, ItemKind::Group, "Banking", "")?.id;
        tree.insert(banking, ItemKind::Entry, "other", "")?;
        tree.insert(email, ItemKind::Group, "Archive", "")?;
        tree.insert(banking, ItemKind::Entry, "Pass2", "")?;
        Ok((tree, email, banking))
    }

    #[test]
    fn master_groups_keep_insertion_order() -> anyhow::Result<()> {
        let (tree, email, banking) = sample()?;
        let ids: Vec<_> = tree.master_groups().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![email, banking]);
        Ok(())
    }

    #[test]
    fn children_list_groups_before_entries() -> anyhow::Result<()> {
        let (tree, email, _) = sample()?;
        let titles: Vec<_> = tree
            .children_of(email)?
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Archive", "email pass1"]);
        Ok(())
    }

    #[test]
    fn children_of_missing_or_entry_is_rejected() -> anyhow::Result<()> {
        let (tree, email, _) = sample()?;
        assert_matches!(tree.children_of(999), Err(VaultError::NotFound(999)));
        let entry = tree.children_of(email)?[1].id;
        assert_matches!(tree.children_of(entry), Err(VaultError::InvalidRequest(_)));
        Ok(())
    }

    #[test]
    fn search_is_scoped_to_subtree() -> anyhow::Result<()> {
        let (tree, _, banking) = sample()?;
        let query = SearchQuery::parse("pass", &SearchOptions::default()).expect("query");
        let all: Vec<_> = tree.search(&query, None)?.iter().map(|r| r.title.clone()).collect();
        assert_eq!(all, vec!["email pass1", "Pass2"]);
        let scoped: Vec<_> = tree
            .search(&query, Some(banking))?
            .iter()
            .map(|r| r.title.clone())
            .collect();
        assert_eq!(scoped, vec!["Pass2"]);
        Ok(())
    }

    #[test]
    fn match_count_ignores_the_result_cap() -> anyhow::Result<()> {
        let (tree, _, _) = sample()?;
        let mut options = SearchOptions::default();
        options.max_results = 1;
        let query = SearchQuery::parse("pass", &options).expect("query");
        assert_eq!(tree.search(&query, None)?.len(), 1);
        assert_eq!(tree.count_matches(&query, None)?, 2);
        Ok(())
    }

    #[test]
    fn remove_returns_whole_subtree() -> anyhow::Result<()> {
        let (mut tree, email, _) = sample()?;
        let before = tree.len();
        let removed = tree.remove(email)?;
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[0], email);
        assert_eq!(tree.len(), before - 3);
        assert!(!tree.contains(email));
        assert_eq!(tree.master_groups().len(), 1);
        Ok(())
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut tree = DatabaseTree::new(0, "Root");
        assert_matches!(tree.remove(0), Err(VaultError::InvalidRequest(_)));
        assert_matches!(tree.remove(5), Err(VaultError::NotFound(5)));
    }

    #[test]
    fn attach_advances_id_allocation() -> anyhow::Result<()> {
        let mut tree = DatabaseTree::new(1, "Root");
        tree.attach(Record {
            id: 40,
            parent: Some(1),
            kind: ItemKind::Group,
            title: "Loaded".into(),
            subtitle: String::new(),
        })?;
        let next = tree.insert(40, ItemKind::Entry, "fresh", "")?;
        assert_eq!(next.id, 41);
        assert!(tree.is_within(41, 1));
        assert!(!tree.is_within(1, 40));
        Ok(())
    }

    #[test]
    fn entries_cannot_hold_children() -> anyhow::Result<()> {
        let mut tree = DatabaseTree::new(0, "Root");
        let entry = tree.insert(0, ItemKind::Entry, "login", "")?.id;
        assert_matches!(
            tree.insert(entry, ItemKind::Entry, "nested", ""),
            Err(VaultError::InvalidRequest(_))
        );
        Ok(())
    }
}
