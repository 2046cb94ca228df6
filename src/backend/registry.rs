use crossbeam_channel::Sender;
use indexmap::IndexMap;

use crate::backend::messages::{ProxyId, RegistrationInfo, ViewEvent};
use crate::error::VaultError;
use crate::model::{Item, ItemId, Listing, Token};

#[derive(Debug, Clone)]
struct Registration {
    proxy: ProxyId,
    listing: Listing,
}

/// Token → view routing table. Lives on the worker thread only.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    next_token: u64,
    views: IndexMap<ProxyId, Sender<ViewEvent>>,
    registrations: IndexMap<Token, Registration>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, proxy: ProxyId, events: Sender<ViewEvent>) {
        if self.views.insert(proxy, events).is_some() {
            tracing::debug!(proxy, "view re-attached with a fresh event queue");
        }
    }

    /// Forgets the proxy and every token it still held.
    pub fn detach(&mut self, proxy: ProxyId) {
        self.views.shift_remove(&proxy);
        self.registrations.retain(|_, reg| reg.proxy != proxy);
    }

    pub fn is_attached(&self, proxy: ProxyId) -> bool {
        self.views.contains_key(&proxy)
    }

    /// Next subscription token; never the search sentinel and never a live token.
    pub fn allocate_token(&mut self) -> Token {
        loop {
            self.next_token += 1;
            let token = Token::Subscribed(self.next_token);
            if !self.registrations.contains_key(&token) {
                return token;
            }
        }
    }

    /// Binds `token` to `proxy`. Returns the proxy that previously held it, if any.
    pub fn register(&mut self, token: Token, proxy: ProxyId, listing: Listing) -> Option<ProxyId> {
        if !token.is_registered() {
            return None;
        }
        let previous = self
            .registrations
            .insert(token, Registration { proxy, listing })
            .map(|reg| reg.proxy)
            .filter(|previous| *previous != proxy);
        if let Some(previous) = previous {
            tracing::debug!(%token, previous, proxy, "token handed to another view");
        }
        previous
    }

    /// Removes `token` when `proxy` owns it. Unknown tokens are ignored.
    pub fn unregister(&mut self, token: Token, proxy: ProxyId) -> bool {
        match self.registrations.get(&token) {
            Some(reg) if reg.proxy == proxy => {
                self.registrations.shift_remove(&token);
                true
            }
            Some(reg) => {
                tracing::debug!(%token, owner = reg.proxy, proxy, "ignoring unregister from non-owner");
                false
            }
            None => false,
        }
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.registrations.contains_key(&token)
    }

    pub fn listing(&self, token: Token) -> Option<&Listing> {
        self.registrations.get(&token).map(|reg| &reg.listing)
    }

    pub fn snapshot(&self) -> Vec<RegistrationInfo> {
        self.registrations
            .iter()
            .map(|(token, reg)| RegistrationInfo {
                token: *token,
                proxy: reg.proxy,
                listing: reg.listing.clone(),
            })
            .collect()
    }

    /// Sends directly to an attached proxy, independent of any token.
    pub fn send_to(&mut self, proxy: ProxyId, event: ViewEvent) -> bool {
        let Some(sender) = self.views.get(&proxy) else {
            return false;
        };
        if sender.send(event).is_err() {
            tracing::debug!(proxy, "view queue closed, dropping its registrations");
            self.detach(proxy);
            return false;
        }
        true
    }

    /// Delivers to the owner of `token` only; unregistered tokens are dropped.
    pub fn route_insert(&mut self, token: Token, item: Item) -> bool {
        let Some(proxy) = self.registrations.get(&token).map(|reg| reg.proxy) else {
            tracing::debug!(error = %VaultError::RaceOnUnregister(token), "insert dropped");
            return false;
        };
        self.send_to(proxy, ViewEvent::Inserted { token, item })
    }

    pub fn route_completed(&mut self, token: Token, count: usize) -> bool {
        let Some(reg) = self.registrations.get(&token).cloned() else {
            tracing::debug!(error = %VaultError::RaceOnUnregister(token), "completion dropped");
            return false;
        };
        self.send_to(
            reg.proxy,
            ViewEvent::Completed {
                token,
                listing: reg.listing,
                count,
            },
        )
    }

    /// Inserts `item` into every registration whose listing accepts it.
    pub fn route_added<F>(&mut self, item: &Item, mut shows: F) -> usize
    where
        F: FnMut(&Listing) -> bool,
    {
        let targets: Vec<_> = self
            .registrations
            .iter()
            .filter(|(_, reg)| shows(&reg.listing))
            .map(|(token, reg)| (*token, reg.proxy))
            .collect();
        self.fan_out(targets, |token| ViewEvent::Inserted {
            token,
            item: item.clone(),
        })
    }

    /// Broadcasts to every registration; views without the id ignore it.
    pub fn route_update(&mut self, id: ItemId, title: &str, subtitle: &str) -> usize {
        let targets = self.all_targets();
        self.fan_out(targets, |token| ViewEvent::Updated {
            token,
            id,
            title: title.to_string(),
            subtitle: subtitle.to_string(),
        })
    }

    pub fn route_delete(&mut self, id: ItemId) -> usize {
        let targets = self.all_targets();
        self.fan_out(targets, |token| ViewEvent::Deleted { token, id })
    }

    /// Tells every registered view its rows are stale and empties the table.
    pub fn invalidate_all(&mut self) -> usize {
        let targets = self.all_targets();
        let delivered = self.fan_out(targets, |token| ViewEvent::Invalidated { token });
        self.registrations.clear();
        delivered
    }

    fn all_targets(&self) -> Vec<(Token, ProxyId)> {
        self.registrations
            .iter()
            .map(|(token, reg)| (*token, reg.proxy))
            .collect()
    }

    fn fan_out<F>(&mut self, targets: Vec<(Token, ProxyId)>, make: F) -> usize
    where
        F: Fn(Token) -> ViewEvent,
    {
        targets
            .into_iter()
            .filter(|(token, proxy)| self.send_to(*proxy, make(*token)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemKind;
    use assert_matches::assert_matches;
    use crossbeam_channel::{unbounded, Receiver};

    fn attached(registry: &mut ViewRegistry, proxy: ProxyId) -> Receiver<ViewEvent> {
        let (tx, rx) = unbounded();
        registry.attach(proxy, tx);
        rx
    }

    fn entry(id: ItemId) -> Item {
        Item::new(id, ItemKind::Entry, "login", "")
    }

    #[test]
    fn allocated_tokens_are_distinct_and_never_search() {
        let mut registry = ViewRegistry::new();
        let first = registry.allocate_token();
        let second = registry.allocate_token();
        assert_ne!(first, second);
        assert_ne!(first, Token::Search);
        assert_matches!(second, Token::Subscribed(_));
    }

    #[test]
    fn insert_reaches_only_the_owner() {
        let mut registry = ViewRegistry::new();
        let rx_a = attached(&mut registry, 1);
        let rx_b = attached(&mut registry, 2);
        let token = registry.allocate_token();
        registry.register(token, 1, Listing::MasterGroups);

        assert!(registry.route_insert(token, entry(10)));
        assert_matches!(rx_a.try_recv(), Ok(ViewEvent::Inserted { item, .. }) if item.id == 10);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn insert_for_unregistered_token_is_dropped() {
        let mut registry = ViewRegistry::new();
        let rx = attached(&mut registry, 1);
        let token = registry.allocate_token();
        registry.register(token, 1, Listing::MasterGroups);
        registry.unregister(token, 1);

        assert!(!registry.route_insert(token, entry(10)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn delete_is_broadcast_to_every_registration() {
        let mut registry = ViewRegistry::new();
        let rx_a = attached(&mut registry, 1);
        let rx_b = attached(&mut registry, 2);
        let token = registry.allocate_token();
        registry.register(token, 1, Listing::GroupContents(3));
        registry.register(Token::Search, 2, Listing::Search { query: "x".into(), root: None });

        assert_eq!(registry.route_delete(10), 2);
        assert_matches!(rx_a.try_recv(), Ok(ViewEvent::Deleted { id: 10, .. }));
        assert_matches!(rx_b.try_recv(), Ok(ViewEvent::Deleted { token: Token::Search, id: 10 }));
    }

    #[test]
    fn search_token_moves_to_the_newest_holder() {
        let mut registry = ViewRegistry::new();
        let _rx_a = attached(&mut registry, 1);
        let rx_b = attached(&mut registry, 2);
        let listing = Listing::Search { query: "x".into(), root: None };
        assert_eq!(registry.register(Token::Search, 1, listing.clone()), None);
        assert_eq!(registry.register(Token::Search, 2, listing), Some(1));

        // the superseded holder can no longer remove the new registration
        assert!(!registry.unregister(Token::Search, 1));
        assert!(registry.route_insert(Token::Search, entry(4)));
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn unregister_twice_is_harmless() {
        let mut registry = ViewRegistry::new();
        let _rx = attached(&mut registry, 1);
        let token = registry.allocate_token();
        registry.register(token, 1, Listing::MasterGroups);
        assert!(registry.unregister(token, 1));
        assert!(!registry.unregister(token, 1));
        assert!(registry.is_empty());
    }

    #[test]
    fn closed_queue_drops_its_registrations() {
        let mut registry = ViewRegistry::new();
        let rx = attached(&mut registry, 1);
        let token = registry.allocate_token();
        registry.register(token, 1, Listing::MasterGroups);
        drop(rx);

        assert_eq!(registry.route_delete(5), 0);
        assert!(!registry.is_registered(token));
        assert!(!registry.is_attached(1));
    }

    #[test]
    fn detach_removes_all_tokens_of_the_proxy() {
        let mut registry = ViewRegistry::new();
        let _rx = attached(&mut registry, 1);
        let first = registry.allocate_token();
        registry.register(first, 1, Listing::MasterGroups);
        registry.register(Token::Search, 1, Listing::Search { query: "a".into(), root: None });
        registry.detach(1);
        assert!(registry.is_empty());
    }

    #[test]
    fn added_items_follow_the_listing_predicate() {
        let mut registry = ViewRegistry::new();
        let rx_a = attached(&mut registry, 1);
        let rx_b = attached(&mut registry, 2);
        let a = registry.allocate_token();
        let b = registry.allocate_token();
        registry.register(a, 1, Listing::GroupContents(3));
        registry.register(b, 2, Listing::GroupContents(4));

        let delivered = registry.route_added(&entry(9), |listing| {
            *listing == Listing::GroupContents(4)
        });
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_matches!(rx_b.try_recv(), Ok(ViewEvent::Inserted { token, .. }) if token == b);
    }

    #[test]
    fn invalidate_all_empties_the_table() {
        let mut registry = ViewRegistry::new();
        let rx = attached(&mut registry, 1);
        let token = registry.allocate_token();
        registry.register(token, 1, Listing::MasterGroups);
        assert_eq!(registry.invalidate_all(), 1);
        assert!(registry.is_empty());
        assert!(registry.is_attached(1));
        assert_matches!(rx.try_recv(), Ok(ViewEvent::Invalidated { .. }));
    }
}
