//! Link containers
//!
//! One container per (anchor, link type, direction). A container is a plain
//! bucket: it never checks multiplicity, the link system does that before
//! inserting.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use qsf_core::Pool;

use crate::anchor_id::{AnchorId, LinkDirection};
use crate::link::{Link, LinkHandle};
use crate::link_type::LinkTypeId;
use crate::proxy::ProxyCell;

/// Connections of one container, keyed by the anchor at the other end
pub type LinkConnectionMap = BTreeMap<AnchorId, LinkHandle>;

/// Bucket of links and proxy observers
pub struct LinkContainer {
    link_type_id: LinkTypeId,
    direction: LinkDirection,
    connections: LinkConnectionMap,
    proxies: Vec<Weak<ProxyCell>>,
    prevent_removal_count: u32,
}

impl LinkContainer {
    pub(crate) fn new(link_type_id: LinkTypeId, direction: LinkDirection) -> Self {
        Self {
            link_type_id,
            direction,
            connections: LinkConnectionMap::new(),
            proxies: Vec::new(),
            prevent_removal_count: 0,
        }
    }

    /// Link type of every link in this container
    pub fn link_type_id(&self) -> LinkTypeId {
        self.link_type_id
    }

    /// Direction this container is seen from
    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Connections by remote anchor
    pub fn connections(&self) -> &LinkConnectionMap {
        &self.connections
    }

    /// Link to a given remote anchor
    pub fn get(&self, remote: AnchorId) -> Option<LinkHandle> {
        self.connections.get(&remote).copied()
    }

    /// Number of links
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the container holds no links
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Add a link under the id of its other end; false if that key is taken
    pub(crate) fn insert_link(&mut self, link: &Link, handle: LinkHandle) -> bool {
        let remote = link.remote_anchor_id(self.direction);
        match self.connections.entry(remote) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
        }
    }

    /// Remove a link; false if it was not in this container
    pub(crate) fn remove_link(&mut self, link: &Link, handle: LinkHandle) -> bool {
        let remote = link.remote_anchor_id(self.direction);
        if self.connections.get(&remote) == Some(&handle) {
            self.connections.remove(&remote);
            true
        } else {
            false
        }
    }

    /// Append the links held here, optionally only those of one type
    pub fn collect_links(
        &self,
        links: &Pool<Link>,
        out: &mut Vec<LinkHandle>,
        type_filter: Option<LinkTypeId>,
    ) {
        out.extend(self.connections.values().copied().filter(|handle| {
            type_filter.is_none_or(|filter| {
                links
                    .get(*handle)
                    .is_some_and(|link| link.link_type_id() == filter)
            })
        }));
    }

    pub(crate) fn register_link_proxy(&mut self, proxy: Weak<ProxyCell>) {
        if !self.proxies.iter().any(|known| known.ptr_eq(&proxy)) {
            self.proxies.push(proxy);
        }
    }

    pub(crate) fn unregister_link_proxy(&mut self, proxy: &Arc<ProxyCell>) -> bool {
        let before = self.proxies.len();
        self.proxies
            .retain(|known| !std::ptr::eq(known.as_ptr(), Arc::as_ptr(proxy)));
        self.proxies.len() != before
    }

    /// Proxies that are still alive, in registration order
    pub(crate) fn live_proxies(&self) -> Vec<Arc<ProxyCell>> {
        self.proxies.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live registered proxies
    pub fn proxy_count(&self) -> usize {
        self.proxies.iter().filter(|proxy| proxy.strong_count() > 0).count()
    }

    /// Forget proxies whose owner has been dropped
    pub(crate) fn purge_dead_proxies(&mut self) -> usize {
        let before = self.proxies.len();
        self.proxies.retain(|proxy| proxy.strong_count() > 0);
        before - self.proxies.len()
    }

    pub(crate) fn prevent_removal(&mut self) {
        self.prevent_removal_count += 1;
    }

    pub(crate) fn allow_removal(&mut self) -> bool {
        if self.prevent_removal_count == 0 {
            return false;
        }
        self.prevent_removal_count -= 1;
        true
    }

    /// True once nothing keeps this container alive
    pub fn can_be_removed(&self) -> bool {
        self.prevent_removal_count == 0 && self.connections.is_empty() && self.proxy_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::proxy::ProxyCell;

    const TYPE: LinkTypeId = LinkTypeId::new(1);

    fn link(source: u64, target: u64) -> Link {
        Link::new(TYPE, AnchorId::new(0, source), AnchorId::new(0, target), None)
    }

    #[test]
    fn test_insert_keys_by_remote_end() {
        let mut pool = Pool::new();
        let l = link(1, 2);
        let handle = pool.insert(link(1, 2));

        let mut forward = LinkContainer::new(TYPE, LinkDirection::Forward);
        let mut backward = LinkContainer::new(TYPE, LinkDirection::Backward);
        assert!(forward.insert_link(&l, handle));
        assert!(backward.insert_link(&l, handle));

        assert_eq!(forward.get(AnchorId::new(0, 2)), Some(handle));
        assert_eq!(backward.get(AnchorId::new(0, 1)), Some(handle));
        // Same remote again is refused
        assert!(!forward.insert_link(&l, handle));
    }

    #[test]
    fn test_remove_requires_matching_handle() {
        let mut pool = Pool::new();
        let l = link(1, 2);
        let handle = pool.insert(link(1, 2));
        let other = pool.insert(link(1, 2));

        let mut container = LinkContainer::new(TYPE, LinkDirection::Forward);
        container.insert_link(&l, handle);

        assert!(!container.remove_link(&l, other));
        assert!(container.remove_link(&l, handle));
        assert!(!container.remove_link(&l, handle));
        assert!(container.is_empty());
    }

    #[test]
    fn test_collect_links_with_filter() {
        let mut pool = Pool::new();
        let l = link(1, 2);
        let handle = pool.insert(link(1, 2));
        let mut container = LinkContainer::new(TYPE, LinkDirection::Forward);
        container.insert_link(&l, handle);

        let mut out = Vec::new();
        container.collect_links(&pool, &mut out, Some(TYPE));
        assert_eq!(out, vec![handle]);

        out.clear();
        container.collect_links(&pool, &mut out, Some(LinkTypeId::new(99)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_can_be_removed() {
        let mut container = LinkContainer::new(TYPE, LinkDirection::Forward);
        assert!(container.can_be_removed());

        container.prevent_removal();
        assert!(!container.can_be_removed());
        assert!(container.allow_removal());
        assert!(!container.allow_removal());
        assert!(container.can_be_removed());

        let proxy = Arc::new(ProxyCell::noop());
        container.register_link_proxy(Arc::downgrade(&proxy));
        container.register_link_proxy(Arc::downgrade(&proxy));
        assert_eq!(container.proxy_count(), 1);
        assert!(!container.can_be_removed());

        // A dropped proxy no longer keeps the container alive
        drop(proxy);
        assert!(container.can_be_removed());
        assert_eq!(container.purge_dead_proxies(), 1);
    }
}
