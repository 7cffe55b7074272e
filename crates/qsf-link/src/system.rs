//! Link system
//!
//! Owns every anchor and link and is the only place either is created or
//! destroyed. All structural mutations go through here, so this is where
//! link type and multiplicity rules are enforced.
//!
//! A connect or disconnect always runs in this order:
//! 1. update the source anchor's forward container
//! 2. update the target anchor's backward container
//! 3. structural change hook of the source, then of the target
//! 4. proxy callbacks of the source container, then of the target container
//!
//! The system is single threaded. Wrap it in a [`SharedLinkSystem`] when
//! several threads need access.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use qsf_core::Pool;

use crate::adapter::LinkAnchorAdapter;
use crate::anchor::LinkAnchor;
use crate::anchor_id::{AnchorId, LinkDirection};
use crate::container::{LinkConnectionMap, LinkContainer};
use crate::error::{LinkError, LinkResult};
use crate::link::{Link, LinkHandle, LinkInfo};
use crate::link_type::{LinkType, LinkTypeId, LinkTypeManager};
use crate::proxy::{LinkEvent, ProxyCell, ProxyRegistration};

static EMPTY_CONNECTION_MAP: LinkConnectionMap = LinkConnectionMap::new();

/// Link system behind a mutex, for access from several threads
pub type SharedLinkSystem = Arc<Mutex<LinkSystem>>;

/// Owner of the link graph
pub struct LinkSystem {
    link_types: LinkTypeManager,
    anchors: BTreeMap<AnchorId, LinkAnchor>,
    links: Pool<Link>,
}

impl LinkSystem {
    /// Create an empty graph using the given link types
    pub fn new(link_types: LinkTypeManager) -> Self {
        Self {
            link_types,
            anchors: BTreeMap::new(),
            links: Pool::new(),
        }
    }

    /// Move the system behind a mutex
    pub fn into_shared(self) -> SharedLinkSystem {
        Arc::new(Mutex::new(self))
    }

    /// Registered link types
    pub fn link_types(&self) -> &LinkTypeManager {
        &self.link_types
    }

    /// Registered link types, for registration at startup
    pub fn link_types_mut(&mut self) -> &mut LinkTypeManager {
        &mut self.link_types
    }

    /// The shared empty map handed out when a container does not exist
    pub fn empty_connection_map() -> &'static LinkConnectionMap {
        &EMPTY_CONNECTION_MAP
    }

    /// Number of anchors
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// All anchors in id order
    pub fn anchors(&self) -> impl Iterator<Item = &LinkAnchor> {
        self.anchors.values()
    }

    /// Look up a link
    pub fn link(&self, handle: LinkHandle) -> Option<&Link> {
        self.links.get(handle)
    }

    /// Existing anchor of an object
    pub fn link_anchor<A: LinkAnchorAdapter>(&self, object: &A) -> Option<&LinkAnchor> {
        self.link_anchor_by_id(object.anchor_id())
    }

    /// Existing anchor by id
    pub fn link_anchor_by_id(&self, id: AnchorId) -> Option<&LinkAnchor> {
        self.anchors.get(&id)
    }

    /// Anchor of an object, constructed through its adapter if missing
    pub fn get_or_create_link_anchor<A: LinkAnchorAdapter>(
        &mut self,
        object: &A,
    ) -> LinkResult<&mut LinkAnchor> {
        let id = self.ensure_link_anchor(object)?;
        self.anchors.get_mut(&id).ok_or(LinkError::AnchorNotFound(id))
    }

    pub(crate) fn ensure_link_anchor<A: LinkAnchorAdapter>(&mut self, object: &A) -> LinkResult<AnchorId> {
        match self.construct_missing_anchor(object)? {
            Some(anchor) => Ok(self.insert_anchor(anchor)),
            None => Ok(object.anchor_id()),
        }
    }

    /// Build the anchor of an object that has none yet, without inserting it
    fn construct_missing_anchor<A: LinkAnchorAdapter>(&self, object: &A) -> LinkResult<Option<LinkAnchor>> {
        let id = object.anchor_id();
        if self.anchors.contains_key(&id) {
            return Ok(None);
        }
        let anchor = object.construct_link_anchor()?;
        debug_assert_eq!(anchor.id(), id, "adapter built an anchor with a foreign id");
        Ok(Some(anchor))
    }

    fn insert_anchor(&mut self, anchor: LinkAnchor) -> AnchorId {
        let id = anchor.id();
        if !self.anchors.contains_key(&id) {
            tracing::debug!(anchor = %id, "Created link anchor");
            self.anchors.insert(id, anchor);
        }
        id
    }

    /// Destroy an object's anchor.
    ///
    /// Returns `Ok(false)` if it had none. Fails with
    /// [`LinkError::AnchorNotEmpty`] while links still touch it and with
    /// [`LinkError::AnchorHasProxies`] while live proxies are registered at it.
    pub fn destroy_link_anchor<A: LinkAnchorAdapter>(&mut self, object: &A) -> LinkResult<bool> {
        let id = object.anchor_id();
        let Some(anchor) = self.anchors.get(&id) else {
            return Ok(false);
        };

        if anchor.has_links() {
            return Err(LinkError::AnchorNotEmpty {
                anchor: id,
                links: anchor.link_count(),
            });
        }
        Self::check_no_proxies(anchor)?;

        self.anchors.remove(&id);
        tracing::debug!(anchor = %id, "Destroyed link anchor");
        Ok(true)
    }

    /// Disconnect everything from an object's anchor, then destroy it.
    ///
    /// Registered proxies are not released; with any still live nothing is
    /// disconnected and [`LinkError::AnchorHasProxies`] is returned.
    pub fn destroy_link_anchor_cascading<A: LinkAnchorAdapter>(
        &mut self,
        object: &A,
    ) -> LinkResult<bool> {
        if let Some(anchor) = self.anchors.get(&object.anchor_id()) {
            Self::check_no_proxies(anchor)?;
        }
        self.destroy_all_links(object);
        self.destroy_link_anchor(object)
    }

    fn check_no_proxies(anchor: &LinkAnchor) -> LinkResult<()> {
        match anchor.proxy_count() {
            0 => Ok(()),
            proxies => Err(LinkError::AnchorHasProxies {
                anchor: anchor.id(),
                proxies,
            }),
        }
    }

    /// Link from `source` to `target` of a type
    pub fn get_link<A: LinkAnchorAdapter, B: LinkAnchorAdapter>(
        &self,
        source: &A,
        target: &B,
        link_type_id: LinkTypeId,
    ) -> Option<LinkHandle> {
        self.anchors
            .get(&source.anchor_id())?
            .link_by_id(target.anchor_id(), link_type_id, LinkDirection::Forward)
    }

    /// Link from `source` to `target`, created if missing.
    ///
    /// Anchors are created for both objects as needed. If the type allows a
    /// single connection in a direction, whatever link occupies that slot is
    /// destroyed first.
    pub fn get_or_create_link<A: LinkAnchorAdapter, B: LinkAnchorAdapter>(
        &mut self,
        source: &A,
        target: &B,
        link_type_id: LinkTypeId,
    ) -> LinkResult<LinkHandle> {
        if !self.link_types.contains(link_type_id) {
            return Err(LinkError::UnknownLinkType(link_type_id));
        }
        // Both sides are built before either is inserted
        let new_source = self.construct_missing_anchor(source)?;
        let new_target = self.construct_missing_anchor(target)?;
        for anchor in [new_source, new_target].into_iter().flatten() {
            self.insert_anchor(anchor);
        }
        self.internal_create_link(source.anchor_id(), target.anchor_id(), link_type_id)
    }

    /// Destroy the link from `source` to `target`; false if there was none
    pub fn destroy_link<A: LinkAnchorAdapter, B: LinkAnchorAdapter>(
        &mut self,
        source: &A,
        target: &B,
        link_type_id: LinkTypeId,
    ) -> bool {
        self.get_link(source, target, link_type_id)
            .is_some_and(|handle| self.internal_destroy_link(handle))
    }

    /// Destroy every link touching an object's anchor; returns how many
    pub fn destroy_all_links<A: LinkAnchorAdapter>(&mut self, object: &A) -> usize {
        let mut handles = Vec::new();
        self.collect_all_links(object, &mut handles);
        handles
            .into_iter()
            .filter(|handle| self.internal_destroy_link(*handle))
            .count()
    }

    /// Connections of an object in a direction; the shared empty map if none
    pub fn get_link_connection_map<A: LinkAnchorAdapter>(
        &self,
        object: &A,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> &LinkConnectionMap {
        self.connection_map_by_id(object.anchor_id(), link_type_id, direction)
    }

    pub(crate) fn connection_map_by_id(
        &self,
        anchor_id: AnchorId,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> &LinkConnectionMap {
        self.anchors
            .get(&anchor_id)
            .and_then(|anchor| anchor.link_container_by_id(link_type_id, direction))
            .map_or(&EMPTY_CONNECTION_MAP, LinkContainer::connections)
    }

    /// Append all links of an object, forward first
    pub fn collect_all_links<A: LinkAnchorAdapter>(&self, object: &A, out: &mut Vec<LinkHandle>) {
        if let Some(anchor) = self.anchors.get(&object.anchor_id()) {
            anchor.collect_all_links(out);
        }
    }

    /// Append an object's links in one direction, optionally of a single type
    pub fn collect_links<A: LinkAnchorAdapter>(
        &self,
        object: &A,
        direction: LinkDirection,
        type_filter: Option<LinkTypeId>,
        out: &mut Vec<LinkHandle>,
    ) {
        let Some(anchor) = self.anchors.get(&object.anchor_id()) else {
            return;
        };
        match type_filter {
            Some(link_type_id) => {
                if let Some(container) = anchor.link_container_by_id(link_type_id, direction) {
                    container.collect_links(&self.links, out, Some(link_type_id));
                }
            }
            None => out.extend_from_slice(anchor.links(direction)),
        }
    }

    /// Append an object's links whose type is or derives from `base`
    pub fn collect_links_derived_from<A: LinkAnchorAdapter>(
        &self,
        object: &A,
        base: LinkTypeId,
        direction: LinkDirection,
        out: &mut Vec<LinkHandle>,
    ) {
        if let Some(anchor) = self.anchors.get(&object.anchor_id()) {
            anchor.collect_links_derived_from(&self.links, &self.link_types, base, direction, out);
        }
    }

    /// Keep a container alive even while empty
    pub fn prevent_container_removal<A: LinkAnchorAdapter>(
        &mut self,
        object: &A,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> LinkResult<()> {
        if !self.link_types.contains(link_type_id) {
            return Err(LinkError::UnknownLinkType(link_type_id));
        }
        let anchor_id = self.ensure_link_anchor(object)?;
        if let Some(container) = self
            .anchors
            .get_mut(&anchor_id)
            .and_then(|anchor| anchor.internal_link_container(link_type_id, direction, true))
        {
            container.prevent_removal();
        }
        Ok(())
    }

    /// Undo one [`prevent_container_removal`](Self::prevent_container_removal)
    pub fn allow_container_removal<A: LinkAnchorAdapter>(
        &mut self,
        object: &A,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> bool {
        let Some(anchor) = self.anchors.get_mut(&object.anchor_id()) else {
            return false;
        };
        let released = anchor
            .internal_link_container(link_type_id, direction, false)
            .is_some_and(LinkContainer::allow_removal);
        if released {
            anchor.evict_container_if_removable(link_type_id, direction);
        }
        released
    }

    /// Forget dropped proxies and evict containers nothing keeps alive any more
    pub fn purge_dead_proxies(&mut self) -> usize {
        let mut purged = 0;
        for anchor in self.anchors.values_mut() {
            for direction in LinkDirection::ALL {
                let containers = anchor.containers_mut(direction);
                for container in containers.values_mut() {
                    purged += container.purge_dead_proxies();
                }
                containers.retain(|_, container| !container.can_be_removed());
            }
        }
        if purged > 0 {
            log::debug!("Purged {} dead link proxies", purged);
        }
        purged
    }

    pub(crate) fn register_proxy(
        &mut self,
        anchor_id: AnchorId,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
        proxy: &Arc<ProxyCell>,
    ) -> LinkResult<()> {
        if !self.link_types.contains(link_type_id) {
            return Err(LinkError::UnknownLinkType(link_type_id));
        }
        let container = self
            .anchors
            .get_mut(&anchor_id)
            .and_then(|anchor| anchor.internal_link_container(link_type_id, direction, true))
            .ok_or(LinkError::AnchorNotFound(anchor_id))?;
        container.register_link_proxy(Arc::downgrade(proxy));
        Ok(())
    }

    pub(crate) fn unregister_proxy(&mut self, registration: ProxyRegistration, proxy: &Arc<ProxyCell>) {
        let ProxyRegistration {
            anchor_id,
            link_type_id,
            direction,
        } = registration;
        let Some(anchor) = self.anchors.get_mut(&anchor_id) else {
            return;
        };
        if let Some(container) = anchor.internal_link_container(link_type_id, direction, false) {
            container.unregister_link_proxy(proxy);
            container.purge_dead_proxies();
        }
        anchor.evict_container_if_removable(link_type_id, direction);
    }

    pub(crate) fn internal_create_link(
        &mut self,
        source: AnchorId,
        target: AnchorId,
        link_type_id: LinkTypeId,
    ) -> LinkResult<LinkHandle> {
        let link_type = self
            .link_types
            .get(link_type_id)
            .ok_or(LinkError::UnknownLinkType(link_type_id))?;
        let multiple_forward = link_type.supports_multiple_connections(LinkDirection::Forward);
        let multiple_backward = link_type.supports_multiple_connections(LinkDirection::Backward);

        let source_anchor = self
            .anchors
            .get(&source)
            .ok_or(LinkError::AnchorNotFound(source))?;
        if !self.anchors.contains_key(&target) {
            return Err(LinkError::AnchorNotFound(target));
        }
        if let Some(existing) = source_anchor.link_by_id(target, link_type_id, LinkDirection::Forward) {
            return Ok(existing);
        }

        if !multiple_forward {
            self.destroy_superseded(source, link_type_id, LinkDirection::Forward);
        }
        if !multiple_backward {
            self.destroy_superseded(target, link_type_id, LinkDirection::Backward);
        }

        let hooks = self
            .link_types
            .get(link_type_id)
            .and_then(LinkType::create_hooks);
        let handle = self
            .links
            .insert(Link::new(link_type_id, source, target, hooks));
        self.attach(source, LinkDirection::Forward, handle);
        self.attach(target, LinkDirection::Backward, handle);

        self.notify_structural_change(source, target);
        tracing::debug!(
            source = %source,
            target = %target,
            link_type = %link_type_id,
            "Link connected"
        );

        let info = LinkInfo {
            link_type_id,
            source,
            target,
        };
        self.notify_proxies(handle, info, true);
        Ok(handle)
    }

    pub(crate) fn internal_destroy_link(&mut self, handle: LinkHandle) -> bool {
        let Some(link) = self.links.get_mut(handle) else {
            return false;
        };
        link.disconnect();
        let info = link.info();

        self.detach(info.source, LinkDirection::Forward, handle);
        self.detach(info.target, LinkDirection::Backward, handle);
        self.links.remove(handle);

        self.notify_structural_change(info.source, info.target);
        tracing::debug!(
            source = %info.source,
            target = %info.target,
            link_type = %info.link_type_id,
            "Link disconnected"
        );
        self.notify_proxies(handle, info, false);

        for (anchor_id, direction) in [
            (info.source, LinkDirection::Forward),
            (info.target, LinkDirection::Backward),
        ] {
            if let Some(anchor) = self.anchors.get_mut(&anchor_id) {
                anchor.evict_container_if_removable(info.link_type_id, direction);
            }
        }
        true
    }

    fn destroy_superseded(&mut self, anchor_id: AnchorId, link_type_id: LinkTypeId, direction: LinkDirection) {
        let superseded: Vec<LinkHandle> = self
            .anchors
            .get(&anchor_id)
            .and_then(|anchor| anchor.link_container_by_id(link_type_id, direction))
            .map(|container| container.connections().values().copied().collect())
            .unwrap_or_default();

        for handle in superseded {
            log::debug!(
                "Replacing link {:?} of type {} at anchor {}, only one {:?} connection allowed",
                handle,
                link_type_id,
                anchor_id,
                direction
            );
            self.internal_destroy_link(handle);
        }
    }

    fn attach(&mut self, anchor_id: AnchorId, direction: LinkDirection, handle: LinkHandle) {
        let Some(link) = self.links.get(handle) else {
            return;
        };
        let Some(anchor) = self.anchors.get_mut(&anchor_id) else {
            return;
        };
        anchor.insert_link(direction, handle);
        if let Some(container) = anchor.internal_link_container(link.link_type_id(), direction, true) {
            let inserted = container.insert_link(link, handle);
            debug_assert!(inserted, "container slot taken despite multiplicity check");
        }
    }

    fn detach(&mut self, anchor_id: AnchorId, direction: LinkDirection, handle: LinkHandle) {
        let Some(link) = self.links.get(handle) else {
            return;
        };
        let Some(anchor) = self.anchors.get_mut(&anchor_id) else {
            return;
        };
        anchor.remove_link(direction, handle);
        if let Some(container) = anchor.internal_link_container(link.link_type_id(), direction, false) {
            container.remove_link(link, handle);
        }
    }

    fn notify_structural_change(&mut self, source: AnchorId, target: AnchorId) {
        if let Some(anchor) = self.anchors.get_mut(&source) {
            anchor.on_structural_change();
        }
        if target != source {
            if let Some(anchor) = self.anchors.get_mut(&target) {
                anchor.on_structural_change();
            }
        }
    }

    fn notify_proxies(&self, handle: LinkHandle, info: LinkInfo, added: bool) {
        for direction in LinkDirection::ALL {
            let (anchor, remote) = match direction {
                LinkDirection::Forward => (info.source, info.target),
                LinkDirection::Backward => (info.target, info.source),
            };
            let proxies = self
                .anchors
                .get(&anchor)
                .and_then(|a| a.link_container_by_id(info.link_type_id, direction))
                .map(LinkContainer::live_proxies)
                .unwrap_or_default();
            if proxies.is_empty() {
                continue;
            }

            let event = LinkEvent {
                link: handle,
                link_type_id: info.link_type_id,
                direction,
                anchor,
                remote,
            };
            for proxy in proxies {
                if added {
                    proxy.link_added(&event);
                } else {
                    proxy.link_removed(&event);
                }
            }
        }
    }
}

impl Default for LinkSystem {
    fn default() -> Self {
        Self::new(LinkTypeManager::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use qsf_core::{Entity, Prototype};

    use crate::anchor::AnchorHooks;
    use crate::link::LinkHooks;
    use crate::link_type::LinkTypeFlags;
    use crate::proxy::LinkProxy;

    const CHILD: LinkTypeId = LinkTypeId::new(10);
    const MULTI: LinkTypeId = LinkTypeId::new(11);
    const SINGLE: LinkTypeId = LinkTypeId::new(12);

    fn system() -> LinkSystem {
        let mut types = LinkTypeManager::new();
        // Each child has one parent, a parent many children
        types.register_link_type(CHILD, None, "Child", false, true).unwrap();
        types.register_link_type(MULTI, None, "Multi", true, true).unwrap();
        types.register_link_type(SINGLE, None, "Single", false, false).unwrap();
        LinkSystem::new(types)
    }

    fn proto(index: u32) -> Prototype {
        Prototype::new(0, Entity::new(index, 0))
    }

    #[test]
    fn test_link_recorded_on_both_sides() {
        let mut system = system();
        let (a, b) = (proto(1), proto(2));

        let handle = system.get_or_create_link(&a, &b, MULTI).unwrap();

        let source = system.link_anchor(&a).unwrap();
        let target = system.link_anchor(&b).unwrap();
        assert_eq!(source.links(LinkDirection::Forward), &[handle]);
        assert!(source.links(LinkDirection::Backward).is_empty());
        assert_eq!(target.links(LinkDirection::Backward), &[handle]);
        assert!(target.links(LinkDirection::Forward).is_empty());

        assert_eq!(source.link_by_id(b.anchor_id(), MULTI, LinkDirection::Forward), Some(handle));
        assert_eq!(target.link_by_id(a.anchor_id(), MULTI, LinkDirection::Backward), Some(handle));
    }

    #[test]
    fn test_get_or_create_returns_existing() {
        let mut system = system();
        let (a, b) = (proto(1), proto(2));

        let first = system.get_or_create_link(&a, &b, MULTI).unwrap();
        let second = system.get_or_create_link(&a, &b, MULTI).unwrap();

        assert_eq!(first, second);
        assert_eq!(system.link_count(), 1);
        assert_eq!(system.link_anchor(&a).unwrap().revision(), 1);
    }

    #[test]
    fn test_single_forward_replaces_previous_target() {
        let mut system = system();
        let (parent, child1, child2) = (proto(1), proto(2), proto(3));

        system.get_or_create_link(&parent, &child1, CHILD).unwrap();
        system.get_or_create_link(&parent, &child2, CHILD).unwrap();

        // Flags as configured: one forward link per source
        let forward = system.get_link_connection_map(&parent, CHILD, LinkDirection::Forward);
        assert_eq!(forward.keys().copied().collect::<Vec<_>>(), vec![child2.anchor_id()]);

        assert!(!system.destroy_link(&parent, &child1, CHILD));
        assert_eq!(system.link_count(), 1);
        assert!(system.get_link(&parent, &child2, CHILD).is_some());
    }

    #[test]
    fn test_multi_backward_collects_children() {
        let mut system = system();
        let (parent, child1, child2) = (proto(1), proto(2), proto(3));

        system.get_or_create_link(&child1, &parent, CHILD).unwrap();
        system.get_or_create_link(&child2, &parent, CHILD).unwrap();

        let children = system.get_link_connection_map(&parent, CHILD, LinkDirection::Backward);
        assert_eq!(children.len(), 2);

        assert!(system.destroy_link(&child1, &parent, CHILD));
        let children = system.get_link_connection_map(&parent, CHILD, LinkDirection::Backward);
        assert_eq!(children.keys().copied().collect::<Vec<_>>(), vec![child2.anchor_id()]);
    }

    #[test]
    fn test_single_backward_replaces_previous_source() {
        let mut system = system();
        let (a, b, target) = (proto(1), proto(2), proto(3));

        system.get_or_create_link(&a, &target, SINGLE).unwrap();
        system.get_or_create_link(&b, &target, SINGLE).unwrap();

        assert!(system.get_link(&a, &target, SINGLE).is_none());
        assert!(system.get_link(&b, &target, SINGLE).is_some());
        assert!(!system.link_anchor(&a).unwrap().has_links());
    }

    #[test]
    fn test_unknown_link_type() {
        let mut system = system();
        let err = system
            .get_or_create_link(&proto(1), &proto(2), LinkTypeId::new(999))
            .unwrap_err();
        assert!(matches!(err, LinkError::UnknownLinkType(_)));
        assert_eq!(system.anchor_count(), 0);
    }

    #[test]
    fn test_identity_adapter_needs_existing_anchor() {
        let mut system = system();
        let missing = AnchorId::new(5, 5);
        let err = system.get_or_create_link(&proto(1), &missing, MULTI).unwrap_err();
        assert!(matches!(err, LinkError::AnchorNotConstructible(id) if id == missing));
        // The constructible side is not left behind
        assert_eq!(system.anchor_count(), 0);

        let existing = proto(2).anchor_id();
        system.get_or_create_link_anchor(&proto(2)).unwrap();
        assert!(system.get_or_create_link(&proto(1), &existing, MULTI).is_ok());
    }

    #[test]
    fn test_destroy_anchor_requires_no_links() {
        let mut system = system();
        let (a, b) = (proto(1), proto(2));
        system.get_or_create_link(&a, &b, MULTI).unwrap();

        let err = system.destroy_link_anchor(&a).unwrap_err();
        assert!(matches!(err, LinkError::AnchorNotEmpty { links: 1, .. }));

        assert!(system.destroy_link(&a, &b, MULTI));
        assert!(system.destroy_link_anchor(&a).unwrap());
        assert!(!system.destroy_link_anchor(&a).unwrap());
        assert!(system.link_anchor(&a).is_none());
    }

    #[test]
    fn test_destroy_anchor_refused_while_proxy_registered() {
        let mut system = system();
        let (a, b) = (proto(1), proto(2));
        let mut proxy = LinkProxy::new();
        proxy.register_at(&mut system, &a, MULTI, LinkDirection::Forward).unwrap();
        proxy.connect_to(&mut system, &b).unwrap();

        let err = system.destroy_link_anchor_cascading(&a).unwrap_err();
        assert!(matches!(err, LinkError::AnchorHasProxies { proxies: 1, .. }));
        assert_eq!(system.link_count(), 1);
        assert_eq!(proxy.remote_anchor_id(&system), Some(b.anchor_id()));

        assert!(proxy.unregister(&mut system));
        assert!(system.destroy_link_anchor_cascading(&a).unwrap());
        assert_eq!(system.link_count(), 0);

        // Dropped proxies do not hold an anchor
        let mut dropped = LinkProxy::new();
        dropped.register_at(&mut system, &b, MULTI, LinkDirection::Backward).unwrap();
        drop(dropped);
        assert!(system.destroy_link_anchor(&b).unwrap());
        assert_eq!(system.anchor_count(), 0);
    }

    #[test]
    fn test_cascading_destroy() {
        let mut system = system();
        let (hub, a, b) = (proto(1), proto(2), proto(3));
        system.get_or_create_link(&hub, &a, MULTI).unwrap();
        system.get_or_create_link(&b, &hub, MULTI).unwrap();

        assert!(system.destroy_link_anchor_cascading(&hub).unwrap());
        assert_eq!(system.link_count(), 0);
        assert!(!system.link_anchor(&a).unwrap().has_links());
        assert!(!system.link_anchor(&b).unwrap().has_links());
    }

    #[test]
    fn test_empty_containers_are_evicted() {
        let mut system = system();
        let (a, b) = (proto(1), proto(2));
        system.get_or_create_link(&a, &b, MULTI).unwrap();
        system.destroy_link(&a, &b, MULTI);

        let anchor = system.link_anchor(&a).unwrap();
        assert!(anchor.link_container_by_id(MULTI, LinkDirection::Forward).is_none());
        assert!(std::ptr::eq(
            system.get_link_connection_map(&a, MULTI, LinkDirection::Forward),
            LinkSystem::empty_connection_map()
        ));
    }

    #[test]
    fn test_prevent_container_removal() {
        let mut system = system();
        let (a, b) = (proto(1), proto(2));
        system.prevent_container_removal(&a, MULTI, LinkDirection::Forward).unwrap();
        system.get_or_create_link(&a, &b, MULTI).unwrap();
        system.destroy_link(&a, &b, MULTI);

        let anchor = system.link_anchor(&a).unwrap();
        assert!(anchor.link_container_by_id(MULTI, LinkDirection::Forward).is_some());

        assert!(system.allow_container_removal(&a, MULTI, LinkDirection::Forward));
        let anchor = system.link_anchor(&a).unwrap();
        assert!(anchor.link_container_by_id(MULTI, LinkDirection::Forward).is_none());
    }

    struct CountingAnchorHooks(Arc<AtomicUsize>);

    impl AnchorHooks for CountingAnchorHooks {
        fn on_structural_change(&mut self, _anchor_id: AnchorId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountedObject {
        id: AnchorId,
        changes: Arc<AtomicUsize>,
    }

    impl LinkAnchorAdapter for CountedObject {
        fn anchor_id(&self) -> AnchorId {
            self.id
        }

        fn construct_link_anchor(&self) -> LinkResult<LinkAnchor> {
            Ok(LinkAnchor::with_hooks(
                self.id,
                Box::new(CountingAnchorHooks(Arc::clone(&self.changes))),
            ))
        }
    }

    #[test]
    fn test_structural_change_once_per_mutation() {
        let mut system = system();
        let changes = Arc::new(AtomicUsize::new(0));
        let source = CountedObject {
            id: AnchorId::new(9, 1),
            changes: Arc::clone(&changes),
        };
        let (b, c) = (proto(2), proto(3));

        system.get_or_create_link(&source, &b, SINGLE).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        // Replacing counts as a removal plus an insertion
        system.get_or_create_link(&source, &c, SINGLE).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 3);

        system.destroy_link(&source, &c, SINGLE);
        assert_eq!(changes.load(Ordering::SeqCst), 4);
        assert_eq!(system.link_anchor(&b).unwrap().revision(), 2);
    }

    #[test]
    fn test_self_link_changes_anchor_once() {
        let mut system = system();
        let a = proto(1);
        system.get_or_create_link(&a, &a, MULTI).unwrap();

        let anchor = system.link_anchor(&a).unwrap();
        assert_eq!(anchor.revision(), 1);
        assert_eq!(anchor.link_count(), 2);
        assert_eq!(system.destroy_all_links(&a), 1);
    }

    struct DisconnectProbe {
        calls: Arc<AtomicUsize>,
    }

    impl LinkHooks for DisconnectProbe {
        fn on_disconnect(&mut self, _link: &LinkInfo) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_link_hooks_from_type_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);
        let hooked = LinkTypeId::new(50);

        let mut system = system();
        system
            .link_types_mut()
            .register_link_type_with_hooks(
                hooked,
                None,
                "Hooked",
                LinkTypeFlags::MULTIPLE_FORWARD,
                Arc::new(move || {
                    Box::new(DisconnectProbe {
                        calls: Arc::clone(&factory_calls),
                    }) as Box<dyn LinkHooks>
                }),
            )
            .unwrap();

        let (a, b, c) = (proto(1), proto(2), proto(3));
        system.get_or_create_link(&a, &b, hooked).unwrap();
        system.get_or_create_link(&a, &c, hooked).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        system.destroy_all_links(&a);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_collect_links_derived_from() {
        let base = LinkTypeId::new(60);
        let derived = LinkTypeId::new(61);
        let mut system = system();
        system.link_types_mut().register_link_type(base, None, "Base", true, true).unwrap();
        system
            .link_types_mut()
            .register_link_type(derived, Some(base), "Derived", true, true)
            .unwrap();

        let (a, b, c) = (proto(1), proto(2), proto(3));
        system.get_or_create_link(&a, &b, base).unwrap();
        let derived_link = system.get_or_create_link(&a, &c, derived).unwrap();
        system.get_or_create_link(&a, &c, MULTI).unwrap();

        let mut out = Vec::new();
        system.collect_links_derived_from(&a, base, LinkDirection::Forward, &mut out);
        assert_eq!(out.len(), 2);

        out.clear();
        system.collect_links_derived_from(&a, derived, LinkDirection::Forward, &mut out);
        assert_eq!(out, vec![derived_link]);

        out.clear();
        system.collect_links(&a, LinkDirection::Forward, None, &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_shared_system() {
        let shared = system().into_shared();
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                shared
                    .lock()
                    .get_or_create_link(&proto(1), &proto(2), MULTI)
                    .is_ok()
            })
        };
        assert!(worker.join().unwrap());
        assert_eq!(shared.lock().link_count(), 1);
    }
}
