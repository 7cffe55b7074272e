//! Link anchors
//!
//! An anchor is the graph node of some external object. It keeps a flat
//! list of its links per direction for cheap "all links" iteration and one
//! container per link type per direction for keyed lookups.

use ahash::AHashMap;
use smallvec::SmallVec;

use qsf_core::Pool;

use crate::anchor_id::{AnchorId, LinkDirection};
use crate::container::LinkContainer;
use crate::link::{Link, LinkHandle};
use crate::link_type::{LinkTypeId, LinkTypeManager};

/// Behaviour attached to an anchor by whoever constructed it
pub trait AnchorHooks: Send {
    /// Called once per structural mutation touching the anchor
    fn on_structural_change(&mut self, _anchor_id: AnchorId) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnchorHooks;

impl AnchorHooks for NoAnchorHooks {}

/// A node in the link graph
pub struct LinkAnchor {
    id: AnchorId,
    links: [SmallVec<[LinkHandle; 4]>; 2],
    containers: [AHashMap<LinkTypeId, LinkContainer>; 2],
    hooks: Box<dyn AnchorHooks>,
    revision: u64,
}

impl LinkAnchor {
    /// Create an anchor without hooks
    pub fn new(id: AnchorId) -> Self {
        Self::with_hooks(id, Box::new(NoAnchorHooks))
    }

    /// Create an anchor with custom hooks
    pub fn with_hooks(id: AnchorId, hooks: Box<dyn AnchorHooks>) -> Self {
        Self {
            id,
            links: [SmallVec::new(), SmallVec::new()],
            containers: [AHashMap::new(), AHashMap::new()],
            hooks,
            revision: 0,
        }
    }

    /// Anchor id
    pub fn id(&self) -> AnchorId {
        self.id
    }

    /// Number of structural changes seen so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Existing container for a link type and direction
    pub fn link_container_by_id(
        &self,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> Option<&LinkContainer> {
        self.containers[direction.index()].get(&link_type_id)
    }

    /// All containers of one direction
    pub fn link_containers(&self, direction: LinkDirection) -> impl Iterator<Item = &LinkContainer> {
        self.containers[direction.index()].values()
    }

    /// Link to `remote` of a type in a direction
    pub fn link_by_id(
        &self,
        remote: AnchorId,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> Option<LinkHandle> {
        self.link_container_by_id(link_type_id, direction)?
            .get(remote)
    }

    /// All links of one direction
    pub fn links(&self, direction: LinkDirection) -> &[LinkHandle] {
        &self.links[direction.index()]
    }

    /// Append forward then backward links
    pub fn collect_all_links(&self, out: &mut Vec<LinkHandle>) {
        out.extend_from_slice(&self.links[0]);
        out.extend_from_slice(&self.links[1]);
    }

    /// Append the links of one direction whose type is or derives from `base`
    pub fn collect_links_derived_from(
        &self,
        pool: &Pool<Link>,
        types: &LinkTypeManager,
        base: LinkTypeId,
        direction: LinkDirection,
        out: &mut Vec<LinkHandle>,
    ) {
        for container in self.link_containers(direction) {
            let derived = types
                .get(container.link_type_id())
                .is_some_and(|link_type| link_type.is_a(base));
            if derived {
                container.collect_links(pool, out, None);
            }
        }
    }

    /// Total number of links in both directions
    pub fn link_count(&self) -> usize {
        self.links[0].len() + self.links[1].len()
    }

    /// Check if any link touches this anchor
    pub fn has_links(&self) -> bool {
        self.link_count() > 0
    }

    /// Live proxies registered in any of this anchor's containers
    pub fn proxy_count(&self) -> usize {
        self.containers
            .iter()
            .flat_map(|containers| containers.values())
            .map(LinkContainer::proxy_count)
            .sum()
    }

    pub(crate) fn insert_link(&mut self, direction: LinkDirection, handle: LinkHandle) {
        self.links[direction.index()].push(handle);
    }

    pub(crate) fn remove_link(&mut self, direction: LinkDirection, handle: LinkHandle) -> bool {
        let links = &mut self.links[direction.index()];
        match links.iter().position(|known| *known == handle) {
            Some(position) => {
                links.swap_remove(position);
                true
            }
            None => false,
        }
    }

    /// Container for a type and direction, created on demand if `create` is set
    pub(crate) fn internal_link_container(
        &mut self,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
        create: bool,
    ) -> Option<&mut LinkContainer> {
        let containers = &mut self.containers[direction.index()];
        if create {
            Some(
                containers
                    .entry(link_type_id)
                    .or_insert_with(|| LinkContainer::new(link_type_id, direction)),
            )
        } else {
            containers.get_mut(&link_type_id)
        }
    }

    /// Drop a container once nothing keeps it alive; true if it was evicted
    pub(crate) fn evict_container_if_removable(
        &mut self,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> bool {
        let containers = &mut self.containers[direction.index()];
        if containers
            .get(&link_type_id)
            .is_some_and(LinkContainer::can_be_removed)
        {
            containers.remove(&link_type_id);
            true
        } else {
            false
        }
    }

    pub(crate) fn containers_mut(
        &mut self,
        direction: LinkDirection,
    ) -> &mut AHashMap<LinkTypeId, LinkContainer> {
        &mut self.containers[direction.index()]
    }

    pub(crate) fn on_structural_change(&mut self) {
        self.revision += 1;
        self.hooks.on_structural_change(self.id);
    }
}

impl std::fmt::Debug for LinkAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkAnchor")
            .field("id", &self.id)
            .field("forward_links", &self.links[0].len())
            .field("backward_links", &self.links[1].len())
            .field("revision", &self.revision)
            .finish()
    }
}
