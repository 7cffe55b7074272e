//! Anchor adapters
//!
//! Anything that should take part in the link graph implements
//! [`LinkAnchorAdapter`]. Objects without an implementation cannot be passed
//! to the link system at all.

use qsf_core::{Entity, Prototype};

use crate::anchor::{AnchorHooks, LinkAnchor};
use crate::anchor_id::AnchorId;
use crate::error::{LinkError, LinkResult};

/// Maps an object to its node in the link graph
pub trait LinkAnchorAdapter {
    /// Canonical id of the object's anchor
    fn anchor_id(&self) -> AnchorId;

    /// Build a fresh anchor for the object.
    ///
    /// Only called when no anchor exists yet for [`anchor_id`](Self::anchor_id).
    fn construct_link_anchor(&self) -> LinkResult<LinkAnchor>;
}

/// Turns an anchor id back into the object it stands for
pub trait ResolveAnchor: Sized {
    /// `None` if the id does not name an object of this kind
    fn resolve_anchor(id: AnchorId) -> Option<Self>;
}

/// Identity adapter: refers to an anchor that already exists
impl LinkAnchorAdapter for AnchorId {
    fn anchor_id(&self) -> AnchorId {
        *self
    }

    fn construct_link_anchor(&self) -> LinkResult<LinkAnchor> {
        Err(LinkError::AnchorNotConstructible(*self))
    }
}

impl ResolveAnchor for AnchorId {
    fn resolve_anchor(id: AnchorId) -> Option<Self> {
        Some(id)
    }
}

impl LinkAnchorAdapter for Prototype {
    fn anchor_id(&self) -> AnchorId {
        AnchorId::new(self.map_id, self.entity.to_bits())
    }

    fn construct_link_anchor(&self) -> LinkResult<LinkAnchor> {
        Ok(LinkAnchor::with_hooks(
            self.anchor_id(),
            Box::new(PrototypeAnchorHooks::new(*self)),
        ))
    }
}

impl ResolveAnchor for Prototype {
    fn resolve_anchor(id: AnchorId) -> Option<Self> {
        let entity = Entity::from_bits(id.local_id);
        (id.is_initialized() && !entity.is_null()).then(|| Prototype::new(id.context_id, entity))
    }
}

/// Hooks of anchors that belong to entities.
///
/// Structural changes ask for the entity's link debug drawing to be rebuilt.
#[derive(Debug, Clone, Copy)]
pub struct PrototypeAnchorHooks {
    prototype: Prototype,
}

impl PrototypeAnchorHooks {
    /// Create hooks for a prototype
    pub fn new(prototype: Prototype) -> Self {
        Self { prototype }
    }

    /// Owning prototype
    pub fn prototype(&self) -> Prototype {
        self.prototype
    }
}

impl AnchorHooks for PrototypeAnchorHooks {
    fn on_structural_change(&mut self, anchor_id: AnchorId) {
        log::trace!(
            target: "qsf_link::debug_draw",
            "Refreshing link debug drawing of entity {:?} on map {} (anchor {})",
            self.prototype.entity,
            self.prototype.map_id,
            anchor_id
        );
    }
}
