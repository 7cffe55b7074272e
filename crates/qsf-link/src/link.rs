//! Links: directed, typed edges between two anchors

use std::fmt;

use qsf_core::PoolHandle;

use crate::anchor_id::{AnchorId, LinkDirection};
use crate::link_type::LinkTypeId;

/// Handle to a link owned by the [`LinkSystem`](crate::LinkSystem)
pub type LinkHandle = PoolHandle<Link>;

/// Plain description of a link, handed to hooks and listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkInfo {
    pub link_type_id: LinkTypeId,
    pub source: AnchorId,
    pub target: AnchorId,
}

/// Per-link behaviour chosen by the link type.
pub trait LinkHooks: Send {
    /// Called once, right before the link leaves both containers.
    ///
    /// Both anchors in `link` are still alive at this point.
    fn on_disconnect(&mut self, _link: &LinkInfo) {}
}

/// A directed, typed edge.
///
/// Type and endpoints are fixed at construction.
pub struct Link {
    info: LinkInfo,
    hooks: Option<Box<dyn LinkHooks>>,
}

impl Link {
    pub(crate) fn new(
        link_type_id: LinkTypeId,
        source: AnchorId,
        target: AnchorId,
        hooks: Option<Box<dyn LinkHooks>>,
    ) -> Self {
        Self {
            info: LinkInfo {
                link_type_id,
                source,
                target,
            },
            hooks,
        }
    }

    /// Link type
    pub fn link_type_id(&self) -> LinkTypeId {
        self.info.link_type_id
    }

    /// Source anchor
    pub fn source_anchor_id(&self) -> AnchorId {
        self.info.source
    }

    /// Target anchor
    pub fn target_anchor_id(&self) -> AnchorId {
        self.info.target
    }

    /// The anchor at the `direction` end: source for forward, target for backward
    pub fn anchor_id(&self, direction: LinkDirection) -> AnchorId {
        match direction {
            LinkDirection::Forward => self.info.source,
            LinkDirection::Backward => self.info.target,
        }
    }

    /// The anchor opposite to [`Link::anchor_id`]
    pub fn remote_anchor_id(&self, direction: LinkDirection) -> AnchorId {
        self.anchor_id(direction.opposite())
    }

    /// Plain copy of type and endpoints
    pub fn info(&self) -> LinkInfo {
        self.info
    }

    pub(crate) fn disconnect(&mut self) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.on_disconnect(&self.info);
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("link_type_id", &self.info.link_type_id)
            .field("source", &self.info.source)
            .field("target", &self.info.target)
            .finish()
    }
}
