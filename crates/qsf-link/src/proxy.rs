//! Link proxies
//!
//! A proxy is what components embed to take part in one side of a link
//! relationship: it registers at an anchor under a link type and direction,
//! connects and disconnects remote objects through the link system, and
//! gets told about every link added to or removed from its container.
//!
//! Containers only hold weak references to proxies. Dropping a proxy ends
//! its registration immediately: it stops receiving callbacks and no longer
//! keeps its container alive. The stale entry itself is swept by
//! [`LinkSystem::purge_dead_proxies`] or the next [`LinkProxy::unregister`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::{LinkAnchorAdapter, ResolveAnchor};
use crate::anchor::LinkAnchor;
use crate::anchor_id::{AnchorId, LinkDirection};
use crate::container::LinkConnectionMap;
use crate::error::{LinkError, LinkResult};
use crate::link::LinkHandle;
use crate::link_type::LinkTypeId;
use crate::system::LinkSystem;

/// A link was added to or removed from a proxy's container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    /// The link; already freed when delivered to `on_link_removed`
    pub link: LinkHandle,
    pub link_type_id: LinkTypeId,
    /// Direction of the container the proxy is registered at
    pub direction: LinkDirection,
    /// Anchor the proxy is registered at
    pub anchor: AnchorId,
    /// Anchor at the other end of the link
    pub remote: AnchorId,
}

/// Receives link notifications for a proxy
pub trait LinkProxyListener: Send {
    fn on_link_added(&mut self, _event: &LinkEvent) {}
    fn on_link_removed(&mut self, _event: &LinkEvent) {}
}

struct NoListener;

impl LinkProxyListener for NoListener {}

/// Shared part of a proxy that containers point at
pub(crate) struct ProxyCell {
    listener: Mutex<Box<dyn LinkProxyListener>>,
}

impl ProxyCell {
    pub(crate) fn new(listener: Box<dyn LinkProxyListener>) -> Self {
        Self {
            listener: Mutex::new(listener),
        }
    }

    #[cfg(test)]
    pub(crate) fn noop() -> Self {
        Self::new(Box::new(NoListener))
    }

    pub(crate) fn link_added(&self, event: &LinkEvent) {
        self.listener.lock().on_link_added(event);
    }

    pub(crate) fn link_removed(&self, event: &LinkEvent) {
        self.listener.lock().on_link_removed(event);
    }
}

/// Where a proxy is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyRegistration {
    pub anchor_id: AnchorId,
    pub link_type_id: LinkTypeId,
    pub direction: LinkDirection,
}

/// Client-side handle on one (anchor, link type, direction) container
pub struct LinkProxy {
    cell: Arc<ProxyCell>,
    registration: Option<ProxyRegistration>,
}

impl LinkProxy {
    /// Create an unregistered proxy without callbacks
    pub fn new() -> Self {
        Self::with_listener(NoListener)
    }

    /// Create an unregistered proxy that reports to `listener`
    pub fn with_listener(listener: impl LinkProxyListener + 'static) -> Self {
        Self {
            cell: Arc::new(ProxyCell::new(Box::new(listener))),
            registration: None,
        }
    }

    /// Current registration, if any
    pub fn registration(&self) -> Option<ProxyRegistration> {
        self.registration
    }

    /// Check if the proxy is registered
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Anchor the proxy is registered at
    pub fn anchor_id(&self) -> Option<AnchorId> {
        self.registration.map(|registration| registration.anchor_id)
    }

    /// Register at `object`'s anchor, creating anchor and container as needed.
    ///
    /// An existing registration is released first.
    pub fn register_at<A: LinkAnchorAdapter>(
        &mut self,
        system: &mut LinkSystem,
        object: &A,
        link_type_id: LinkTypeId,
        direction: LinkDirection,
    ) -> LinkResult<()> {
        if !system.link_types().contains(link_type_id) {
            return Err(LinkError::UnknownLinkType(link_type_id));
        }
        let anchor_id = system.ensure_link_anchor(object)?;
        self.unregister(system);

        system.register_proxy(anchor_id, link_type_id, direction, &self.cell)?;
        self.registration = Some(ProxyRegistration {
            anchor_id,
            link_type_id,
            direction,
        });
        Ok(())
    }

    /// Release the registration; false if there was none
    pub fn unregister(&mut self, system: &mut LinkSystem) -> bool {
        match self.registration.take() {
            Some(registration) => {
                system.unregister_proxy(registration, &self.cell);
                true
            }
            None => false,
        }
    }

    fn require_registration(&self) -> LinkResult<ProxyRegistration> {
        self.registration.ok_or(LinkError::ProxyNotRegistered)
    }

    /// Link the registered anchor with `object` under the proxy's type.
    ///
    /// Forward proxies become the link source, backward proxies the target.
    /// Where the type allows a single connection only, the previous link is
    /// replaced.
    pub fn connect_to<B: LinkAnchorAdapter>(
        &self,
        system: &mut LinkSystem,
        object: &B,
    ) -> LinkResult<LinkHandle> {
        let registration = self.require_registration()?;
        let remote = system.ensure_link_anchor(object)?;
        let (source, target) = match registration.direction {
            LinkDirection::Forward => (registration.anchor_id, remote),
            LinkDirection::Backward => (remote, registration.anchor_id),
        };
        system.internal_create_link(source, target, registration.link_type_id)
    }

    /// Remove the link to `object`; false if there was none
    pub fn disconnect_from<B: LinkAnchorAdapter>(&self, system: &mut LinkSystem, object: &B) -> bool {
        let Some(registration) = self.registration else {
            return false;
        };
        let handle = system
            .link_anchor_by_id(registration.anchor_id)
            .and_then(|anchor| {
                anchor.link_by_id(
                    object.anchor_id(),
                    registration.link_type_id,
                    registration.direction,
                )
            });
        handle.is_some_and(|handle| system.internal_destroy_link(handle))
    }

    /// Remove every link in the proxy's container; returns how many
    pub fn disconnect_all(&self, system: &mut LinkSystem) -> usize {
        let handles: Vec<LinkHandle> = self.connection_map(system).values().copied().collect();
        handles
            .into_iter()
            .filter(|handle| system.internal_destroy_link(*handle))
            .count()
    }

    /// Connections of the proxy's container; the shared empty map if there are none
    pub fn connection_map<'s>(&self, system: &'s LinkSystem) -> &'s LinkConnectionMap {
        match self.registration {
            Some(registration) => system.connection_map_by_id(
                registration.anchor_id,
                registration.link_type_id,
                registration.direction,
            ),
            None => LinkSystem::empty_connection_map(),
        }
    }

    /// Id of the anchor at the other end of the first connection
    pub fn remote_anchor_id(&self, system: &LinkSystem) -> Option<AnchorId> {
        self.connection_map(system).keys().next().copied()
    }

    /// Ids of all connected remote anchors
    pub fn remote_anchor_ids(&self, system: &LinkSystem) -> Vec<AnchorId> {
        self.connection_map(system).keys().copied().collect()
    }

    /// Anchor at the other end of the first connection
    pub fn remote_anchor<'s>(&self, system: &'s LinkSystem) -> Option<&'s LinkAnchor> {
        self.remote_anchor_id(system)
            .and_then(|id| system.link_anchor_by_id(id))
    }

    /// Object at the other end of the first connection
    pub fn remote<T: ResolveAnchor>(&self, system: &LinkSystem) -> Option<T> {
        self.remote_anchor_id(system).and_then(T::resolve_anchor)
    }
}

impl Default for LinkProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LinkProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkProxy")
            .field("registration", &self.registration)
            .finish()
    }
}
