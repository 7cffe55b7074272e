//! # QSF Link
//!
//! Typed, directed relationship graph between engine objects.
//!
//! - **Anchors**: One graph node per object, created through a [`LinkAnchorAdapter`]
//! - **Link types**: Registered types with single inheritance and per-direction multiplicity
//! - **Containers**: Per (anchor, type, direction) buckets keyed by the remote anchor
//! - **Proxies**: Component-side handles that connect objects and observe link changes
//! - **System**: The owner of all anchors and links, and the only place they are mutated

pub mod adapter;
pub mod anchor;
pub mod anchor_id;
pub mod container;
pub mod error;
pub mod link;
pub mod link_type;
pub mod proxy;
pub mod system;

pub use adapter::{LinkAnchorAdapter, PrototypeAnchorHooks, ResolveAnchor};
pub use anchor::{AnchorHooks, LinkAnchor, NoAnchorHooks};
pub use anchor_id::{AnchorId, LinkDirection};
pub use container::{LinkConnectionMap, LinkContainer};
pub use error::{LinkError, LinkResult};
pub use link::{Link, LinkHandle, LinkHooks, LinkInfo};
pub use link_type::{
    LinkHooksFactory, LinkType, LinkTypeDefinition, LinkTypeFlags, LinkTypeId, LinkTypeManager,
    LinkTypeRegistryConfig,
};
pub use proxy::{LinkEvent, LinkProxy, LinkProxyListener, ProxyRegistration};
pub use system::{LinkSystem, SharedLinkSystem};
