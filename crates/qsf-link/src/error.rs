//! Link graph errors

use thiserror::Error;

use crate::anchor_id::AnchorId;
use crate::link_type::LinkTypeId;

/// Link graph errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link type not registered: {0}")]
    UnknownLinkType(LinkTypeId),

    #[error("Link type already registered: {0}")]
    DuplicateLinkType(LinkTypeId),

    #[error("Base type {base} of link type {link_type} is not registered")]
    UnknownBaseType {
        link_type: LinkTypeId,
        base: LinkTypeId,
    },

    #[error("Link anchor not found: {0}")]
    AnchorNotFound(AnchorId),

    #[error("Link anchor {0} can only be looked up, not constructed")]
    AnchorNotConstructible(AnchorId),

    #[error("Link anchor {anchor} still has {links} links")]
    AnchorNotEmpty { anchor: AnchorId, links: usize },

    #[error("Link anchor {anchor} still has {proxies} registered proxies")]
    AnchorHasProxies { anchor: AnchorId, proxies: usize },

    #[error("Link proxy is not registered at an anchor")]
    ProxyNotRegistered,

    #[error("Invalid link type configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

/// Result type for link graph operations
pub type LinkResult<T> = Result<T, LinkError>;
