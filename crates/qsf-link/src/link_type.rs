//! Link types
//!
//! A link type is registered once at startup and never changes afterwards.
//! Types may derive from a previously registered base; the chain of ids
//! from the root base down to the type itself is kept on every type so
//! that "is this link a kind of X" queries are a slice scan.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::anchor_id::LinkDirection;
use crate::error::{LinkError, LinkResult};
use crate::link::LinkHooks;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Numeric link type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkTypeId(pub u32);

impl LinkTypeId {
    /// Create a link type id from a raw value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Derive an id from a link type name.
    ///
    /// 32-bit FNV-1a over the UTF-8 bytes, so ids persist across builds.
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Get the raw id value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LinkTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

bitflags! {
    /// Which ends of a link type accept more than one connection
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinkTypeFlags: u8 {
        const MULTIPLE_FORWARD = 0b01;
        const MULTIPLE_BACKWARD = 0b10;
    }
}

impl LinkTypeFlags {
    /// Build flags from per-direction booleans
    pub fn from_multiplicity(multiple_forward: bool, multiple_backward: bool) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::MULTIPLE_FORWARD, multiple_forward);
        flags.set(Self::MULTIPLE_BACKWARD, multiple_backward);
        flags
    }

    /// The multiplicity flag for one direction
    pub fn multiple(direction: LinkDirection) -> Self {
        match direction {
            LinkDirection::Forward => Self::MULTIPLE_FORWARD,
            LinkDirection::Backward => Self::MULTIPLE_BACKWARD,
        }
    }
}

/// Produces the per-link hooks for links of one type
pub type LinkHooksFactory = Arc<dyn Fn() -> Box<dyn LinkHooks> + Send + Sync>;

/// Immutable link type descriptor
pub struct LinkType {
    id: LinkTypeId,
    base_type_id: Option<LinkTypeId>,
    class_name: String,
    flags: LinkTypeFlags,
    inherited_type_ids: SmallVec<[LinkTypeId; 4]>,
    hooks_factory: Option<LinkHooksFactory>,
}

impl LinkType {
    /// Type id
    pub fn id(&self) -> LinkTypeId {
        self.id
    }

    /// Declared base type
    pub fn base_type_id(&self) -> Option<LinkTypeId> {
        self.base_type_id
    }

    /// Class identifier of the links this type creates
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Multiplicity flags
    pub fn flags(&self) -> LinkTypeFlags {
        self.flags
    }

    /// Whether an anchor may hold more than one link of this type in `direction`
    pub fn supports_multiple_connections(&self, direction: LinkDirection) -> bool {
        self.flags.contains(LinkTypeFlags::multiple(direction))
    }

    /// Chain from the root base type to this type, this type last
    pub fn inherited_type_ids(&self) -> &[LinkTypeId] {
        &self.inherited_type_ids
    }

    /// Whether this type is `type_id` or derives from it
    pub fn is_a(&self, type_id: LinkTypeId) -> bool {
        self.inherited_type_ids.contains(&type_id)
    }

    pub(crate) fn create_hooks(&self) -> Option<Box<dyn LinkHooks>> {
        self.hooks_factory.as_ref().map(|factory| factory())
    }
}

impl fmt::Debug for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkType")
            .field("id", &self.id)
            .field("base_type_id", &self.base_type_id)
            .field("class_name", &self.class_name)
            .field("flags", &self.flags)
            .field("inherited_type_ids", &self.inherited_type_ids)
            .field("has_hooks", &self.hooks_factory.is_some())
            .finish()
    }
}

/// One entry of a link type registry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTypeDefinition {
    /// Type name, hashed into the id
    pub name: String,
    /// Name of the base type; must appear earlier in the list
    #[serde(default)]
    pub base: Option<String>,
    /// Class identifier; defaults to the name
    #[serde(default)]
    pub class: Option<String>,
    /// Source anchors may link to several targets
    #[serde(default)]
    pub multiple_forward: bool,
    /// Target anchors may be linked from several sources
    #[serde(default)]
    pub multiple_backward: bool,
}

/// Link type registry file, entries in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTypeRegistryConfig {
    pub link_types: Vec<LinkTypeDefinition>,
}

impl LinkTypeRegistryConfig {
    /// Parse a registry from JSON
    pub fn from_json_str(json: &str) -> LinkResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Registry of all link types
#[derive(Debug, Default)]
pub struct LinkTypeManager {
    types: AHashMap<LinkTypeId, LinkType>,
}

impl LinkTypeManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link type.
    ///
    /// The base type, if any, must already be registered. Multiplicity is
    /// never inherited from the base.
    pub fn register_link_type(
        &mut self,
        type_id: LinkTypeId,
        base_type_id: Option<LinkTypeId>,
        class_name: impl Into<String>,
        multiple_forward: bool,
        multiple_backward: bool,
    ) -> LinkResult<&LinkType> {
        self.insert(
            type_id,
            base_type_id,
            class_name.into(),
            LinkTypeFlags::from_multiplicity(multiple_forward, multiple_backward),
            None,
        )
    }

    /// Register a link type whose links carry hooks built by `factory`
    pub fn register_link_type_with_hooks(
        &mut self,
        type_id: LinkTypeId,
        base_type_id: Option<LinkTypeId>,
        class_name: impl Into<String>,
        flags: LinkTypeFlags,
        factory: LinkHooksFactory,
    ) -> LinkResult<&LinkType> {
        self.insert(type_id, base_type_id, class_name.into(), flags, Some(factory))
    }

    fn insert(
        &mut self,
        type_id: LinkTypeId,
        base_type_id: Option<LinkTypeId>,
        class_name: String,
        flags: LinkTypeFlags,
        hooks_factory: Option<LinkHooksFactory>,
    ) -> LinkResult<&LinkType> {
        if self.types.contains_key(&type_id) {
            return Err(LinkError::DuplicateLinkType(type_id));
        }

        // The base must already exist, so chains can never loop back to the new type
        let mut inherited_type_ids = match base_type_id {
            Some(base) => self
                .types
                .get(&base)
                .map(|base_type| base_type.inherited_type_ids.clone())
                .ok_or(LinkError::UnknownBaseType {
                    link_type: type_id,
                    base,
                })?,
            None => SmallVec::new(),
        };
        inherited_type_ids.push(type_id);

        log::debug!(
            "Registered link type {} ({}) with chain {:?}",
            type_id,
            class_name,
            inherited_type_ids
        );

        let link_type = LinkType {
            id: type_id,
            base_type_id,
            class_name,
            flags,
            inherited_type_ids,
            hooks_factory,
        };
        Ok(&*self.types.entry(type_id).or_insert(link_type))
    }

    /// Register every entry of a registry file in order
    pub fn register_from_config(
        &mut self,
        config: &LinkTypeRegistryConfig,
    ) -> LinkResult<Vec<LinkTypeId>> {
        let mut registered = Vec::with_capacity(config.link_types.len());
        for definition in &config.link_types {
            let type_id = LinkTypeId::from_name(&definition.name);
            let base = definition.base.as_deref().map(LinkTypeId::from_name);
            let class = definition
                .class
                .clone()
                .unwrap_or_else(|| definition.name.clone());
            self.register_link_type(
                type_id,
                base,
                class,
                definition.multiple_forward,
                definition.multiple_backward,
            )?;
            registered.push(type_id);
        }
        Ok(registered)
    }

    /// Look up a link type
    pub fn get(&self, type_id: LinkTypeId) -> Option<&LinkType> {
        self.types.get(&type_id)
    }

    /// Check whether a type is registered
    pub fn contains(&self, type_id: LinkTypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate over all registered types
    pub fn iter(&self) -> impl Iterator<Item = &LinkType> {
        self.types.values()
    }
}
