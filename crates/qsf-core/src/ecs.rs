//! Entity Component System (ECS)
//!
//! Entity world scoped to a single map. Features:
//! - Stable entity IDs with generation counters
//! - 64-bit packed identities for cross-system references
//! - Per-type component storage with get-by-type lookup
//! - Map scoping via [`Prototype`], the (map, entity) pair other systems anchor on

use std::any::{Any, TypeId};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Marker trait for components
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Entity identifier with generation counter for stable IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    /// Entity index
    index: u32,
    /// Generation counter to detect stale references
    generation: u32,
}

impl Entity {
    /// Create a new entity with the given index and generation
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the entity index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the entity generation
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Create a null entity (invalid reference)
    pub fn null() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }

    /// Check if this is a null entity
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }

    /// Pack into a stable 64-bit identity (generation in the high word)
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpack an identity produced by [`Entity::to_bits`]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::null()
    }
}

/// Identifier of the map (simulation world) an entity lives in
pub type MapId = u32;

/// An entity together with the map it belongs to.
///
/// This is the identity other engine systems use when they need to refer to
/// an entity from outside its world, e.g. as a node of the link graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prototype {
    /// Owning map
    pub map_id: MapId,
    /// Entity inside the map
    pub entity: Entity,
}

impl Prototype {
    /// Create a new prototype reference
    pub fn new(map_id: MapId, entity: Entity) -> Self {
        Self { map_id, entity }
    }
}

/// Internal entity metadata
#[derive(Debug)]
struct EntityMeta {
    generation: u32,
    alive: bool,
}

/// Component storage trait
trait ComponentStorage: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn remove(&mut self, entity: Entity) -> bool;
    fn len(&self) -> usize;
}

/// Typed component storage keyed by entity
struct TypedStorage<T: Component> {
    data: AHashMap<Entity, T>,
}

impl<T: Component> TypedStorage<T> {
    fn new() -> Self {
        Self {
            data: AHashMap::new(),
        }
    }
}

impl<T: Component> ComponentStorage for TypedStorage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn remove(&mut self, entity: Entity) -> bool {
        self.data.remove(&entity).is_some()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// The ECS world containing all entities and components of one map
pub struct World {
    /// Map this world simulates
    map_id: MapId,
    /// Entity metadata indexed by entity index
    entities: Vec<EntityMeta>,
    /// Free entity indices for recycling
    free_indices: Vec<u32>,
    /// Component storages indexed by TypeId
    storages: AHashMap<TypeId, Box<dyn ComponentStorage>>,
}

impl World {
    /// Create a new empty world for map 0
    pub fn new() -> Self {
        Self::with_map_id(0)
    }

    /// Create a new empty world for the given map
    pub fn with_map_id(map_id: MapId) -> Self {
        Self {
            map_id,
            entities: Vec::new(),
            free_indices: Vec::new(),
            storages: AHashMap::new(),
        }
    }

    /// Get the map this world belongs to
    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    /// Spawn a new entity
    pub fn spawn(&mut self) -> Entity {
        if let Some(index) = self.free_indices.pop() {
            let meta = &mut self.entities[index as usize];
            meta.generation += 1;
            meta.alive = true;
            return Entity::new(index, meta.generation);
        }

        let index = self.entities.len() as u32;
        self.entities.push(EntityMeta {
            generation: 0,
            alive: true,
        });
        Entity::new(index, 0)
    }

    /// Despawn an entity and drop all of its components
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        self.entities[entity.index() as usize].alive = false;
        for storage in self.storages.values_mut() {
            storage.remove(entity);
        }

        self.free_indices.push(entity.index());
        true
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities
            .get(entity.index() as usize)
            .is_some_and(|meta| meta.alive && meta.generation == entity.generation())
    }

    /// Get the number of alive entities
    pub fn entity_count(&self) -> usize {
        self.entities.iter().filter(|m| m.alive).count()
    }

    /// Get the prototype reference of a live entity
    pub fn prototype(&self, entity: Entity) -> Option<Prototype> {
        self.is_alive(entity)
            .then(|| Prototype::new(self.map_id, entity))
    }

    /// Add a component to an entity, replacing any previous one of the same type
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(TypedStorage::<T>::new()));

        match storage.as_any_mut().downcast_mut::<TypedStorage<T>>() {
            Some(typed) => {
                typed.data.insert(entity, component);
                true
            }
            None => false,
        }
    }

    /// Remove a component from an entity
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<TypedStorage<T>>()?
            .data
            .remove(&entity)
    }

    /// Get a component from an entity
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }

        self.storages
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<TypedStorage<T>>()?
            .data
            .get(&entity)
    }

    /// Get a mutable component from an entity
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }

        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<TypedStorage<T>>()?
            .data
            .get_mut(&entity)
    }

    /// Check if an entity has a component
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.get_component::<T>(entity).is_some()
    }

    /// Number of entities carrying a component of type `T`
    pub fn component_count<T: Component>(&self) -> usize {
        self.storages
            .get(&TypeId::of::<T>())
            .map_or(0, |storage| storage.len())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
