//! Entity/component registry.
//!
//! A small sparse-set style ECS suitable for a fixed-step simulation that is
//! mirrored over the network. It is not archetype-based: every component type
//! gets its own storage keyed by entity handle, and tags are just zero-sized
//! components living in the same storage map.
//!
//! Entity handles are plain integers so the server and every client can agree
//! on the numeric identity of an object (`Registry::insert`). There is no
//! generation counter; a handle is only meaningful while the entity is alive.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use serde::{Deserialize, Serialize};

/// Opaque entity handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u32);

impl Entity {
    /// Sentinel for "no entity".
    pub const NULL: Entity = Entity(u32::MAX);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({})", self.0)
        }
    }
}

/// Data attached to an entity.
pub trait Component: Any + Send {
    /// Teardown hook. Runs exactly once when the component leaves the
    /// registry: on `destroy`, `remove`, or when `emplace` replaces it.
    fn free(&mut self) {}
}

/// Registry misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// The entity is not (or no longer) alive.
    DeadEntity(Entity),
    /// `insert` was called with a handle that is already alive.
    DuplicateEntity(Entity),
    /// `insert` was called with `Entity::NULL`.
    NullEntity,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::DeadEntity(e) => write!(f, "{e} is not alive"),
            EcsError::DuplicateEntity(e) => write!(f, "{e} already exists"),
            EcsError::NullEntity => write!(f, "the null entity cannot hold components"),
        }
    }
}

impl std::error::Error for EcsError {}

trait ErasedStorage: Send {
    fn free_and_remove(&mut self, entity: Entity) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Sparse storage for one component type.
pub struct Storage<T> {
    components: HashMap<Entity, T>,
}

impl<T> Default for Storage<T> {
    fn default() -> Self {
        Self {
            components: HashMap::new(),
        }
    }
}

impl<T: Component> ErasedStorage for Storage<T> {
    fn free_and_remove(&mut self, entity: Entity) -> bool {
        match self.components.remove(&entity) {
            Some(mut component) => {
                component.free();
                true
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A set of components attached in one call (`create`/`insert`).
pub trait Bundle {
    fn insert_into(self, registry: &mut Registry, entity: Entity);
}

impl Bundle for () {
    fn insert_into(self, _registry: &mut Registry, _entity: Entity) {}
}

macro_rules! impl_bundle {
    ($($t:ident $v:ident),+) => {
        impl<$($t: Component),+> Bundle for ($($t,)+) {
            fn insert_into(self, registry: &mut Registry, entity: Entity) {
                let ($($v,)+) = self;
                $(registry.put(entity, $v);)+
            }
        }
    };
}

impl_bundle!(A a);
impl_bundle!(A a, B b);
impl_bundle!(A a, B b, C c);
impl_bundle!(A a, B b, C c, D d);
impl_bundle!(A a, B b, C c, D d, E e);
impl_bundle!(A a, B b, C c, D d, E e, F f);

/// Read-only grouped query: a tuple of component types that must all be present.
pub trait Query {
    type Item<'a>;

    fn fetch(registry: &Registry, entity: Entity) -> Option<Self::Item<'_>>;
}

/// Mutable grouped query. Component types in the tuple must be distinct.
pub trait QueryMut {
    type Storages;
    type Item<'a>
    where
        Self::Storages: 'a;

    fn take(registry: &mut Registry) -> Option<Self::Storages>;
    fn fetch<'a>(storages: &'a mut Self::Storages, entity: Entity) -> Option<Self::Item<'a>>;
    fn restore(registry: &mut Registry, storages: Self::Storages);
}

macro_rules! impl_query {
    ($($t:ident $v:ident),+) => {
        impl<$($t: Component),+> Query for ($($t,)+) {
            type Item<'a> = ($(&'a $t,)+);

            fn fetch(registry: &Registry, entity: Entity) -> Option<Self::Item<'_>> {
                Some(($(registry.storage::<$t>()?.components.get(&entity)?,)+))
            }
        }

        impl<$($t: Component),+> QueryMut for ($($t,)+) {
            type Storages = ($(Box<Storage<$t>>,)+);
            type Item<'a> = ($(&'a mut $t,)+)
            where
                Self::Storages: 'a;

            fn take(registry: &mut Registry) -> Option<Self::Storages> {
                $(let $v = registry.take_storage::<$t>();)+
                match ($($v,)+) {
                    ($(Some($v),)+) => Some(($($v,)+)),
                    ($($v,)+) => {
                        $(if let Some(s) = $v {
                            registry.restore_storage(s);
                        })+
                        None
                    }
                }
            }

            fn fetch<'a>(storages: &'a mut Self::Storages, entity: Entity) -> Option<Self::Item<'a>> {
                let ($($v,)+) = storages;
                Some(($($v.components.get_mut(&entity)?,)+))
            }

            fn restore(registry: &mut Registry, storages: Self::Storages) {
                let ($($v,)+) = storages;
                $(registry.restore_storage($v);)+
            }
        }
    };
}

impl_query!(A a);
impl_query!(A a, B b);
impl_query!(A a, B b, C c);
impl_query!(A a, B b, C c, D d);

/// Owns the alive entity set and one storage per component type.
#[derive(Default)]
pub struct Registry {
    next_id: u32,
    /// Alive entities in insertion order (reordered by `destroy`).
    alive: Vec<Entity>,
    slots: HashMap<Entity, usize>,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity with a fresh handle.
    pub fn create<B: Bundle>(&mut self, bundle: B) -> Entity {
        let id = self.fresh_id();
        self.attach(id);
        bundle.insert_into(self, id);
        id
    }

    /// Creates an entity with a caller-supplied handle.
    pub fn insert<B: Bundle>(&mut self, id: Entity, bundle: B) -> Result<Entity, EcsError> {
        if id.is_null() {
            return Err(EcsError::NullEntity);
        }
        if self.is_alive(id) {
            return Err(EcsError::DuplicateEntity(id));
        }
        self.attach(id);
        bundle.insert_into(self, id);
        Ok(id)
    }

    /// Removes every component of `entity` (running free hooks) and frees the handle.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        let slot = self
            .slots
            .remove(&entity)
            .ok_or(EcsError::DeadEntity(entity))?;
        for storage in self.storages.values_mut() {
            storage.free_and_remove(entity);
        }
        self.alive.swap_remove(slot);
        if let Some(&moved) = self.alive.get(slot) {
            self.slots.insert(moved, slot);
        }
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Alive entities in iteration order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive.iter().copied()
    }

    /// Gets a component reference. `Ok(None)` means the entity lacks `T`.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Option<&T>, EcsError> {
        self.ensure_alive(entity)?;
        Ok(self
            .storage::<T>()
            .and_then(|storage| storage.components.get(&entity)))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>, EcsError> {
        self.ensure_alive(entity)?;
        Ok(self
            .storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<Storage<T>>())
            .and_then(|storage| storage.components.get_mut(&entity)))
    }

    /// Returns false for dead entities instead of failing.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.is_alive(entity)
            && self
                .storage::<T>()
                .is_some_and(|storage| storage.components.contains_key(&entity))
    }

    /// Attaches or replaces a component. A replaced component is freed.
    pub fn emplace<T: Component>(&mut self, entity: Entity, component: T) -> Result<(), EcsError> {
        self.ensure_alive(entity)?;
        self.put(entity, component);
        Ok(())
    }

    /// Detaches and frees a component. Returns whether one was present.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<bool, EcsError> {
        self.ensure_alive(entity)?;
        Ok(self
            .storages
            .get_mut(&TypeId::of::<T>())
            .is_some_and(|storage| storage.free_and_remove(entity)))
    }

    /// Visits every entity holding all components in `Q`.
    pub fn for_each_with_all<Q: Query>(&self, mut f: impl FnMut(Entity, Q::Item<'_>)) {
        for &entity in &self.alive {
            if let Some(item) = Q::fetch(self, entity) {
                f(entity, item);
            }
        }
    }

    /// Mutable variant of `for_each_with_all`.
    ///
    /// The queried storages are detached for the duration of the walk, so the
    /// callback cannot reach back into the registry.
    pub fn for_each_with_all_mut<Q: QueryMut>(&mut self, mut f: impl FnMut(Entity, Q::Item<'_>)) {
        let Some(mut storages) = Q::take(self) else {
            return;
        };
        for &entity in &self.alive {
            if let Some(item) = Q::fetch(&mut storages, entity) {
                f(entity, item);
            }
        }
        Q::restore(self, storages);
    }

    /// Collects the entities holding all components in `Q`.
    pub fn view<Q: Query>(&self) -> Vec<Entity> {
        let mut out = Vec::new();
        self.for_each_with_all::<Q>(|entity, _| out.push(entity));
        out
    }

    fn ensure_alive(&self, entity: Entity) -> Result<(), EcsError> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::DeadEntity(entity))
        }
    }

    fn fresh_id(&mut self) -> Entity {
        loop {
            let id = Entity(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !id.is_null() && !self.is_alive(id) {
                return id;
            }
        }
    }

    fn attach(&mut self, id: Entity) {
        self.slots.insert(id, self.alive.len());
        self.alive.push(id);
    }

    fn put<T: Component>(&mut self, entity: Entity, component: T) {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Storage::<T>::default()));

        let storage = storage
            .as_any_mut()
            .downcast_mut::<Storage<T>>()
            .expect("storage type mismatch");

        if let Some(mut replaced) = storage.components.insert(entity, component) {
            replaced.free();
        }
    }

    fn storage<T: Component>(&self) -> Option<&Storage<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<Storage<T>>())
    }

    fn take_storage<T: Component>(&mut self) -> Option<Box<Storage<T>>> {
        self.storages
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.into_any().downcast::<Storage<T>>().ok())
    }

    fn restore_storage<T: Component>(&mut self, storage: Box<Storage<T>>) {
        self.storages.insert(TypeId::of::<T>(), storage);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(i32);
    impl Component for Health {}

    #[derive(Debug, PartialEq)]
    struct Name(&'static str);
    impl Component for Name {}

    struct Marked;
    impl Component for Marked {}

    struct Tracked(Arc<AtomicUsize>);
    impl Component for Tracked {
        fn free(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn create_and_get() {
        let mut reg = Registry::new();
        let e = reg.create((Health(10), Name("slime")));
        assert_eq!(reg.get::<Health>(e).unwrap(), Some(&Health(10)));
        assert_eq!(reg.get::<Name>(e).unwrap(), Some(&Name("slime")));
        assert_eq!(reg.get::<Marked>(e).unwrap().map(|_| ()), None);
        assert!(reg.has::<Health>(e));
        assert!(!reg.has::<Marked>(e));
    }

    #[test]
    fn destroy_frees_every_component_once() {
        let freed = Arc::new(AtomicUsize::new(0));
        let mut reg = Registry::new();
        let e = reg.create((Tracked(freed.clone()), Health(1)));
        let other = reg.create((Tracked(freed.clone()),));

        reg.destroy(e).unwrap();
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        assert!(!reg.has::<Health>(e));
        assert_eq!(reg.get::<Health>(e), Err(EcsError::DeadEntity(e)));
        assert_eq!(reg.destroy(e), Err(EcsError::DeadEntity(e)));
        assert_eq!(freed.load(Ordering::SeqCst), 1);

        // The other entity keeps its component.
        assert!(reg.has::<Tracked>(other));
    }

    #[test]
    fn insert_duplicate_fails() {
        let mut reg = Registry::new();
        let e = reg.insert(Entity(7), (Health(3),)).unwrap();
        assert_eq!(e, Entity(7));
        assert_eq!(
            reg.insert(Entity(7), (Health(4),)).unwrap_err(),
            EcsError::DuplicateEntity(Entity(7))
        );
        assert_eq!(reg.get::<Health>(e).unwrap(), Some(&Health(3)));
        assert_eq!(reg.insert(Entity::NULL, ()).unwrap_err(), EcsError::NullEntity);
    }

    #[test]
    fn create_skips_handles_taken_by_insert() {
        let mut reg = Registry::new();
        reg.insert(Entity(0), ()).unwrap();
        reg.insert(Entity(1), ()).unwrap();
        let e = reg.create(());
        assert_eq!(e, Entity(2));
    }

    #[test]
    fn handle_can_be_reinserted_after_destroy() {
        let mut reg = Registry::new();
        let e = reg.insert(Entity(5), (Health(1),)).unwrap();
        reg.destroy(e).unwrap();
        reg.insert(Entity(5), (Name("again"),)).unwrap();
        assert!(!reg.has::<Health>(Entity(5)));
        assert!(reg.has::<Name>(Entity(5)));
    }

    #[test]
    fn emplace_replaces_and_frees_old_value() {
        let freed = Arc::new(AtomicUsize::new(0));
        let mut reg = Registry::new();
        let e = reg.create((Tracked(freed.clone()),));
        reg.emplace(e, Tracked(freed.clone())).unwrap();
        assert_eq!(freed.load(Ordering::SeqCst), 1);

        assert!(reg.remove::<Tracked>(e).unwrap());
        assert_eq!(freed.load(Ordering::SeqCst), 2);
        assert!(!reg.remove::<Tracked>(e).unwrap());

        reg.destroy(e).unwrap();
        assert_eq!(freed.load(Ordering::SeqCst), 2);
        assert_eq!(reg.emplace(e, Health(1)), Err(EcsError::DeadEntity(e)));
    }

    #[test]
    fn grouped_iteration_requires_all_types() {
        let mut reg = Registry::new();
        let a = reg.create((Health(1), Marked));
        let _b = reg.create((Health(2),));
        let c = reg.create((Health(3), Marked, Name("c")));

        let mut seen = Vec::new();
        reg.for_each_with_all::<(Health, Marked)>(|e, (h, _)| seen.push((e, h.0)));
        assert_eq!(seen, vec![(a, 1), (c, 3)]);
        assert_eq!(reg.view::<(Marked, Name)>(), vec![c]);
    }

    #[test]
    fn grouped_mutation_writes_back() {
        let mut reg = Registry::new();
        let a = reg.create((Health(1), Name("a")));
        let b = reg.create((Health(2),));

        reg.for_each_with_all_mut::<(Health, Name)>(|_, (h, _)| h.0 += 10);
        reg.for_each_with_all_mut::<(Health,)>(|_, (h,)| h.0 *= 2);

        assert_eq!(reg.get::<Health>(a).unwrap(), Some(&Health(22)));
        assert_eq!(reg.get::<Health>(b).unwrap(), Some(&Health(4)));
        // Storages survive a query whose second type was never stored.
        reg.for_each_with_all_mut::<(Health, Marked)>(|_, _| unreachable!());
        assert!(reg.has::<Health>(a));
    }

    #[test]
    fn destroy_keeps_remaining_entities_iterable() {
        let mut reg = Registry::new();
        let a = reg.create((Health(1),));
        let b = reg.create((Health(2),));
        let c = reg.create((Health(3),));
        reg.destroy(a).unwrap();

        let mut left: Vec<_> = reg.entities().collect();
        left.sort();
        assert_eq!(left, vec![b, c]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get::<Health>(c).unwrap().is_some());
    }
}
