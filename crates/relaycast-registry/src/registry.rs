//! Name to constructor registry.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BoxError, RegistryError};
use crate::map::SafeMap;
use crate::RegistryResult;

/// Something that reports its own registry name.
pub trait Named {
    /// Returns the name this value is registered under.
    fn name(&self) -> &str;
}

/// Builds a fresh value from lookup arguments.
pub type Constructor<T, A> = Arc<dyn Fn(A) -> Result<T, BoxError> + Send + Sync>;

enum Entry<T, A> {
    Instance(T),
    Factory(Constructor<T, A>),
}

/// A named registry entry: either a shared instance or a constructor.
pub struct Registration<T, A> {
    name: String,
    entry: Entry<T, A>,
}

impl<T, A> Registration<T, A> {
    /// An entry that hands out clones of `value`.
    pub fn instance(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            entry: Entry::Instance(value),
        }
    }

    /// An entry that calls `constructor` on every lookup.
    pub fn factory<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(A) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            entry: Entry::Factory(Arc::new(constructor)),
        }
    }

    /// Returns true if lookups construct a fresh value.
    pub fn is_factory(&self) -> bool {
        matches!(self.entry, Entry::Factory(_))
    }
}

impl<T, A> Named for Registration<T, A> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, A> fmt::Debug for Registration<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("factory", &self.is_factory())
            .finish()
    }
}

/// Thread-safe registry mapping names to values of type `T`, constructed
/// from arguments of type `A`.
pub struct TypeRegistry<T, A = ()> {
    entries: SafeMap<String, Arc<Registration<T, A>>>,
}

impl<T, A> Default for TypeRegistry<T, A> {
    fn default() -> Self {
        Self {
            entries: SafeMap::default(),
        }
    }
}

impl<T, A> TypeRegistry<T, A> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a registration under its own name.
    pub fn register(&self, registration: Registration<T, A>) -> RegistryResult<()> {
        let name = registration.name().to_string();
        if !self.entries.insert_new(name.clone(), Arc::new(registration)) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        debug!(%name, "Registered type");
        Ok(())
    }

    /// Stores a shared instance under the name it reports.
    pub fn register_instance(&self, value: T) -> RegistryResult<()>
    where
        T: Named,
    {
        let name = value.name().to_string();
        self.register(Registration::instance(name, value))
    }

    /// Returns true if the name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.snapshot().into_keys().collect();
        names.sort();
        names
    }

    /// Looks up `name`, constructing a fresh value from `args` for factory
    /// entries or cloning the shared instance otherwise.
    pub fn get(&self, name: &str, args: A) -> RegistryResult<T>
    where
        T: Clone,
    {
        let registration = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        // The map lock is released here; constructors may be slow or re-enter.
        match &registration.entry {
            Entry::Instance(value) => Ok(value.clone()),
            Entry::Factory(constructor) => {
                constructor(args).map_err(|source| RegistryError::Construct {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}

impl<T, A> fmt::Debug for TypeRegistry<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("names", &self.names())
            .finish()
    }
}
