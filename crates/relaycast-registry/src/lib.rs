//! Named type registry and thread-safe scratch map.
//!
//! The registry lets a driver construct values by name without depending on
//! their concrete types. Entries are either a shared instance that is cloned
//! on lookup or a constructor that builds a fresh value from arguments.

mod error;
mod map;
mod registry;

pub use error::{BoxError, RegistryError};
pub use map::SafeMap;
pub use registry::{Constructor, Named, Registration, TypeRegistry};

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
