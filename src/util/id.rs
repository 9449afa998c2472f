/// Utilities for process unique identifiers.
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UUID(NonZeroU64);

// The top bit is reserved so that generated ids never collide with hashed ones that happen to be
// small. Hashed ids keep it set.
static NEXT_UUID: AtomicU64 = AtomicU64::new(1);
const HASHED_BIT: u64 = 1u64 << 63;

impl UUID {
    pub fn new() -> Self {
        let id = NEXT_UUID.fetch_add(1, AtomicOrdering::Relaxed);
        if (id & HASHED_BIT) != 0 {
            log::error!("Exhausted uuid space");
            panic!()
        }

        Self::from_raw(id)
    }

    pub const fn from_raw(id: u64) -> Self {
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => panic!("Zero id"),
        }
    }

    pub const fn get_raw(&self) -> u64 {
        self.0.get()
    }
}

impl Debug for UUID {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("UUID({:#016X})", self.get_raw()))
    }
}

#[derive(Clone, Debug)]
enum NameType {
    Static(&'static str),
    String(Arc<str>),
}

impl NameType {
    fn get(&self) -> &str {
        match self {
            NameType::Static(str) => str,
            NameType::String(str) => str.as_ref(),
        }
    }
}

/// A UUID generated from a string.
///
/// The id is the xxh3 hash of the name, so the same name always produces the same id. The name is
/// kept alongside for debugging and is reference counted to keep clones cheap.
#[derive(Clone)]
pub struct NamedUUID {
    name: NameType,
    id: UUID,
}

impl NamedUUID {
    const fn hash_str_const(name: &str) -> u64 {
        xxhash_rust::const_xxh3::xxh3_64(name.as_bytes()) | HASHED_BIT
    }

    fn hash_str(name: &str) -> u64 {
        xxhash_rust::xxh3::xxh3_64(name.as_bytes()) | HASHED_BIT
    }

    pub const fn from_str(name: &'static str) -> NamedUUID {
        NamedUUID { name: NameType::Static(name), id: UUID::from_raw(Self::hash_str_const(name)) }
    }

    pub fn from_string(name: String) -> NamedUUID {
        let id = UUID::from_raw(Self::hash_str(name.as_str()));
        NamedUUID { name: NameType::String(Arc::from(name)), id }
    }

    /// Generates the uuid for a string without keeping the name.
    pub const fn uuid_for(name: &str) -> UUID {
        UUID::from_raw(Self::hash_str_const(name))
    }

    pub fn get_name(&self) -> &str {
        self.name.get()
    }

    pub fn get_uuid(&self) -> UUID {
        self.id
    }
}

impl PartialEq for NamedUUID {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for NamedUUID {
}

impl PartialEq<UUID> for NamedUUID {
    fn eq(&self, other: &UUID) -> bool {
        self.get_uuid().eq(other)
    }
}

impl PartialOrd for NamedUUID {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.id.partial_cmp(&other.id)
    }
}

impl Ord for NamedUUID {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for NamedUUID {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must match the hash of the plain uuid
        self.get_uuid().hash(state)
    }
}

impl From<NamedUUID> for UUID {
    fn from(id: NamedUUID) -> Self {
        id.get_uuid()
    }
}

impl Debug for NamedUUID {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("NamedUUID{{\"{}\", {:?}}}", self.get_name(), &self.id))
    }
}

/// Utility macro to define new id types using a [`UUID`] internally.
#[macro_export]
macro_rules! define_uuid_type {
    ($vis:vis, $name:ident) => {
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
        $vis struct $name($crate::util::id::UUID);

        impl $name {
            $vis fn new() -> Self {
                Self($crate::util::id::UUID::new())
            }

            $vis fn from_uuid(raw: $crate::util::id::UUID) -> Self {
                Self(raw)
            }

            $vis fn as_uuid(&self) -> $crate::util::id::UUID {
                self.0
            }
        }

        impl From<$name> for $crate::util::id::UUID {
            fn from(id: $name) -> Self {
                id.as_uuid()
            }
        }
    }
}

pub use define_uuid_type;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_unique() {
        let a = UUID::new();
        let b = UUID::new();
        assert_ne!(a, b);
        assert_eq!(a.get_raw() & HASHED_BIT, 0);
    }

    #[test]
    fn test_named_uuid_stable() {
        const STATIC: NamedUUID = NamedUUID::from_str("nebula:shader/deferred");
        let dynamic = NamedUUID::from_string(String::from("nebula:shader/deferred"));

        assert_eq!(STATIC, dynamic);
        assert_eq!(dynamic.get_name(), "nebula:shader/deferred");
        assert_eq!(NamedUUID::uuid_for("nebula:shader/deferred"), dynamic.get_uuid());
        assert_ne!(NamedUUID::uuid_for("nebula:shader/forward"), dynamic.get_uuid());
    }
}
