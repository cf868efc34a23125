//! Storage policies.

use std::fmt;

/// How the objects of one class map onto backing files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoragePolicy {
    /// Stored inline inside the parent object; no resource of its own.
    Embedded,
    /// One file per object, plus a references index for enumeration.
    ObjectFile,
    /// All objects of the class in one file.
    ClassFile,
    /// The class file sharded into fragments of bounded size.
    FragmentedClassFile,
}

impl StoragePolicy {
    /// Returns true if objects of this policy live in their own resources.
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        !matches!(self, Self::Embedded)
    }
}

impl fmt::Display for StoragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embedded => "embedded",
            Self::ObjectFile => "object-file",
            Self::ClassFile => "class-file",
            Self::FragmentedClassFile => "fragmented-class-file",
        };
        f.write_str(name)
    }
}
