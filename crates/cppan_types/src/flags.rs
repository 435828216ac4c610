use std::{
    fmt::{self, Debug, Formatter},
    ops::{BitOr, BitOrAssign},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Independent boolean aspects of a package.
///
/// The bit positions are wire format: they appear in the catalog tables and
/// in the `find_dependencies` response and must never be renumbered.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PackageFlags(u64);

impl PackageFlags {
    /// The package ships only headers and produces no artifact.
    pub const HEADER_ONLY: PackageFlags = PackageFlags(1 << 0);
    /// The package builds an executable.
    pub const EXECUTABLE: PackageFlags = PackageFlags(1 << 6);
    /// The dependency edge is private to its parent.
    pub const PRIVATE_DEPENDENCY: PackageFlags = PackageFlags(1 << 8);
    /// The package was requested directly rather than pulled in transitively.
    pub const DIRECT_DEPENDENCY: PackageFlags = PackageFlags(1 << 9);
    /// Only the include directories of this dependency are consumed.
    pub const INCLUDE_DIRECTORIES_ONLY: PackageFlags = PackageFlags(1 << 10);
    /// The package is a local, on-disk project and never resolved remotely.
    pub const LOCAL_PROJECT: PackageFlags = PackageFlags(1 << 11);

    /// Returns the empty flag set.
    pub fn empty() -> Self {
        PackageFlags(0)
    }

    /// Constructs flags from their raw wire representation. Unknown bits are
    /// preserved so newer servers can pass data through older clients.
    pub fn from_bits(bits: u64) -> Self {
        PackageFlags(bits)
    }

    /// The raw wire representation.
    pub fn bits(self) -> u64 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: PackageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets all bits of `other`.
    pub fn insert(&mut self, other: PackageFlags) {
        self.0 |= other.0;
    }

    /// Clears all bits of `other`.
    pub fn remove(&mut self, other: PackageFlags) {
        self.0 &= !other.0;
    }

    /// Sets or clears all bits of `other` depending on `value`.
    pub fn set(&mut self, other: PackageFlags, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for PackageFlags {
    type Output = PackageFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PackageFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PackageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Debug for PackageFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        const NAMES: &[(PackageFlags, &str)] = &[
            (PackageFlags::HEADER_ONLY, "header_only"),
            (PackageFlags::EXECUTABLE, "executable"),
            (PackageFlags::PRIVATE_DEPENDENCY, "private_dependency"),
            (PackageFlags::DIRECT_DEPENDENCY, "direct_dependency"),
            (
                PackageFlags::INCLUDE_DIRECTORIES_ONLY,
                "include_directories_only",
            ),
            (PackageFlags::LOCAL_PROJECT, "local_project"),
        ];
        let mut listed = f.debug_list();
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                listed.entry(name);
            }
        }
        listed.finish()
    }
}

impl Serialize for PackageFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(PackageFlags(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bit_positions_are_wire_format() {
        assert_eq!(PackageFlags::HEADER_ONLY.bits(), 1);
        assert_eq!(PackageFlags::EXECUTABLE.bits(), 1 << 6);
        assert_eq!(PackageFlags::PRIVATE_DEPENDENCY.bits(), 1 << 8);
        assert_eq!(PackageFlags::DIRECT_DEPENDENCY.bits(), 1 << 9);
        assert_eq!(PackageFlags::INCLUDE_DIRECTORIES_ONLY.bits(), 1 << 10);
        assert_eq!(PackageFlags::LOCAL_PROJECT.bits(), 1 << 11);
    }

    #[test]
    fn merge_preserves_unknown_bits() {
        let mut flags = PackageFlags::from_bits(1 << 42);
        flags |= PackageFlags::EXECUTABLE;
        assert!(flags.contains(PackageFlags::EXECUTABLE));
        assert_eq!(flags.bits() & (1 << 42), 1 << 42);
    }

    #[test]
    fn set_and_remove() {
        let mut flags = PackageFlags::empty();
        flags.set(PackageFlags::LOCAL_PROJECT, true);
        assert!(flags.contains(PackageFlags::LOCAL_PROJECT));
        flags.set(PackageFlags::LOCAL_PROJECT, false);
        assert_eq!(flags, PackageFlags::empty());
    }
}
