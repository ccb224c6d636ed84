use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::object::ObjectId;

/// Mode of a tree entry.
///
/// `Commit` marks a repository boundary: the entry's hash names a commit in
/// another repository (a submodule), not an object of the enclosing tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    /// Subtree / directory (0o040000).
    Tree,
    /// Nested repository commit (0o160000).
    Commit,
    /// Normal file (0o100644).
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
}

impl EntryMode {
    /// Octal mode value (for display).
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Tree => 0o040000,
            Self::Commit => 0o160000,
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
        }
    }

    /// Parse from an octal mode value.
    pub fn from_mode_bits(bits: u32) -> Result<Self, TypeError> {
        match bits {
            0o040000 => Ok(Self::Tree),
            0o160000 => Ok(Self::Commit),
            0o100644 => Ok(Self::Regular),
            0o100755 => Ok(Self::Executable),
            0o120000 => Ok(Self::Symlink),
            other => Err(TypeError::UnknownMode(other)),
        }
    }

    /// Regular or executable file.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }

    /// Short lowercase name, used in error messages and listings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Regular => "file",
            Self::Executable => "exec",
            Self::Symlink => "symlink",
        }
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// An immutable `{mode, hash}` value stored at a path.
///
/// Entries are never edited in place; writing a path replaces its entry with
/// a new value, so mode and hash always change together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub mode: EntryMode,
    pub hash: ObjectId,
}

impl Entry {
    pub fn new(mode: EntryMode, hash: ObjectId) -> Self {
        Self { mode, hash }
    }

    pub fn commit(hash: ObjectId) -> Self {
        Self::new(EntryMode::Commit, hash)
    }

    pub fn tree(hash: ObjectId) -> Self {
        Self::new(EntryMode::Tree, hash)
    }

    pub fn file(hash: ObjectId) -> Self {
        Self::new(EntryMode::Regular, hash)
    }
}
