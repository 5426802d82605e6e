/// Describes the file type as recorded in a tree entry.
///
/// Git uses a variation on the Unix file permissions flags to denote a file's
/// intended type on disk. The following values are recognized:
///
/// * `0o100644` - normal file (`0o100664` is accepted from very old trees)
/// * `0o100755` - executable file
/// * `0o120000` - symbolic link
/// * `0o040000` - tree (subdirectory)
/// * `0o160000` - submodule (aka gitlink)
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum FileMode {
    Normal,
    Executable,
    SymbolicLink,
    Tree,
    Submodule,
}

impl FileMode {
    /// Convert from git file-mode integer to `FileMode` enum.
    ///
    /// Returns `None` if the value is not one of the recognized constants.
    pub fn from_value(value: u32) -> Option<FileMode> {
        match value {
            0o100644 | 0o100664 => Some(FileMode::Normal),
            0o100755 => Some(FileMode::Executable),
            0o120000 => Some(FileMode::SymbolicLink),
            0o040000 => Some(FileMode::Tree),
            0o160000 => Some(FileMode::Submodule),
            _ => None,
        }
    }

    /// Parse the octal digits used for modes inside tree objects.
    pub fn from_octal_slice(digits: &[u8]) -> Option<FileMode> {
        if digits.is_empty() || digits.len() > 6 {
            return None;
        }

        let mut value = 0u32;
        for c in digits {
            match c {
                b'0'..=b'7' => value = value * 8 + u32::from(c - b'0'),
                _ => return None,
            }
        }

        FileMode::from_value(value)
    }

    /// Convert from `FileMode` enum to git file-mode integer.
    pub fn to_value(self) -> u32 {
        match self {
            FileMode::Normal => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::SymbolicLink => 0o120000,
            FileMode::Tree => 0o040000,
            FileMode::Submodule => 0o160000,
        }
    }
}

/// The three kinds of non-directory entries a mounted tree exposes.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ObjectMode {
    RegularFile,
    ExecutableFile,
    Symlink,
}

impl ObjectMode {
    /// Blob-carrying file modes map to an `ObjectMode`; trees and submodules don't.
    pub fn from_file_mode(mode: FileMode) -> Option<ObjectMode> {
        match mode {
            FileMode::Normal => Some(ObjectMode::RegularFile),
            FileMode::Executable => Some(ObjectMode::ExecutableFile),
            FileMode::SymbolicLink => Some(ObjectMode::Symlink),
            FileMode::Tree | FileMode::Submodule => None,
        }
    }
}

/// Platform `st_mode` values reported for each kind of node.
///
/// The defaults give group write permission, matching what a shared
/// checkout on a typical server umask would show.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeTable {
    pub regular: u32,
    pub executable: u32,
    pub symlink: u32,
    pub directory: u32,
}

impl ModeTable {
    pub fn st_mode(&self, mode: ObjectMode) -> u32 {
        match mode {
            ObjectMode::RegularFile => self.regular,
            ObjectMode::ExecutableFile => self.executable,
            ObjectMode::Symlink => self.symlink,
        }
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        ModeTable {
            regular: 0o100664,
            executable: 0o100775,
            symlink: 0o120777,
            directory: 0o040775,
        }
    }
}
