#![deny(missing_docs)]

//! This crate provides the ability to download and extract cppan source
//! archives. Extraction is defensive: symlinks are refused and entries whose
//! paths would escape the destination are dropped.

pub mod fs;
pub mod read;

#[cfg(feature = "reqwest")]
pub mod reqwest;

/// An error that can occur when extracting an archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("archive contains a symlink entry '{0}'")]
    SymlinkRefused(String),

    #[error("unsupported package archive format '{0}'")]
    UnsupportedArchiveType(String),

    #[error("unpack directory '{0}' already exists in the archive")]
    UnpackDirectoryExists(String),
}
