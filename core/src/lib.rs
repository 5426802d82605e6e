//! This crate implements the engine behind a read-only filesystem view of
//! git repositories: tree snapshots, content caching, file handles, and
//! the multi-repository and per-user layers on top.
//!
//! Object access is abstracted behind the [`ObjectSource`] trait; see the
//! `gitbarefs_on_disk` crate for implementations.
//!
//! [`ObjectSource`]: source/trait.ObjectSource.html

#![deny(warnings)]

pub mod annex;
pub mod attr;
pub mod cache;
pub mod fs;
pub mod gitolite;
pub mod handles;
pub mod lock;
pub mod object;
pub mod registry;
pub mod repo;
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;
