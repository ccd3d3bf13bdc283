//! Filesystem I/O helpers.

pub mod extract;
