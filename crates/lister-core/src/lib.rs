//! Core of the directory lister: enumeration, sorting, templating,
//! size formatting, and the memoized content-hash cache. The HTTP
//! surface lives in the `lister-bin` crate.

pub mod config;
pub mod defaults;
pub mod entries;
pub mod error;
pub mod hashcache;
pub mod mime;
pub mod render;
pub mod size;
pub mod template;
