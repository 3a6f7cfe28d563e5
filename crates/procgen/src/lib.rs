//! Procedural terrain for Onibi.

pub mod terrain;

pub use terrain::*;
