//! Database query functions organized by domain.

pub mod cursor;
pub mod entities;
pub mod settings;
