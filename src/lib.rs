//! Typed search fields and display templates over arbitrary JSON documents.
//!
//! A document declares its records, the [`field::Field`]s used to query them
//! and how a matching record is shown ([`display::DisplayTemplate`]).
//! [`parsing::parse_file`] turns such a document into a [`parsing::ParsedFile`].
pub mod cli;
pub mod database;
pub mod display;
pub mod error;
pub mod field;
pub mod json_path;
pub mod parsing;
pub mod path_de;
pub mod prefs;

pub use error::{Error, Result};
