//! Resumable scraper for LIDOM game records.
//!
//! The league page embeds its data as the arguments of a constructor call inside a
//! script. [`extract`] recovers those arguments, [`normalize`] maps them onto
//! [`record::CanonicalRecord`], [`reconcile`] folds overlapping observations of one
//! game together, [`runner`] fetches and persists detail pages in resumable shards,
//! and [`export`] rebuilds the chunked aggregate views.

mod error;
mod macros;

pub mod config;
pub mod export;
pub mod extract;
pub mod layout;
pub mod normalize;
pub mod process;
pub mod reconcile;
pub mod record;
pub mod request;
pub mod runner;
pub mod store;

pub use error::{Error, Result};
