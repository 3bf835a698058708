pub mod auth;
pub mod cache;
pub mod config;
pub mod entries;
pub mod error;
pub mod index;
pub mod loader;
pub mod markup;
pub mod path;
pub mod persist;
pub mod rights;
pub mod search;
pub mod storage;
pub mod uploads;
pub mod users;
pub mod wiki;

pub use config::WikiConfig;
pub use entries::EntryService;
pub use error::{Result, WikiError};
pub use wiki::Wiki;
