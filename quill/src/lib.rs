#![allow(clippy::match_like_matches_macro)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]

pub mod config;
pub mod mf2;
pub mod slug;
pub mod storage;

pub use config::Config;
pub use mf2::Document;
pub use storage::git::GitStore;

pub mod prelude {
    use super::*;

    pub use config::Config;
    pub use mf2::{Document, Value};
    pub use storage::{ContentObject, ContentStore, MediaStore};
}
