//! Clients for the remote anime tracking services.
//!
//! Each service exposes a raw client implementing [`traits::AnimeService`] and
//! a [`traits::ServiceProvider`] that knows how to obtain and refresh tokens.

pub mod anilist;
pub mod http;
pub mod mal;
pub mod oauth;
pub mod traits;

pub use traits::{
    AnimeSearchResult, AnimeService, LibraryEntryUpdate, ServiceError, ServiceProvider,
    TokenGrant, UserListEntry,
};
