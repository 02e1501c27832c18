//! Headless core of the BiasBrief news reader.
//!
//! The crate owns four things: the feed controller (filter/sort/pagination
//! state and the derived article list), the article page cache, the typed
//! preference store over durable key-value storage, and the bookmark
//! subsystem. The article/debias service and the storage backend are
//! reached only through the [`remote::ArticleSource`] and
//! [`storage::KeyValueStore`] traits, so a rendering layer — or a test —
//! can wire in whatever implementations it wants.
pub mod article;
pub mod bookmarks;
pub mod cache;
pub mod config;
pub mod controller;
pub mod derive;
pub mod prefs;
pub mod remote;
pub mod storage;

pub use article::{Article, ArticleId};
pub use controller::{FeedController, FeedEvent, FeedView};
pub use derive::{FeedState, SortOrder, ALL_CATEGORIES};
pub use prefs::{PreferenceStore, Preferences, Recovered};
