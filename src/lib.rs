//! Self-hosted captcha image sourcing from tag searchable image boorus.
//!
//! [`sourcing::Sourcer`] turns a character tag into a validated, never
//! before used image of exactly that character, backed by a
//! [`database::SqliteStore`] and a [`booru::GelbooruClient`].

pub mod booru;
pub mod config_loader;
pub mod database;
pub mod models;
pub mod sourcing;

pub use config_loader::{AppConfig, ConfigError, ConfigResult};
pub use database::{SqliteStore, Store, StoreError};
pub use models::{FetchRequest, Image, Md5, PendingImage, Rating, Source};
pub use sourcing::{FetchError, Fetched, Sourcer, SourcerConfig};
