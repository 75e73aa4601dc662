//! Client-side state for the storefront app: session, cart and product feed
//! stores, the HTTP backend client and the composition root tying them
//! together.

pub mod app;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod session;
pub mod store;

pub use app::{NavigationGraph, SignInOutcome, Storefront, StorefrontServices};
pub use cart::{cart_total, price_cart, CartAggregate, CartLine, CartState, CartSummary, PricedLine};
pub use catalog::{
    AssetUrls, AuthApi, HttpStorefrontApi, ProductCatalogApi, ProductPage, ProfileApi, TokenPair,
};
pub use config::{load_settings, ClientSettings};
pub use error::{CatalogError, FeedErrorKind, FeedFailure};
pub use feed::{FeedOptions, FeedQuery, FeedRequest, FeedState, FeedStatus, ProductFeedController};
pub use session::{
    MemorySessionPersistence, SessionPersistence, SessionState, SessionStore, Token,
    SESSION_STORAGE_KEY,
};
pub use store::Store;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
