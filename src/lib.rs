//! Client SDK for the storefront API.
//!
//! Holds the user's session token, sends authenticated requests to the REST
//! API and keeps a local copy of the cart and orders up to date from the
//! server's push channel.
//!
//! ```ignore
//! use storefront_client::{ClientOptions, Landing, Storefront};
//!
//! let store = Storefront::new(ClientOptions::from_env())?;
//! match store.login("alice", "secret").await? {
//!     Landing::AdminDashboard => { store.load_orders(1).await?; }
//!     _ => { store.refresh_cart().await?; }
//! }
//! ```

pub mod clock;
pub mod config;
pub mod debug;
pub mod engineio;
pub mod errors;
pub mod storage;
pub mod storefront;
pub mod structs;

pub use config::ClientOptions;
pub use errors::StorefrontError;
pub use storefront::Storefront;
pub use structs::client::ApiClient;
pub use structs::reconciler::{ChannelState, PushEvent, Reconciler};
pub use structs::session::{BrowserRedirect, Session, SessionListener, SessionStore};
pub use structs::view::{Listing, ViewState};
pub use structs::{CartItem, Landing, OrderRecord, OrderStatus, PageCursor, Role, ServiceItem};

#[cfg(test)]
mod tests;
