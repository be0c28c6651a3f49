use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::config::ClientOptions;
use crate::debug::Scope;
use crate::debug_log;
use crate::engineio::PollingTransport;
use crate::errors::StorefrontError;
use crate::storage::{FileTokenStorage, TokenStorage};
use crate::structs::client::{ApiClient, Dispatch, ReqwestDispatch};
use crate::structs::reconciler::{ChannelState, PushTransport, Reconciler};
use crate::structs::session::{SessionListener, SessionStore};
use crate::structs::view::{Listing, ViewState};
use crate::structs::{CartItem, Landing, OrderRecord, OrderStatus, Page, Role};

/// Storefront client. Wires the session, the API client, the cached view
/// state and the push channel together, and exposes the calls the login,
/// user and admin screens make.
pub struct Storefront {
    options: ClientOptions,
    session: Arc<SessionStore>,
    api: ApiClient,
    view: Arc<ViewState>,
    live: Arc<Reconciler>,
}

impl Storefront {
    /// Creates a client talking to the configured servers over HTTP.
    pub fn new(options: ClientOptions) -> Result<Self, StorefrontError> {
        options.validate()?;

        let http = reqwest::Client::new();
        let storage = Arc::new(FileTokenStorage::new(options.token_path.clone()));
        let dispatch = Arc::new(ReqwestDispatch::new(http.clone()));
        let transport = Arc::new(PollingTransport::new(http, &options.socket_url, options.debug));

        Self::with_parts(options, storage, Arc::new(SystemClock), dispatch, transport)
    }

    /// Creates a client from explicit parts.
    pub fn with_parts(
        options: ClientOptions,
        storage: Arc<dyn TokenStorage>,
        clock: Arc<dyn Clock>,
        dispatch: Arc<dyn Dispatch>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self, StorefrontError> {
        options.validate()?;

        let session = Arc::new(SessionStore::new(storage, clock, options.debug));
        let view = Arc::new(ViewState::default());
        let live = Arc::new(Reconciler::new(
            transport,
            view.clone(),
            options.reconnect_delay,
            options.debug,
        ));

        session.add_listener(live.clone());
        session.add_listener(view.clone());

        let api = ApiClient::new(&options.api_url, session.clone(), dispatch, options.debug);

        Ok(Self {
            options,
            session,
            api,
            view,
            live,
        })
    }

    /// Register something to run when the session ends, typically navigation
    /// back to the login screen.
    pub fn on_logout(&self, listener: Arc<dyn SessionListener>) {
        self.session.add_listener(listener);
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn view(&self) -> &Arc<ViewState> {
        &self.view
    }

    pub fn channel_state(&self) -> ChannelState {
        self.live.state()
    }

    /// Which screen the user belongs on right now.
    pub fn landing(&self) -> Landing {
        Landing::from(self.session.role())
    }

    /// Pick up a persisted session, if it is still valid, and open the push channel for it.
    pub fn resume(&self) -> Result<Landing, StorefrontError> {
        match self.session.valid_session() {
            Some(session) => {
                self.live.start(&session.token)?;
                Ok(Landing::from(Some(session.role)))
            }
            None => Ok(Landing::Login),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Landing, StorefrontError> {
        let session = self.api.login(username, password).await?;
        debug_log!(self.options.debug, Scope::Auth, "Welcome, {}.", username);
        self.live.start(&session.token)?;
        Ok(Landing::from(Some(session.role)))
    }

    /// End the session. Safe to call any number of times.
    pub fn logout(&self) {
        self.session.logout();
        // Listeners only run once per session; make sure local state is gone regardless.
        self.live.shutdown();
        self.view.clear();
    }

    pub async fn refresh_cart(&self) -> Result<Vec<CartItem>, StorefrontError> {
        let generation = self.view.generation();
        let cart = self.api.cart().await?;
        if self.view.generation() == generation {
            self.view.replace_cart(cart.clone());
        }
        Ok(cart)
    }

    /// Add one service to the cart and reload the cart.
    pub async fn add_to_cart(
        &self,
        service_id: u64,
        quantity: u32,
        location: &str,
    ) -> Result<Vec<CartItem>, StorefrontError> {
        self.api.add_to_cart(service_id, quantity, location).await?;
        self.refresh_cart().await
    }

    pub async fn remove_cart_item(&self, cart_item_id: u64) -> Result<Vec<CartItem>, StorefrontError> {
        self.api.remove_cart_item(cart_item_id).await?;
        self.refresh_cart().await
    }

    /// Order everything in the cached cart. On success the local cart is
    /// emptied and the current page of orders reloaded so the new order shows.
    pub async fn place_order(&self) -> Result<Value, StorefrontError> {
        let generation = self.view.generation();
        let cart = self.view.cart();
        let reply = self.api.place_order(&cart).await?;
        if self.view.generation() != generation {
            return Ok(reply);
        }
        self.view.replace_cart(Vec::new());

        let page = self.view.cursor(Listing::Orders).page;
        if let Some(_guard) = self.view.begin_load(Listing::Orders) {
            if let Err(err) = self.fetch_orders(page).await {
                debug_log!(
                    self.options.debug,
                    Scope::Api,
                    warn,
                    "Order placed but reloading orders failed: {}",
                    err
                );
            }
        }
        Ok(reply)
    }

    /// Load a page of orders: every order for admins, the caller's own otherwise.
    /// Returns `false` when skipped because a load is already in flight.
    pub async fn load_orders(&self, page: u32) -> Result<bool, StorefrontError> {
        let Some(_guard) = self.view.begin_load(Listing::Orders) else {
            return Ok(false);
        };
        self.fetch_orders(page.max(1)).await
    }

    /// Move the order listing to `page`. A no-op (`Ok(false)`) when `page` is
    /// out of range or a load is in flight.
    pub async fn handle_page_change(&self, page: u32) -> Result<bool, StorefrontError> {
        let Some(_guard) = self.view.begin_page_change(Listing::Orders, page) else {
            return Ok(false);
        };
        self.fetch_orders(page).await
    }

    async fn fetch_orders(&self, page: u32) -> Result<bool, StorefrontError> {
        let generation = self.view.generation();
        let per_page = self.options.page_size;
        let result = match self.session.role() {
            Some(Role::Admin) => self.api.orders(page, per_page).await?,
            _ => self.api.my_orders(page, per_page).await?,
        };

        if self.view.generation() != generation {
            return Ok(false);
        }
        self.view.settle_orders(result);
        Ok(true)
    }

    pub async fn track_order(&self, order_id: u64) -> Result<OrderRecord, StorefrontError> {
        let generation = self.view.generation();
        let order = self.api.order(order_id).await?;
        if self.view.generation() == generation {
            self.view.set_tracked(order.clone());
        }
        Ok(order)
    }

    /// Load a page of services in `category`. Skipped while another load runs.
    pub async fn load_services(&self, category: &str, page: u32) -> Result<bool, StorefrontError> {
        let Some(_guard) = self.view.begin_load(Listing::Services) else {
            return Ok(false);
        };
        self.fetch_services(category, page.max(1)).await
    }

    /// Guarded page change for the services listing.
    pub async fn change_services_page(&self, category: &str, page: u32) -> Result<bool, StorefrontError> {
        let Some(_guard) = self.view.begin_page_change(Listing::Services, page) else {
            return Ok(false);
        };
        self.fetch_services(category, page).await
    }

    async fn fetch_services(&self, category: &str, page: u32) -> Result<bool, StorefrontError> {
        let generation = self.view.generation();
        let result = self
            .api
            .services(category, page, self.options.page_size)
            .await?;

        if self.view.generation() != generation {
            return Ok(false);
        }
        self.view.settle_services(result);
        Ok(true)
    }

    /// Load page `page` of every category at once and show them as one
    /// single-page listing.
    pub async fn load_all_services(&self, categories: &[&str], page: u32) -> Result<bool, StorefrontError> {
        let Some(_guard) = self.view.begin_load(Listing::Services) else {
            return Ok(false);
        };
        let generation = self.view.generation();
        let page = page.max(1);
        let per_page = self.options.page_size;

        let pages = try_join_all(
            categories
                .iter()
                .map(|category| self.api.services(category, page, per_page)),
        )
        .await?;

        if self.view.generation() != generation {
            return Ok(false);
        }
        self.view.settle_services(Page {
            items: pages.into_iter().flat_map(|p| p.items).collect(),
            page: 1,
            total_pages: 1,
        });
        Ok(true)
    }

    /// Start an M-Pesa payment for the cart.
    pub async fn pay(&self, phone_number: &str, amount: f64) -> Result<Value, StorefrontError> {
        self.api.mpesa_payment(phone_number, amount).await
    }

    pub async fn set_order_status(
        &self,
        order_id: u64,
        status: OrderStatus,
    ) -> Result<OrderRecord, StorefrontError> {
        let generation = self.view.generation();
        let order = self.api.update_order_status(order_id, status).await?;
        Ok(self.apply_ack(generation, order))
    }

    pub async fn confirm_order(&self, order_id: u64) -> Result<OrderRecord, StorefrontError> {
        let generation = self.view.generation();
        let order = self.api.confirm_order(order_id).await?;
        Ok(self.apply_ack(generation, order))
    }

    pub async fn pay_order(&self, order_id: u64) -> Result<OrderRecord, StorefrontError> {
        let generation = self.view.generation();
        let order = self.api.process_payment(order_id).await?;
        Ok(self.apply_ack(generation, order))
    }

    fn apply_ack(&self, generation: u64, order: OrderRecord) -> OrderRecord {
        if self.view.generation() == generation {
            self.view.apply_order(order.clone());
        }
        order
    }
}
