use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::errors::StorefrontError;
use crate::storage::{MemoryTokenStorage, TokenStorage};
use crate::structs::client::{Dispatch, HttpRequest, HttpResponse};
use crate::structs::reconciler::{PushConnection, PushEvent, PushTransport};
use crate::structs::session::SessionListener;
use crate::structs::view::Listing;
use crate::structs::{CartItem, Landing, OrderRecord, OrderStatus};
use crate::{ChannelState, ClientOptions, Storefront};

/// Unsigned JWT carrying `claims`.
pub(crate) fn token_for(claims: Value) -> String {
    let header = BASE64_URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = BASE64_URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

pub(crate) fn order_json(id: u64) -> Value {
    json!({
        "id": id,
        "user_id": 3,
        "service_name": "Plumbing",
        "price": 1500.0,
        "currency": "KES",
        "quantity": 1,
        "location": "Nairobi",
        "total_price": 1500.0,
        "status": "Pending",
        "created_at": "2024-05-01T10:15:30.123456"
    })
}

pub(crate) fn order(id: u64, status: OrderStatus) -> OrderRecord {
    let mut record: OrderRecord = serde_json::from_value(order_json(id)).unwrap();
    record.status = status;
    record
}

pub(crate) fn cart_item(id: u64) -> CartItem {
    CartItem {
        id,
        service_id: 10 + id,
        service_name: format!("Service {}", id),
        unit_price: 100.0,
        currency: "KES".to_string(),
        quantity: 1,
        location: String::new(),
    }
}

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl SessionListener for Counter {
    fn on_logout(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct FixedClock(AtomicU64);

impl FixedClock {
    pub(crate) fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub(crate) fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Answers requests from a queue of canned replies and records what was sent.
#[derive(Default)]
pub(crate) struct ScriptedDispatch {
    replies: Mutex<VecDeque<Result<HttpResponse, String>>>,
    sent: Mutex<Vec<HttpRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedDispatch {
    pub(crate) fn reply(&self, status: u16, body: Value) {
        self.replies.lock().push_back(Ok(HttpResponse {
            status,
            body: body.to_string().into_bytes(),
        }));
    }

    pub(crate) fn fail(&self, reason: &str) {
        self.replies.lock().push_back(Err(reason.to_string()));
    }

    pub(crate) fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().clone()
    }

    /// Hold the next request until the returned handle is notified. The held
    /// request takes its reply from the queue when it is sent.
    pub(crate) fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl Dispatch for ScriptedDispatch {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StorefrontError> {
        self.sent.lock().push(request);
        let reply = self.replies.lock().pop_front();
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match reply {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(StorefrontError::Network(reason)),
            None => Err(StorefrontError::Network("no scripted reply".to_string())),
        }
    }
}

/// Push transport whose connections replay scripted events, then stay open.
#[derive(Default)]
pub(crate) struct FakeTransport {
    scripts: Mutex<VecDeque<Vec<Result<PushEvent, StorefrontError>>>>,
    tokens: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closed: Arc<AtomicUsize>,
    refuse: AtomicBool,
}

impl FakeTransport {
    /// Events for the next connection.
    pub(crate) fn script(&self, events: Vec<Result<PushEvent, StorefrontError>>) {
        self.scripts.lock().push_back(events);
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self, token: &str) -> Result<Box<dyn PushConnection>, StorefrontError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(token.to_string());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StorefrontError::Network("connection refused".to_string()));
        }
        let events = self.scripts.lock().pop_front().unwrap_or_default();
        Ok(Box::new(FakeConnection {
            events: events.into(),
            closed: self.closed.clone(),
        }))
    }
}

struct FakeConnection {
    events: VecDeque<Result<PushEvent, StorefrontError>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PushConnection for FakeConnection {
    async fn next_event(&mut self) -> Result<PushEvent, StorefrontError> {
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    store: Storefront,
    dispatch: Arc<ScriptedDispatch>,
    transport: Arc<FakeTransport>,
    storage: Arc<MemoryTokenStorage>,
    clock: Arc<FixedClock>,
    navigations: Arc<Counter>,
}

fn harness() -> Harness {
    let dispatch = Arc::new(ScriptedDispatch::default());
    let transport = Arc::new(FakeTransport::default());
    let storage = Arc::new(MemoryTokenStorage::default());
    let clock = Arc::new(FixedClock::new(1_000));
    let options = ClientOptions {
        api_url: "http://shop.test/api".to_string(),
        socket_url: "http://shop.test".to_string(),
        reconnect_delay: Duration::from_secs(5),
        page_size: 5,
        ..Default::default()
    };

    let store = Storefront::with_parts(
        options,
        storage.clone(),
        clock.clone(),
        dispatch.clone(),
        transport.clone(),
    )
    .unwrap();

    let navigations = Arc::new(Counter::default());
    store.on_logout(navigations.clone());

    Harness {
        store,
        dispatch,
        transport,
        storage,
        clock,
        navigations,
    }
}

async fn login_as(h: &Harness, role: &str) {
    let token = token_for(json!({"sub": "3", "role": role, "exp": 5_000}));
    h.dispatch.reply(200, json!({"token": token, "user_id": 3}));
    h.store.login("alice", "secret").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn login_routes_by_role_and_opens_channel() {
    let h = harness();
    assert_eq!(h.store.landing(), Landing::Login);

    let token = token_for(json!({"sub": "1", "role": "admin", "exp": 5_000}));
    h.dispatch.reply(200, json!({"token": token, "user_id": 1}));
    let landing = h.store.login("root", "secret").await.unwrap();
    assert_eq!(landing, Landing::AdminDashboard);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.store.channel_state(), ChannelState::Connected);
    assert_eq!(h.transport.tokens(), vec![token]);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_orders_call_logs_out_once_and_keeps_orders() {
    let h = harness();
    login_as(&h, "admin").await;

    h.dispatch.reply(200, json!({"orders": [order_json(1), order_json(2)], "pages": 2}));
    assert!(h.store.load_orders(1).await.unwrap());
    let before = h.store.view().orders();

    h.dispatch.reply(401, json!({"msg": "Token has been revoked"}));
    let err = h.store.handle_page_change(2).await.unwrap_err();
    assert!(matches!(err, StorefrontError::Unauthenticated));

    assert_eq!(h.storage.load().unwrap(), None);
    assert_eq!(h.navigations.get(), 1);
    assert_eq!(h.store.landing(), Landing::Login);
    assert_eq!(h.store.channel_state(), ChannelState::Disconnected);

    // The failed call itself applied nothing; the logout hook then cleared the view.
    assert_eq!(before.len(), 2);
    assert!(h.store.view().orders().is_empty());

    // Further calls fail fast without navigating again.
    assert!(matches!(h.store.refresh_cart().await, Err(StorefrontError::Unauthenticated)));
    assert_eq!(h.navigations.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn expiry_mid_session_logs_out() {
    let h = harness();
    login_as(&h, "user").await;

    h.clock.set(5_000);
    let err = h.store.refresh_cart().await.unwrap_err();
    assert!(matches!(err, StorefrontError::Unauthenticated));
    assert_eq!(h.navigations.get(), 1);
    // Only the login request reached the network.
    assert_eq!(h.dispatch.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn page_change_guard_skips_network() {
    let h = harness();
    login_as(&h, "user").await;

    h.dispatch.reply(200, json!({"orders": [order_json(1)], "total": 6, "pages": 2}));
    h.store.load_orders(1).await.unwrap();
    let calls = h.dispatch.sent().len();

    assert!(!h.store.handle_page_change(0).await.unwrap());
    assert!(!h.store.handle_page_change(3).await.unwrap());
    assert_eq!(h.dispatch.sent().len(), calls);

    h.dispatch.reply(200, json!({"orders": [order_json(6)], "total": 6, "pages": 2}));
    assert!(h.store.handle_page_change(2).await.unwrap());
    let sent = h.dispatch.sent();
    assert_eq!(sent.last().unwrap().url, "http://shop.test/api/orders/my");
    assert_eq!(h.store.view().cursor(Listing::Orders).page, 2);
    assert_eq!(h.store.view().orders()[0].order_id, 6);
}

#[tokio::test(start_paused = true)]
async fn admin_acknowledgements_replace_records() {
    let h = harness();
    login_as(&h, "admin").await;

    h.dispatch.reply(200, json!({"orders": [order_json(1), order_json(2)], "pages": 1}));
    h.store.load_orders(1).await.unwrap();

    let mut confirmed = order_json(2);
    confirmed["is_confirmed"] = json!(true);
    h.dispatch.reply(200, json!({"message": "ok", "order": confirmed}));
    h.store.confirm_order(2).await.unwrap();
    assert!(h.store.view().orders()[1].is_confirmed);

    // A rejected update leaves the record alone.
    h.dispatch.reply(403, json!({"error": "Unauthorized - Admin access required"}));
    let err = h.store.set_order_status(1, OrderStatus::Cancelled).await.unwrap_err();
    assert_eq!(err.user_message("Failed to update order status."), "Unauthorized - Admin access required");
    assert_eq!(h.store.view().orders()[0].status, OrderStatus::Pending);
    assert_eq!(h.navigations.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn cart_flow_and_order_placement() {
    let h = harness();
    login_as(&h, "user").await;

    let item = json!({"id": 1, "service_id": 4, "service_name": "Cleaning", "price": 250.0, "quantity": 1});
    h.dispatch.reply(201, json!({"message": "Item added to cart", "cart_item": item.clone()}));
    h.dispatch.reply(200, json!({"cart": [item]}));
    let cart = h.store.add_to_cart(4, 1, "Westlands").await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(h.store.view().cart().len(), 1);

    h.dispatch.reply(201, json!({"message": "Order placed"}));
    h.dispatch.reply(200, json!({"orders": [order_json(9)], "pages": 1}));
    h.store.place_order().await.unwrap();
    assert!(h.store.view().cart().is_empty());

    let sent = h.dispatch.sent();
    let order_request = &sent[sent.len() - 2];
    assert_eq!(order_request.url, "http://shop.test/api/orders");
    assert_eq!(order_request.body.as_ref().unwrap()["cart_items"][0]["service_id"], json!(4));

    // The listing is reloaded so the new order shows up.
    let reload = sent.last().unwrap();
    assert_eq!(reload.url, "http://shop.test/api/orders/my");
    assert!(reload.query.contains(&("page".to_string(), "1".to_string())));
    assert_eq!(h.store.view().orders().len(), 1);
    assert_eq!(h.store.view().orders()[0].order_id, 9);
    assert!(!h.store.view().is_loading(Listing::Orders));
}

#[tokio::test(start_paused = true)]
async fn rejected_order_keeps_cart() {
    let h = harness();
    login_as(&h, "user").await;
    h.store.view().replace_cart(vec![cart_item(1)]);

    h.dispatch.reply(400, json!({"error": "Cart is empty"}));
    let err = h.store.place_order().await.unwrap_err();
    assert_eq!(err.user_message("Failed to place order."), "Cart is empty");
    assert_eq!(h.store.view().cart().len(), 1);
    // No reload after a failed placement.
    assert_eq!(h.dispatch.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn track_order_sets_tracked_record() {
    let h = harness();
    login_as(&h, "user").await;

    h.dispatch.reply(200, json!({"order": order_json(7)}));
    let order = h.store.track_order(7).await.unwrap();
    assert_eq!(order.order_id, 7);
    assert_eq!(h.store.view().tracked_order().map(|o| o.order_id), Some(7));
    assert_eq!(h.dispatch.sent().last().unwrap().url, "http://shop.test/api/orders/7");

    h.dispatch.reply(200, json!({"message": "no order here"}));
    let err = h.store.track_order(8).await.unwrap_err();
    assert!(matches!(err, StorefrontError::MalformedResponse { .. }));
    assert_eq!(h.store.view().tracked_order().map(|o| o.order_id), Some(7));
}

#[tokio::test(start_paused = true)]
async fn tracked_order_arriving_after_logout_is_dropped() {
    let h = harness();
    login_as(&h, "user").await;

    let release = h.dispatch.hold();
    h.dispatch.reply(200, json!({"order": order_json(7)}));

    let (tracked, _) = tokio::join!(h.store.track_order(7), async {
        tokio::task::yield_now().await;
        h.store.logout();
        release.notify_one();
    });

    assert_eq!(tracked.unwrap().order_id, 7);
    assert_eq!(h.store.view().tracked_order(), None);
}

#[tokio::test(start_paused = true)]
async fn order_placed_across_logout_leaves_view_alone() {
    let h = harness();
    login_as(&h, "user").await;
    h.store.view().replace_cart(vec![cart_item(1)]);

    let release = h.dispatch.hold();
    h.dispatch.reply(201, json!({"message": "Order placed"}));

    let (placed, _) = tokio::join!(h.store.place_order(), async {
        tokio::task::yield_now().await;
        h.store.logout();
        h.store.view().replace_cart(vec![cart_item(2)]);
        release.notify_one();
    });

    assert!(placed.is_ok());
    // The next session's cart is untouched and no reload went out.
    assert_eq!(h.store.view().cart(), vec![cart_item(2)]);
    assert_eq!(h.dispatch.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_load_does_not_unlock_next_session() {
    let h = harness();
    login_as(&h, "user").await;

    let stale_release = h.dispatch.hold();
    h.dispatch.reply(200, json!({"orders": [order_json(1)], "pages": 3}));

    tokio::join!(
        async {
            // Finishes after the next session's load has started.
            assert!(!h.store.load_orders(1).await.unwrap());
        },
        async {
            tokio::task::yield_now().await;
            h.store.logout();
            login_as(&h, "user").await;

            let current_release = h.dispatch.hold();
            h.dispatch.reply(200, json!({"orders": [order_json(2)], "pages": 1}));
            tokio::join!(
                async {
                    assert!(h.store.load_orders(1).await.unwrap());
                },
                async {
                    tokio::task::yield_now().await;
                    stale_release.notify_one();
                    for _ in 0..4 {
                        tokio::task::yield_now().await;
                    }
                    assert!(h.store.view().is_loading(Listing::Orders));
                    assert!(!h.store.load_orders(1).await.unwrap());
                    current_release.notify_one();
                }
            );
        }
    );

    assert!(!h.store.view().is_loading(Listing::Orders));
    assert_eq!(h.store.view().orders()[0].order_id, 2);
}

#[tokio::test(start_paused = true)]
async fn all_categories_load_into_one_page() {
    let h = harness();
    login_as(&h, "user").await;

    h.dispatch.reply(200, json!({"services": [{"id": 1, "name": "Deep clean", "price": 900.0, "category": "cleaning"}], "pages": 4}));
    h.dispatch.reply(200, json!({"services": [{"id": 2, "name": "Pilau", "price": 350.0, "category": "food"}], "pages": 2}));

    assert!(h.store.load_all_services(&["cleaning", "food"], 1).await.unwrap());
    let ids: Vec<_> = h.store.view().services().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(h.store.view().cursor(Listing::Services).total_pages, 1);

    let urls: Vec<_> = h.dispatch.sent().into_iter().skip(1).map(|r| r.url).collect();
    assert_eq!(
        urls,
        vec!["http://shop.test/api/services/cleaning", "http://shop.test/api/services/food"]
    );
}

#[tokio::test(start_paused = true)]
async fn pay_posts_phone_and_amount() {
    let h = harness();
    login_as(&h, "user").await;

    h.dispatch.reply(200, json!({"ResponseCode": "0", "CustomerMessage": "Success. Request accepted"}));
    let reply = h.store.pay("254712345678", 1500.0).await.unwrap();
    assert_eq!(reply["ResponseCode"], json!("0"));

    let sent = h.dispatch.sent();
    let request = sent.last().unwrap();
    assert_eq!(request.url, "http://shop.test/api/mpesa/payment");
    assert_eq!(
        request.body,
        Some(json!({"phone_number": "254712345678", "amount": 1500.0}))
    );

    h.dispatch.reply(400, json!({"error": "Invalid phone number"}));
    let err = h.store.pay("12", 1500.0).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(h.store.session().valid_session().is_some());
}

#[tokio::test(start_paused = true)]
async fn resume_uses_persisted_token() {
    let h = harness();
    h.storage
        .save(&token_for(json!({"sub": "3", "role": "user", "exp": 5_000})))
        .unwrap();

    assert_eq!(h.store.resume().unwrap(), Landing::UserDashboard);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_logout_is_idempotent() {
    let h = harness();
    login_as(&h, "user").await;
    h.store.view().replace_cart(vec![cart_item(1)]);

    h.store.logout();
    h.store.logout();

    assert_eq!(h.navigations.get(), 1);
    assert!(h.store.view().cart().is_empty());
    assert_eq!(h.store.channel_state(), ChannelState::Disconnected);
    assert_eq!(h.storage.load().unwrap(), None);
}
