use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::session::{Session, SessionStore};
use super::{Ack, CartItem, OrderRecord, OrderStatus, Page, ServiceItem};
use crate::debug::{redact, Scope};
use crate::debug_log;
use crate::errors::StorefrontError;

/// Use as the `body` argument of a request that has none.
pub const NO_BODY: Option<&'static Value> = None;

/// A fully built outbound request. The body is an owned snapshot of whatever
/// the caller passed in.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Raw status and body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends requests over the network. Fails only when no response was received.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StorefrontError>;
}

/// `Dispatch` backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestDispatch {
    http: reqwest::Client,
}

impl ReqwestDispatch {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Dispatch for ReqwestDispatch {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StorefrontError> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}

/// Authenticated client for the storefront API.
pub struct ApiClient {
    base_url: String,
    session: Arc<SessionStore>,
    dispatch: Arc<dyn Dispatch>,
    debug: bool,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        session: Arc<SessionStore>,
        dispatch: Arc<dyn Dispatch>,
        debug: bool,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            dispatch,
            debug,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    fn url(&self, endpoint: &str) -> String {
        // Append a / to the endpoint if it does not start with one
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Call an authenticated endpoint and return the JSON body verbatim.
    ///
    /// Without a valid session the logout hook runs and `Unauthenticated` is
    /// returned without touching the network. A 401 response does the same.
    pub async fn request_value<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        query: &[(&str, String)],
    ) -> Result<Value, StorefrontError> {
        let session = match self.session.valid_session() {
            Some(session) => session,
            None => {
                debug_log!(self.debug, Scope::Api, warn, "No valid token. Redirecting to login.");
                self.session.logout();
                return Err(StorefrontError::Unauthenticated);
            }
        };

        let request = self.build(method, endpoint, Some(&session), body, query)?;
        self.execute(request, endpoint, true).await
    }

    /// Typed variant of [`ApiClient::request_value`].
    pub async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        query: &[(&str, String)],
    ) -> Result<T, StorefrontError> {
        let value = self.request_value(method, endpoint, body, query).await?;
        serde_json::from_value(value).map_err(|_| StorefrontError::MalformedResponse {
            endpoint: endpoint.to_string(),
            field: "<body>".to_string(),
        })
    }

    /// Call an endpoint that needs no session (login, password reset).
    async fn anonymous(&self, endpoint: &str, body: &Value) -> Result<Value, StorefrontError> {
        let request = self.build(Method::POST, endpoint, None, Some(body), &[])?;
        self.execute(request, endpoint, false).await
    }

    fn build<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        session: Option<&Session>,
        body: Option<&B>,
        query: &[(&str, String)],
    ) -> Result<HttpRequest, StorefrontError> {
        // Snapshot the body now so nothing the caller does later reaches the wire.
        let body = match body {
            Some(body) if method != Method::GET => Some(serde_json::to_value(body).map_err(|e| {
                StorefrontError::Config(format!("request body for {} is not JSON: {}", endpoint, e))
            })?),
            _ => None,
        };

        Ok(HttpRequest {
            method,
            url: self.url(endpoint),
            bearer: session.map(|s| s.token.clone()),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body,
        })
    }

    async fn execute(
        &self,
        request: HttpRequest,
        endpoint: &str,
        authenticated: bool,
    ) -> Result<Value, StorefrontError> {
        debug_log!(
            self.debug,
            Scope::Api,
            "{} {} (token {})",
            request.method,
            endpoint,
            request.bearer.as_deref().map(redact).unwrap_or_else(|| "none".to_string())
        );

        let response = match self.dispatch.send(request).await {
            Ok(response) => response,
            Err(err) => {
                debug_log!(self.debug, Scope::Api, error, "Error fetching {}: {}", endpoint, err);
                return Err(err);
            }
        };

        let body: Value = if response.body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&response.body) {
                Ok(value) => value,
                Err(_) if (200..300).contains(&response.status) => {
                    return Err(StorefrontError::MalformedResponse {
                        endpoint: endpoint.to_string(),
                        field: "<body>".to_string(),
                    })
                }
                Err(_) => Value::Null,
            }
        };

        if (200..300).contains(&response.status) {
            return Ok(body);
        }

        let status = response.status;
        let message = server_message(&body)
            .unwrap_or_else(|| format!("request failed with status {}", status));

        match status {
            401 if authenticated => {
                debug_log!(self.debug, Scope::Api, warn, "Unauthorized. Logging out due to 401 response.");
                self.session.logout();
                return Err(StorefrontError::Unauthenticated);
            }
            415 => debug_log!(
                self.debug,
                Scope::Api,
                warn,
                "Unsupported Media Type on {}. Expected 'application/json'.",
                endpoint
            ),
            422 => debug_log!(
                self.debug,
                Scope::Api,
                warn,
                "Unprocessable Entity on {}: {}",
                endpoint,
                message
            ),
            500..=599 => debug_log!(
                self.debug,
                Scope::Api,
                error,
                "Server error ({}) on {}: {}",
                status,
                endpoint,
                message
            ),
            _ => debug_log!(self.debug, Scope::Api, warn, "{} returned {}: {}", endpoint, status, message),
        }

        Err(StorefrontError::ServerRejected { status, message })
    }

    /// Log in and establish the session from the returned token.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, StorefrontError> {
        let body = self
            .anonymous("login", &json!({ "username": username, "password": password }))
            .await?;
        let token: String = field("login", &body, "token")?;
        self.session.establish(&token)
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Ack, StorefrontError> {
        let body = self.anonymous("forgot-password", &json!({ "email": email })).await?;
        ack("forgot-password", &body)
    }

    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> Result<Ack, StorefrontError> {
        let body = self
            .anonymous(
                "reset-password",
                &json!({ "token": reset_token, "new_password": new_password }),
            )
            .await?;
        ack("reset-password", &body)
    }

    pub async fn cart(&self) -> Result<Vec<CartItem>, StorefrontError> {
        let body = self.request_value(Method::GET, "cart", NO_BODY, &[]).await?;
        field("cart", &body, "cart")
    }

    pub async fn add_to_cart(
        &self,
        service_id: u64,
        quantity: u32,
        location: &str,
    ) -> Result<CartItem, StorefrontError> {
        let payload = json!({ "service_id": service_id, "quantity": quantity, "location": location });
        let body = self
            .request_value(Method::POST, "cart", Some(&payload), &[])
            .await?;
        field("cart", &body, "cart_item")
    }

    pub async fn remove_cart_item(&self, cart_item_id: u64) -> Result<Ack, StorefrontError> {
        let endpoint = format!("cart/{}", cart_item_id);
        let body = self
            .request_value(Method::DELETE, &endpoint, NO_BODY, &[])
            .await?;
        ack(&endpoint, &body)
    }

    /// All orders for admins, the caller's own otherwise (server decides).
    pub async fn orders(&self, page: u32, per_page: u32) -> Result<Page<OrderRecord>, StorefrontError> {
        self.order_page("orders", page, per_page).await
    }

    pub async fn my_orders(&self, page: u32, per_page: u32) -> Result<Page<OrderRecord>, StorefrontError> {
        self.order_page("orders/my", page, per_page).await
    }

    async fn order_page(
        &self,
        endpoint: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<OrderRecord>, StorefrontError> {
        let body = self
            .request_value(Method::GET, endpoint, NO_BODY, &paging(page, per_page))
            .await?;
        Ok(Page {
            items: field(endpoint, &body, "orders")?,
            page,
            total_pages: pages(&body),
        })
    }

    pub async fn order(&self, order_id: u64) -> Result<OrderRecord, StorefrontError> {
        let endpoint = format!("orders/{}", order_id);
        let body = self.request_value(Method::GET, &endpoint, NO_BODY, &[]).await?;
        field(&endpoint, &body, "order")
    }

    pub async fn place_order(&self, cart: &[CartItem]) -> Result<Value, StorefrontError> {
        let payload = json!({ "cart_items": cart });
        self.request_value(Method::POST, "orders", Some(&payload), &[])
            .await
    }

    pub async fn update_order_status(
        &self,
        order_id: u64,
        status: OrderStatus,
    ) -> Result<OrderRecord, StorefrontError> {
        let endpoint = format!("orders/{}", order_id);
        let payload = json!({ "status": status });
        let body = self
            .request_value(Method::PATCH, &endpoint, Some(&payload), &[])
            .await?;
        field(&endpoint, &body, "order")
    }

    pub async fn confirm_order(&self, order_id: u64) -> Result<OrderRecord, StorefrontError> {
        let endpoint = format!("orders/{}/confirm", order_id);
        let body = self
            .request_value(Method::PATCH, &endpoint, NO_BODY, &[])
            .await?;
        field(&endpoint, &body, "order")
    }

    pub async fn process_payment(&self, order_id: u64) -> Result<OrderRecord, StorefrontError> {
        let endpoint = format!("orders/{}/process-payment", order_id);
        let body = self
            .request_value(Method::PATCH, &endpoint, NO_BODY, &[])
            .await?;
        field(&endpoint, &body, "order")
    }

    pub async fn services(
        &self,
        category: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<ServiceItem>, StorefrontError> {
        let endpoint = format!("services/{}", category);
        let body = self
            .request_value(Method::GET, &endpoint, NO_BODY, &paging(page, per_page))
            .await?;
        Ok(Page {
            items: field(&endpoint, &body, "services")?,
            page,
            total_pages: pages(&body),
        })
    }

    /// Start an M-Pesa STK push for the caller's cart. Returns the gateway's reply.
    pub async fn mpesa_payment(&self, phone_number: &str, amount: f64) -> Result<Value, StorefrontError> {
        let payload = json!({ "phone_number": phone_number, "amount": amount });
        self.request_value(Method::POST, "mpesa/payment", Some(&payload), &[])
            .await
    }
}

/// Extract a required field, or fail with `MalformedResponse`.
fn field<T: DeserializeOwned>(endpoint: &str, body: &Value, name: &str) -> Result<T, StorefrontError> {
    body.get(name)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or_else(|| StorefrontError::MalformedResponse {
            endpoint: endpoint.to_string(),
            field: name.to_string(),
        })
}

fn ack(endpoint: &str, body: &Value) -> Result<Ack, StorefrontError> {
    Ok(Ack {
        message: field(endpoint, body, "message")?,
    })
}

fn pages(body: &Value) -> u32 {
    body.get("pages")
        .and_then(Value::as_u64)
        .map(|p| p.clamp(1, u32::MAX as u64) as u32)
        .unwrap_or(1)
}

fn paging(page: u32, per_page: u32) -> [(&'static str, String); 2] {
    [("page", page.to_string()), ("per_page", per_page.to_string())]
}

/// The server's error text: `error` as a string, or rendered as JSON when it is
/// a validation map. JWT middleware errors arrive as `msg`.
fn server_message(body: &Value) -> Option<String> {
    match body.get("error").or_else(|| body.get("msg"))? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
