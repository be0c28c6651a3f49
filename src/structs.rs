use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod reconciler;
pub mod session;
pub mod view;

fn default_currency() -> String {
    "KES".to_string()
}

/// Role carried in the token's `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Where the host should send the user on start-up or after a session change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Login,
    AdminDashboard,
    UserDashboard,
}

impl From<Option<Role>> for Landing {
    fn from(role: Option<Role>) -> Self {
        match role {
            Some(Role::Admin) => Landing::AdminDashboard,
            Some(Role::User) => Landing::UserDashboard,
            None => Landing::Login,
        }
    }
}

/// Item in the user's cart, as returned by `GET /cart` and pushed by `cart_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: u64,
    pub service_id: u64,
    #[serde(default)]
    pub service_name: String,
    /// Price of one unit of the service.
    #[serde(rename = "price", alias = "unit_price")]
    pub unit_price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub quantity: u32,
    /// Where the service is to be delivered. Empty when not given.
    #[serde(default)]
    pub location: String,
}

impl CartItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// Order lifecycle as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Paid,
    Failed,
}

/// An order. Local copies change only when the server acknowledges a change
/// or pushes the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(rename = "order_id", alias = "id")]
    pub order_id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub service_name: String,
    pub total_price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default)]
    pub is_paid: bool,
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Monotonic version stamp, when the server sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl OrderRecord {
    /// Whether `incoming` may replace `self`. Only a strictly older version is refused;
    /// without stamps on both sides the last applied write wins.
    pub fn superseded_by(&self, incoming: &OrderRecord) -> bool {
        match (self.version, incoming.version) {
            (Some(local), Some(remote)) => remote >= local,
            _ => true,
        }
    }
}

/// Purchasable service, from `GET /services/{category}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceItem {
    pub id: u64,
    pub name: String,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A page of results together with the server's page count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
}

/// Position in a paginated listing. `1 <= page <= total_pages` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub total_pages: u32,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page: 1,
            total_pages: 1,
        }
    }
}

impl PageCursor {
    /// Whether `page` is a valid target for a page change.
    pub fn accepts(&self, page: u32) -> bool {
        page >= 1 && page <= self.total_pages
    }

    /// Record a loaded page. A server reporting zero pages is treated as one.
    pub fn settle(&mut self, page: u32, total_pages: u32) {
        self.total_pages = total_pages.max(1);
        self.page = page.clamp(1, self.total_pages);
    }
}

/// Acknowledgement body (`{"message": ...}`) returned by several endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}
