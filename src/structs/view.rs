use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::session::SessionListener;
use super::{CartItem, OrderRecord, Page, PageCursor, ServiceItem};

/// Paginated collections held by the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Orders,
    Services,
}

#[derive(Debug, Default)]
struct ViewData {
    cart: Vec<CartItem>,
    orders: Vec<OrderRecord>,
    services: Vec<ServiceItem>,
    tracked: Option<OrderRecord>,
    orders_cursor: PageCursor,
    services_cursor: PageCursor,
    orders_loading: bool,
    services_loading: bool,
}

impl ViewData {
    fn cursor_mut(&mut self, listing: Listing) -> (&mut PageCursor, &mut bool) {
        match listing {
            Listing::Orders => (&mut self.orders_cursor, &mut self.orders_loading),
            Listing::Services => (&mut self.services_cursor, &mut self.services_loading),
        }
    }
}

/// Locally cached cart and order state. The server copy is authoritative:
/// every write here replaces whole snapshots or whole records.
#[derive(Debug, Default)]
pub struct ViewState {
    data: Mutex<ViewData>,
    /// Bumped by `clear`. Results of calls issued under an older generation are dropped.
    generation: AtomicU64,
}

/// Marks a listing as loading until dropped. A guard from before the last
/// `clear` leaves the flag alone; it belongs to a newer load by then.
pub struct LoadGuard<'a> {
    view: &'a ViewState,
    listing: Listing,
    generation: u64,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut data = self.view.data.lock();
        if self.view.generation() == self.generation {
            *data.cursor_mut(self.listing).1 = false;
        }
    }
}

impl ViewState {
    pub fn cart(&self) -> Vec<CartItem> {
        self.data.lock().cart.clone()
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.data.lock().orders.clone()
    }

    pub fn services(&self) -> Vec<ServiceItem> {
        self.data.lock().services.clone()
    }

    pub fn tracked_order(&self) -> Option<OrderRecord> {
        self.data.lock().tracked.clone()
    }

    pub fn cursor(&self, listing: Listing) -> PageCursor {
        let mut data = self.data.lock();
        *data.cursor_mut(listing).0
    }

    pub fn is_loading(&self, listing: Listing) -> bool {
        let mut data = self.data.lock();
        *data.cursor_mut(listing).1
    }

    /// Replace the cart wholesale.
    pub fn replace_cart(&self, cart: Vec<CartItem>) {
        self.data.lock().cart = cart;
    }

    /// Replace the order with the same id, if the view holds it.
    /// Returns whether anything changed.
    pub fn apply_order(&self, order: OrderRecord) -> bool {
        let mut data = self.data.lock();

        if let Some(tracked) = data.tracked.as_mut() {
            if tracked.order_id == order.order_id && tracked.superseded_by(&order) {
                *tracked = order.clone();
            }
        }

        match data.orders.iter_mut().find(|o| o.order_id == order.order_id) {
            Some(slot) if slot.superseded_by(&order) => {
                *slot = order;
                true
            }
            _ => false,
        }
    }

    pub fn set_tracked(&self, order: OrderRecord) {
        self.data.lock().tracked = Some(order);
    }

    pub fn settle_orders(&self, page: Page<OrderRecord>) {
        let mut data = self.data.lock();
        data.orders = page.items;
        data.orders_cursor.settle(page.page, page.total_pages);
    }

    pub fn settle_services(&self, page: Page<ServiceItem>) {
        let mut data = self.data.lock();
        data.services = page.items;
        data.services_cursor.settle(page.page, page.total_pages);
    }

    /// Start loading `listing` unless a load is already in flight.
    pub fn begin_load(&self, listing: Listing) -> Option<LoadGuard<'_>> {
        let mut data = self.data.lock();
        let loading = data.cursor_mut(listing).1;
        if *loading {
            return None;
        }
        *loading = true;
        Some(LoadGuard {
            view: self,
            listing,
            generation: self.generation(),
        })
    }

    /// Start a page change. `None` when `page` is outside `1..=total_pages`
    /// or a load is already in flight.
    pub fn begin_page_change(&self, listing: Listing, page: u32) -> Option<LoadGuard<'_>> {
        let mut data = self.data.lock();
        let (cursor, loading) = data.cursor_mut(listing);
        if *loading || !cursor.accepts(page) {
            return None;
        }
        *loading = true;
        Some(LoadGuard {
            view: self,
            listing,
            generation: self.generation(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop all session-derived state.
    pub fn clear(&self) {
        let mut data = self.data.lock();
        *data = ViewData::default();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl SessionListener for ViewState {
    fn on_logout(&self) {
        self.clear();
    }
}
