//! Shopping cart with write-through persistence.
//!
//! Mutations are applied synchronously by the [`CartState`] reducer and then
//! handed to a single writer task that mirrors the latest snapshot into the
//! `cart` collection. Rapid mutations are coalesced: the writer waits out the
//! debounce window and saves only the newest snapshot, so storage never moves
//! backwards.
//!
//! At startup the persisted cart is loaded asynchronously. Mutations made
//! before that finishes are shown against a provisional state and replayed
//! on top of the loaded items once hydration completes.

pub(crate) mod state;
pub mod sync;

pub use state::{CartCommand, CartLineItem, CartState, NewLineItem, Variant};
pub use sync::{CartSync, SyncOutcome};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use basket_core::LineItemId;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::persistence::Persistence;

/// Collection holding the cart line items.
pub const CART_COLLECTION: &str = "cart";

/// What subscribers see after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartSnapshot {
    /// Current contents.
    pub state: CartState,
    /// True until the persisted cart has been loaded.
    pub is_loading: bool,
}

/// A numbered snapshot queued for the writer.
#[derive(Debug, Clone, Default)]
struct WriteRequest {
    seq: u64,
    items: Vec<CartLineItem>,
}

/// Cart store handle.
///
/// Cheap to clone; clones share one cart. Must be created inside a tokio
/// runtime.
#[derive(Clone)]
pub struct Cart {
    inner: Arc<CartInner>,
}

struct CartInner {
    core: Mutex<CartCore>,
    published: watch::Sender<CartSnapshot>,
    writes: watch::Sender<WriteRequest>,
    persisted: watch::Receiver<u64>,
    persistence: Persistence,
}

struct CartCore {
    state: CartState,
    hydrated: bool,
    /// Commands issued before hydration, in issuance order.
    buffered: Vec<CartCommand>,
    /// Sequence of the newest snapshot handed to the writer.
    seq: u64,
}

impl Cart {
    /// Create an empty, unhydrated cart and start its writer.
    #[must_use]
    pub fn new(persistence: Persistence, debounce: Duration) -> Self {
        let (published, _) = watch::channel(CartSnapshot {
            state: CartState::default(),
            is_loading: true,
        });
        let (writes, write_rx) = watch::channel(WriteRequest::default());
        let (persisted_tx, persisted) = watch::channel(0);

        tokio::spawn(run_writer(persistence.clone(), debounce, write_rx, persisted_tx));

        Self {
            inner: Arc::new(CartInner {
                core: Mutex::new(CartCore {
                    state: CartState::default(),
                    hydrated: false,
                    buffered: Vec::new(),
                    seq: 0,
                }),
                published,
                writes,
                persisted,
                persistence,
            }),
        }
    }

    /// Create a cart and wait for it to hydrate.
    pub async fn open(persistence: Persistence, debounce: Duration) -> Self {
        let cart = Self::new(persistence, debounce);
        cart.hydrate().await;
        cart
    }

    /// Load the persisted cart and replay anything issued in the meantime.
    ///
    /// Calling this again after hydration is a no-op.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) {
        if !self.is_loading() {
            return;
        }

        let loaded: Vec<CartLineItem> = self.inner.persistence.load_records(CART_COLLECTION).await;
        let loaded_count = loaded.len();

        let mut core = self.lock();
        if core.hydrated {
            return;
        }

        let buffered = std::mem::take(&mut core.buffered);
        let replayed = buffered.len();
        core.state = replay_onto(CartState::from_items(loaded), buffered);
        core.hydrated = true;

        info!(items = loaded_count, replayed, "Cart hydrated");
        if replayed > 0 {
            self.queue_write(&mut core);
        }
        self.publish(&core);
    }

    /// Apply a mutation, returning whether the visible cart changed.
    ///
    /// Before hydration the command is also buffered for replay, even when
    /// it changed nothing provisionally.
    pub fn apply(&self, command: CartCommand) -> bool {
        let mut core = self.lock();
        if !core.hydrated {
            debug!(?command, "Buffering cart mutation until hydrated");
            core.buffered.push(command.clone());
            let changed = core.state.apply(command);
            self.publish(&core);
            return changed;
        }

        let changed = core.state.apply(command);
        if changed {
            self.queue_write(&mut core);
            self.publish(&core);
        }
        changed
    }

    /// Add an item, merging into a matching line.
    pub fn add_item(&self, item: NewLineItem) {
        self.apply(CartCommand::add(item));
    }

    /// Remove a line.
    pub fn remove_item(&self, id: LineItemId) {
        self.apply(CartCommand::RemoveItem { id });
    }

    /// Set a line's quantity; zero or less removes it.
    pub fn update_quantity(&self, id: LineItemId, quantity: i64) {
        self.apply(CartCommand::UpdateQuantity { id, quantity });
    }

    /// Empty the cart, e.g. after checkout.
    pub fn clear(&self) {
        self.apply(CartCommand::Clear);
    }

    /// Snapshot of the current contents.
    #[must_use]
    pub fn state(&self) -> CartState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn items(&self) -> Vec<CartLineItem> {
        self.lock().state.items().to_vec()
    }

    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.lock().state.item_count()
    }

    #[must_use]
    pub fn total(&self) -> Decimal {
        self.lock().state.total()
    }

    /// Whether the persisted cart is still being loaded.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.lock().hydrated
    }

    /// Subscribe to cart changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.published.subscribe()
    }

    /// Wait until every mutation applied so far is persisted.
    pub async fn flush(&self) {
        let target = self.lock().seq;
        if target == 0 {
            return;
        }
        let mut persisted = self.inner.persisted.clone();
        if persisted.wait_for(|seq| *seq >= target).await.is_err() {
            debug!("Cart writer stopped before flush completed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, CartCore> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_write(&self, core: &mut CartCore) {
        core.seq += 1;
        self.inner.writes.send_replace(WriteRequest {
            seq: core.seq,
            items: core.state.items().to_vec(),
        });
    }

    fn publish(&self, core: &CartCore) {
        self.inner.published.send_replace(CartSnapshot {
            state: core.state.clone(),
            is_loading: !core.hydrated,
        });
    }
}

/// Apply commands buffered before hydration on top of the loaded cart.
///
/// A buffered add that merges into a loaded line never creates the line id
/// the provisional view showed, so later commands aimed at that id are
/// redirected to the merged line, on top of the units it already held.
fn replay_onto(mut state: CartState, buffered: Vec<CartCommand>) -> CartState {
    let mut aliases: Vec<(LineItemId, LineItemId, u32)> = Vec::new();
    for command in buffered {
        let command = aliases
            .iter()
            .fold(command, |command, &(from, to, base)| command.retarget(from, to, base));

        if let CartCommand::AddItem { id, item } = &command
            && item.quantity > 0
            && let Some(line) = state.line_for(item)
            && line.id != *id
        {
            aliases.push((*id, line.id, line.quantity));
        }
        state.apply(command);
    }
    state
}

/// Single writer: saves the newest snapshot after each debounce window.
///
/// Exits once every [`Cart`] handle is gone, after saving any snapshot it has
/// not seen yet.
async fn run_writer(
    persistence: Persistence,
    debounce: Duration,
    mut writes: watch::Receiver<WriteRequest>,
    persisted: watch::Sender<u64>,
) {
    while writes.changed().await.is_ok() {
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        let WriteRequest { seq, items } = writes.borrow_and_update().clone();
        persistence.save_records(CART_COLLECTION, &items).await;
        debug!(seq, items = items.len(), "Cart persisted");
        persisted.send_replace(seq);
    }
    debug!("Cart writer stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::state::tests::{mug, shirt};
    use super::*;
    use crate::persistence::{StorageBackend, StorageError};

    /// Backend recording the size of every saved cart.
    #[derive(Default)]
    struct Recording {
        saves: Mutex<Vec<usize>>,
        stored: Mutex<Option<Vec<Value>>>,
    }

    #[async_trait]
    impl StorageBackend for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn save(&self, _: &str, records: &[Value]) -> Result<(), StorageError> {
            self.saves.lock().unwrap().push(records.len());
            *self.stored.lock().unwrap() = Some(records.to_vec());
            Ok(())
        }

        async fn load(&self, _: &str) -> Result<Option<Vec<Value>>, StorageError> {
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn clear(&self, _: &str) -> Result<(), StorageError> {
            *self.stored.lock().unwrap() = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cart_survives_reload() {
        let dir = tempfile::tempdir().unwrap();

        let cart = Cart::open(Persistence::on_disk(dir.path()), Duration::ZERO).await;
        cart.add_item(shirt(2, Some("M")));
        cart.add_item(mug(1));
        cart.flush().await;
        let before = cart.items();
        drop(cart);

        let reloaded = Cart::open(Persistence::on_disk(dir.path()), Duration::ZERO).await;
        let mut after = reloaded.items();
        let mut expected = before;
        after.sort_by_key(|item| item.id);
        expected.sort_by_key(|item| item.id);
        assert_eq!(after, expected);
        assert_eq!(reloaded.item_count(), 3);
    }

    #[tokio::test]
    async fn test_mutations_before_hydration_apply_on_top() {
        let persistence = Persistence::in_memory();
        let seeded = Cart::open(persistence.clone(), Duration::ZERO).await;
        seeded.add_item(mug(1));
        seeded.flush().await;

        let cart = Cart::new(persistence.clone(), Duration::ZERO);
        assert!(cart.is_loading());
        cart.add_item(shirt(1, None));
        cart.add_item(mug(2));
        // Provisional view shows only what was added locally.
        assert_eq!(cart.item_count(), 3);

        cart.hydrate().await;
        assert!(!cart.is_loading());

        let names: Vec<_> = cart.items().into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["Mug", "Linen Shirt"]);
        assert_eq!(cart.item_count(), 4);

        cart.flush().await;
        let persisted: Vec<CartLineItem> = persistence.load_records(CART_COLLECTION).await;
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_update_on_merged_line_keeps_persisted_units() {
        let persistence = Persistence::in_memory();
        let seeded = Cart::open(persistence.clone(), Duration::ZERO).await;
        seeded.add_item(mug(1));
        seeded.flush().await;

        let cart = Cart::new(persistence.clone(), Duration::ZERO);
        cart.add_item(mug(1));
        let provisional = cart.items()[0].id;
        cart.update_quantity(provisional, 5);
        assert_eq!(cart.item_count(), 5);

        cart.hydrate().await;

        let items = cart.items();
        assert_eq!(items.len(), 1);
        assert_ne!(items[0].id, provisional);
        assert_eq!(cart.item_count(), 6);
    }

    #[tokio::test]
    async fn test_remove_on_merged_line_takes_back_only_local_units() {
        let persistence = Persistence::in_memory();
        let seeded = Cart::open(persistence.clone(), Duration::ZERO).await;
        seeded.add_item(mug(2));
        seeded.flush().await;

        let cart = Cart::new(persistence.clone(), Duration::ZERO);
        cart.add_item(mug(3));
        cart.add_item(shirt(1, None));
        let provisional = cart.items()[0].id;
        cart.remove_item(provisional);
        assert_eq!(cart.item_count(), 1);

        cart.hydrate().await;

        let names: Vec<_> = cart.items().into_iter().map(|i| (i.name, i.quantity)).collect();
        assert_eq!(names, [("Mug".to_owned(), 2), ("Linen Shirt".to_owned(), 1)]);
    }

    #[tokio::test]
    async fn test_apply_reports_whether_anything_changed() {
        let cart = Cart::open(Persistence::in_memory(), Duration::ZERO).await;

        assert!(!cart.apply(CartCommand::RemoveItem {
            id: LineItemId::generate()
        }));
        assert!(!cart.apply(CartCommand::Clear));
        assert!(cart.apply(CartCommand::add(mug(1))));
        assert!(cart.apply(CartCommand::Clear));

        let unhydrated = Cart::new(Persistence::in_memory(), Duration::ZERO);
        assert!(!unhydrated.apply(CartCommand::RemoveItem {
            id: LineItemId::generate()
        }));
        assert!(unhydrated.apply(CartCommand::add(mug(1))));
    }

    #[tokio::test]
    async fn test_rapid_mutations_are_coalesced() {
        let backend = Arc::new(Recording::default());
        let persistence = Persistence::new(vec![backend.clone()]);
        let cart = Cart::open(persistence, Duration::from_millis(20)).await;

        cart.add_item(mug(1));
        cart.add_item(shirt(1, None));
        cart.add_item(shirt(1, Some("L")));
        cart.flush().await;

        let saves = backend.saves.lock().unwrap().clone();
        assert_eq!(saves.last(), Some(&3));
        assert!(saves.len() < 3, "expected coalesced writes, got {saves:?}");
    }

    #[tokio::test]
    async fn test_latest_write_wins() {
        let backend = Arc::new(Recording::default());
        let persistence = Persistence::new(vec![backend.clone()]);
        let cart = Cart::open(persistence.clone(), Duration::ZERO).await;

        for _ in 0..10 {
            cart.add_item(mug(1));
            tokio::task::yield_now().await;
        }
        cart.clear();
        cart.add_item(shirt(1, None));
        cart.flush().await;

        let persisted: Vec<CartLineItem> = persistence.load_records(CART_COLLECTION).await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].name, "Linen Shirt");
    }

    #[tokio::test]
    async fn test_noop_mutation_does_not_write() {
        let backend = Arc::new(Recording::default());
        let cart = Cart::open(Persistence::new(vec![backend.clone()]), Duration::ZERO).await;

        cart.remove_item(LineItemId::generate());
        cart.flush().await;

        assert!(backend.saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_loading_then_items() {
        let cart = Cart::new(Persistence::in_memory(), Duration::ZERO);
        let mut rx = cart.subscribe();
        assert!(rx.borrow_and_update().is_loading);

        cart.hydrate().await;
        cart.add_item(mug(2));

        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.state.item_count(), 2);
    }
}
