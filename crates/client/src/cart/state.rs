//! Cart line items and the pure reducer over them.

use basket_core::{LineItemId, Price, ProductId, VariantId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Variant selected for a line item, e.g. `Size: L`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    /// Variant reference.
    pub id: VariantId,
    /// Option name, e.g. "Size".
    pub name: String,
    /// Option value, e.g. "L".
    pub value: String,
}

/// One entry in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub id: LineItemId,
    pub product_id: ProductId,
    pub name: String,
    /// Unit price.
    pub price: Price,
    pub quantity: u32,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
}

impl CartLineItem {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price.times(self.quantity)
    }

    fn matches(&self, item: &NewLineItem) -> bool {
        self.product_id == item.product_id
            && self.variant.as_ref().map(|v| &v.id) == item.variant.as_ref().map(|v| &v.id)
    }
}

/// A line item as supplied by the caller, before it is assigned an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub name: String,
    pub price: Price,
    pub quantity: u32,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
}

impl NewLineItem {
    fn into_line(self, id: LineItemId) -> CartLineItem {
        CartLineItem {
            id,
            product_id: self.product_id,
            name: self.name,
            price: self.price,
            quantity: self.quantity,
            image: self.image,
            variant: self.variant,
        }
    }
}

/// A cart mutation.
///
/// Ids for new line items are minted when the command is built, so replaying
/// a recorded command sequence reproduces the same line ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CartCommand {
    /// Add an item, merging into an existing line with the same product and variant.
    AddItem { id: LineItemId, item: NewLineItem },
    /// Remove a line. Unknown ids are ignored.
    RemoveItem { id: LineItemId },
    /// Set a line's quantity. Zero or less removes the line.
    UpdateQuantity { id: LineItemId, quantity: i64 },
    /// Empty the cart.
    Clear,
}

impl CartCommand {
    /// Build an add command with a fresh line id.
    #[must_use]
    pub fn add(item: NewLineItem) -> Self {
        Self::AddItem {
            id: LineItemId::generate(),
            item,
        }
    }

    /// Redirect a command aimed at line `from` to line `to`, where `from`
    /// was merged into `to` on top of `base` units already there.
    ///
    /// Quantities are kept relative to `base`, so removing `from` takes
    /// away only its own units.
    #[must_use]
    pub(crate) fn retarget(self, from: LineItemId, to: LineItemId, base: u32) -> Self {
        let base = i64::from(base);
        match self {
            Self::RemoveItem { id } if id == from => Self::UpdateQuantity { id: to, quantity: base },
            Self::UpdateQuantity { id, quantity } if id == from => Self::UpdateQuantity {
                id: to,
                quantity: base.saturating_add(quantity.max(0)),
            },
            other => other,
        }
    }
}

/// Cart contents in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    items: Vec<CartLineItem>,
}

impl CartState {
    /// Cart holding `items` as loaded.
    #[must_use]
    pub const fn from_items(items: Vec<CartLineItem>) -> Self {
        Self { items }
    }

    /// Line items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    /// Consume the state, returning its items.
    #[must_use]
    pub fn into_items(self) -> Vec<CartLineItem> {
        self.items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Sum of line totals.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartLineItem::line_total).sum()
    }

    /// Find a line by id.
    #[must_use]
    pub fn get(&self, id: LineItemId) -> Option<&CartLineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// The existing line an add of `item` would merge into.
    #[must_use]
    pub fn line_for(&self, item: &NewLineItem) -> Option<&CartLineItem> {
        self.items.iter().find(|line| line.matches(item))
    }

    /// Apply one command. Returns whether anything changed.
    pub fn apply(&mut self, command: CartCommand) -> bool {
        match command {
            CartCommand::AddItem { id, item } => self.add(id, item),
            CartCommand::RemoveItem { id } => self.remove(id),
            CartCommand::UpdateQuantity { id, quantity } if quantity <= 0 => self.remove(id),
            CartCommand::UpdateQuantity { id, quantity } => {
                self.set_quantity(id, u32::try_from(quantity).unwrap_or(u32::MAX))
            }
            CartCommand::Clear => {
                let changed = !self.items.is_empty();
                self.items.clear();
                changed
            }
        }
    }

    fn add(&mut self, id: LineItemId, item: NewLineItem) -> bool {
        if item.quantity == 0 {
            return false;
        }
        if let Some(existing) = self.items.iter_mut().find(|line| line.matches(&item)) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            return true;
        }
        self.items.push(item.into_line(id));
        true
    }

    fn remove(&mut self, id: LineItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    fn set_quantity(&mut self, id: LineItemId, quantity: u32) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) if item.quantity != quantity => {
                item.quantity = quantity;
                true
            }
            _ => false,
        }
    }
}
