//! Cart commands.
//!
//! Every mutation is applied to the local cart first and then pushed to the
//! API unless `--local` is given. Pushes made while the API is unreachable
//! land in the offline queue.

use std::str::FromStr;

use basket_client::ClientContext;
use basket_client::cart::{CartCommand, NewLineItem, SyncOutcome, Variant};
use basket_core::{LineItemId, Price, ProductId, VariantId};
use rust_decimal::Decimal;

use crate::error::CommandError;

/// Log every line item and the cart totals.
pub fn list(ctx: &ClientContext) {
    let state = ctx.cart().state();
    if state.is_empty() {
        tracing::info!("Cart is empty");
        return;
    }

    for item in state.items() {
        let variant = item
            .variant
            .as_ref()
            .map(|v| format!(" ({}: {})", v.name, v.value))
            .unwrap_or_default();
        tracing::info!(
            id = %item.id,
            product_id = %item.product_id,
            "{} x{}{} @ {} = {}",
            item.name,
            item.quantity,
            variant,
            item.price,
            item.line_total()
        );
    }
    tracing::info!(items = state.item_count(), "Total: {}", state.total());
}

/// Build a line item from command-line arguments.
///
/// # Errors
///
/// Returns `CommandError` for a malformed or negative price or a malformed
/// variant.
pub fn new_item(
    product: &str,
    name: &str,
    price: &str,
    quantity: u32,
    image: String,
    variant: Option<&str>,
) -> Result<NewLineItem, CommandError> {
    Ok(NewLineItem {
        product_id: ProductId::new(product),
        name: name.to_string(),
        price: parse_price(price)?,
        quantity,
        image,
        variant: variant.map(parse_variant).transpose()?,
    })
}

/// Add an item.
pub async fn add(
    ctx: &ClientContext,
    item: NewLineItem,
    local: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    submit(ctx, CartCommand::add(item), local).await
}

/// Remove a line item.
pub async fn remove(ctx: &ClientContext, id: &str, local: bool) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_line_id(id)?;
    submit(ctx, CartCommand::RemoveItem { id }, local).await
}

/// Set a line item's quantity.
pub async fn update(
    ctx: &ClientContext,
    id: &str,
    quantity: i64,
    local: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_line_id(id)?;
    submit(ctx, CartCommand::UpdateQuantity { id, quantity }, local).await
}

/// Empty the cart.
pub async fn clear(ctx: &ClientContext, local: bool) -> Result<(), Box<dyn std::error::Error>> {
    submit(ctx, CartCommand::Clear, local).await
}

async fn submit(
    ctx: &ClientContext,
    command: CartCommand,
    local: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !ctx.cart().apply(command.clone()) {
        tracing::info!("Nothing changed, not pushing");
        return Ok(());
    }
    tracing::info!(
        items = ctx.cart().item_count(),
        total = %ctx.cart().total(),
        "Cart updated"
    );

    if local {
        return Ok(());
    }

    match ctx.cart_sync().push(&command).await? {
        SyncOutcome::Synced => tracing::info!("Synced with the API"),
        SyncOutcome::Queued(id) => tracing::warn!(operation_id = %id, "API unreachable, queued for replay"),
    }
    Ok(())
}

fn parse_price(s: &str) -> Result<Price, CommandError> {
    let amount = Decimal::from_str(s.trim()).map_err(|_| CommandError::Price(s.to_string()))?;
    Ok(Price::new(amount)?)
}

fn parse_line_id(s: &str) -> Result<LineItemId, CommandError> {
    LineItemId::from_str(s.trim()).map_err(|_| CommandError::LineItemId(s.to_string()))
}

/// Parse `id:name:value`.
fn parse_variant(s: &str) -> Result<Variant, CommandError> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(name), Some(value)) if !id.is_empty() && !name.is_empty() => Ok(Variant {
            id: VariantId::new(id),
            name: name.to_string(),
            value: value.to_string(),
        }),
        _ => Err(CommandError::Variant(s.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_parses_price_and_variant() {
        let item = new_item("prod-shirt", "Shirt", "25.50", 2, String::new(), Some("var-l:Size:L")).unwrap();

        assert_eq!(item.price, Price::from_cents(2550));
        assert_eq!(item.quantity, 2);
        let variant = item.variant.unwrap();
        assert_eq!(variant.id, VariantId::new("var-l"));
        assert_eq!(variant.name, "Size");
        assert_eq!(variant.value, "L");
    }

    #[test]
    fn test_variant_value_may_contain_colons() {
        let variant = parse_variant("v1:Time:10:30").unwrap();
        assert_eq!(variant.value, "10:30");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(parse_price("abc"), Err(CommandError::Price(_))));
        assert!(matches!(parse_price("-1.00"), Err(CommandError::NegativePrice(_))));
        assert!(matches!(parse_variant("var-l:Size"), Err(CommandError::Variant(_))));
        assert!(matches!(parse_line_id("not-a-uuid"), Err(CommandError::LineItemId(_))));
    }

    fn offline_config(dir: &std::path::Path) -> basket_client::ClientConfig {
        let mut config = basket_client::ClientConfig::new("http://127.0.0.1:9/api", dir).unwrap();
        config.http_timeout = std::time::Duration::from_secs(2);
        config.sync.interval = std::time::Duration::from_secs(3600);
        config.refresh.interval = std::time::Duration::from_secs(3600);
        config
    }

    #[tokio::test]
    async fn test_noop_mutation_is_not_pushed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ClientContext::start(offline_config(dir.path())).await.unwrap();

        remove(&ctx, &LineItemId::generate().to_string(), false).await.unwrap();
        clear(&ctx, false).await.unwrap();
        assert!(ctx.sync().pending().await.unwrap().is_empty());

        let item = new_item("prod-mug", "Mug", "9.99", 1, String::new(), None).unwrap();
        add(&ctx, item, false).await.unwrap();
        assert_eq!(ctx.sync().pending().await.unwrap().len(), 1);

        ctx.shutdown().await;
    }
}
