use futures::future::join_all;
use shared::domain::{Product, ProductId};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{catalog::ProductCatalogApi, error::CatalogError, session::Token, store::Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    pub lines: Vec<CartLine>,
}

impl CartState {
    pub fn line(&self, product_id: &ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| &line.product_id == product_id)
    }

    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.line(product_id).map_or(0, |line| line.quantity)
    }

    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// In-memory shopping cart. Lines are unique by product id and kept in the
/// order they were first added; nothing survives a restart.
#[derive(Default)]
pub struct CartAggregate {
    store: Store<CartState>,
}

impl CartAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_cart(&self, product_id: ProductId) -> CartState {
        self.store.update(|cart| {
            match cart
                .lines
                .iter_mut()
                .find(|line| line.product_id == product_id)
            {
                Some(line) => line.quantity = line.quantity.saturating_add(1),
                None => cart.lines.push(CartLine {
                    product_id,
                    quantity: 1,
                }),
            }
        })
    }

    /// Quantities below one are clamped to one; removing a line goes through
    /// `remove_from_cart`.
    pub fn update_quantity(&self, product_id: &ProductId, quantity: i64) -> CartState {
        let clamped = quantity.clamp(1, i64::from(u32::MAX)) as u32;
        if i64::from(clamped) != quantity {
            debug!(
                product_id = %product_id,
                requested = quantity,
                applied = clamped,
                "cart: clamped quantity"
            );
        }
        self.store.update(|cart| {
            if let Some(line) = cart
                .lines
                .iter_mut()
                .find(|line| &line.product_id == product_id)
            {
                line.quantity = clamped;
            }
        })
    }

    pub fn remove_from_cart(&self, product_id: &ProductId) -> CartState {
        self.store
            .update(|cart| cart.lines.retain(|line| &line.product_id != product_id))
    }

    pub fn clear_cart(&self) -> CartState {
        self.store.update(|cart| cart.lines.clear())
    }

    /// Checkout is not wired to any backend; the cart is left untouched.
    pub fn checkout(&self) -> CartState {
        let cart = self.store.snapshot();
        info!(
            lines = cart.lines.len(),
            units = cart.total_units(),
            "cart: checkout requested (no-op)"
        );
        cart
    }

    pub fn snapshot(&self) -> CartState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartState> {
        self.store.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<CartState> {
        self.store.watch()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product: Product,
    pub quantity: u32,
}

impl PricedLine {
    pub fn subtotal(&self) -> f64 {
        self.product.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartSummary {
    pub lines: Vec<PricedLine>,
    pub unresolved: Vec<(ProductId, CatalogError)>,
    pub total: f64,
}

/// Total over already-resolved products; lines without a product are skipped.
pub fn cart_total(cart: &CartState, products: &[Product]) -> f64 {
    cart.lines
        .iter()
        .filter_map(|line| {
            products
                .iter()
                .find(|product| product.id == line.product_id)
                .map(|product| product.price * f64::from(line.quantity))
        })
        .sum()
}

/// Resolves every line against the catalog concurrently and prices the cart.
pub async fn price_cart(
    cart: &CartState,
    catalog: &dyn ProductCatalogApi,
    token: &Token,
) -> CartSummary {
    let lookups = cart
        .lines
        .iter()
        .map(|line| catalog.get_by_id(token, &line.product_id));
    let results = join_all(lookups).await;

    let mut lines = Vec::with_capacity(cart.lines.len());
    let mut unresolved = Vec::new();
    for (line, result) in cart.lines.iter().zip(results) {
        match result {
            Ok(product) => lines.push(PricedLine {
                product,
                quantity: line.quantity,
            }),
            Err(err) => {
                warn!(product_id = %line.product_id, "cart: failed to resolve product: {err}");
                unresolved.push((line.product_id.clone(), err));
            }
        }
    }
    let total = lines.iter().map(PricedLine::subtotal).sum();
    CartSummary {
        lines,
        unresolved,
        total,
    }
}

#[cfg(test)]
#[path = "tests/cart_tests.rs"]
mod tests;
