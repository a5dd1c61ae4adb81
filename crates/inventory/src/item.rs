use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::decimal::{ensure_non_negative, normalize};
use stockledger_core::{DomainError, DomainResult, Entity, ItemId, Money, Quantity};

use crate::costing::weighted_average_cost;

/// What kind of thing an item is.
///
/// Only storable items carry stock. Services (labour, machine hours) may
/// appear in a bill of materials for costing but never move through a
/// warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Storable,
    Service,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Storable => "STORABLE",
            ItemKind::Service => "SERVICE",
        }
    }

    pub fn is_stock_tracked(&self) -> bool {
        matches!(self, ItemKind::Storable)
    }
}

impl core::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ItemKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STORABLE" => Ok(ItemKind::Storable),
            "SERVICE" => Ok(ItemKind::Service),
            other => Err(DomainError::invalid_input(format!(
                "unknown item kind: {other}"
            ))),
        }
    }
}

/// An item in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    pub cost_price: Money,
    pub sale_price: Money,
    pub average_cost: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub kind: ItemKind,
    pub cost_price: Money,
    pub sale_price: Money,
}

impl NewItem {
    pub fn storable(name: impl Into<String>, cost_price: Money) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Storable,
            cost_price,
            sale_price: Decimal::ZERO,
        }
    }

    pub fn service(name: impl Into<String>, cost_price: Money) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Service,
            cost_price,
            sale_price: Decimal::ZERO,
        }
    }

    pub fn with_sale_price(mut self, sale_price: Money) -> Self {
        self.sale_price = sale_price;
        self
    }
}

/// Partial update of an item. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub cost_price: Option<Money>,
    pub sale_price: Option<Money>,
    pub is_active: Option<bool>,
}

impl Item {
    /// Validate and build a new item. The average cost starts at the cost price.
    pub fn create(id: ItemId, input: NewItem, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = validate_name(&input.name)?;
        ensure_non_negative(input.cost_price, "cost_price")?;
        ensure_non_negative(input.sale_price, "sale_price")?;

        Ok(Self {
            id,
            name,
            kind: input.kind,
            cost_price: normalize(input.cost_price),
            sale_price: normalize(input.sale_price),
            average_cost: normalize(input.cost_price),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, update: ItemUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = &update.name {
            self.name = validate_name(name)?;
        }
        if let Some(cost_price) = update.cost_price {
            ensure_non_negative(cost_price, "cost_price")?;
            self.cost_price = normalize(cost_price);
        }
        if let Some(sale_price) = update.sale_price {
            ensure_non_negative(sale_price, "sale_price")?;
            self.sale_price = normalize(sale_price);
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::inactive("item", self.id));
        }
        Ok(())
    }

    /// Only storable items can be moved in and out of a warehouse.
    pub fn ensure_stock_tracked(&self) -> DomainResult<()> {
        if !self.kind.is_stock_tracked() {
            return Err(DomainError::invalid_input(format!(
                "item {} is a service and does not carry stock",
                self.id
            )));
        }
        Ok(())
    }

    /// Recompute `average_cost` for an inbound batch.
    ///
    /// `on_hand_before` is the item's total quantity across every location
    /// before the batch.
    pub fn receive_at_price(
        &mut self,
        on_hand_before: Quantity,
        incoming: Quantity,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> DomainResult<Money> {
        let blended =
            weighted_average_cost(on_hand_before, self.average_cost, incoming, unit_price)?;
        self.average_cost = blended;
        self.updated_at = now;
        Ok(blended)
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid_input("name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn widget() -> Item {
        Item::create(
            ItemId::new(),
            NewItem::storable("Widget", dec!(10)).with_sale_price(dec!(15)),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn create_seeds_average_cost_from_cost_price() {
        let item = widget();
        assert_eq!(item.average_cost, dec!(10));
        assert!(item.is_active);
        assert_eq!(item.kind, ItemKind::Storable);
    }

    #[test]
    fn create_rejects_blank_name_and_negative_prices() {
        let now = Utc::now();
        assert!(Item::create(ItemId::new(), NewItem::storable("  ", dec!(1)), now).is_err());
        assert!(Item::create(ItemId::new(), NewItem::storable("x", dec!(-1)), now).is_err());
        assert!(
            Item::create(
                ItemId::new(),
                NewItem::storable("x", dec!(1)).with_sale_price(dec!(-2)),
                now
            )
            .is_err()
        );
    }

    #[test]
    fn services_are_not_stock_tracked() {
        let labour =
            Item::create(ItemId::new(), NewItem::service("Labour", dec!(25)), Utc::now()).unwrap();
        let err = labour.ensure_stock_tracked().unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
        assert!(widget().ensure_stock_tracked().is_ok());
    }

    #[test]
    fn update_applies_only_given_fields() {
        let mut item = widget();
        item.apply_update(
            ItemUpdate {
                sale_price: Some(dec!(20)),
                is_active: Some(false),
                ..ItemUpdate::default()
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(item.name, "Widget");
        assert_eq!(item.sale_price, dec!(20));
        assert!(matches!(
            item.ensure_active(),
            Err(DomainError::Inactive { resource: "item", .. })
        ));
    }

    #[test]
    fn receive_at_price_blends_average_cost() {
        let mut item = widget();
        let avg = item
            .receive_at_price(dec!(100), dec!(50), dec!(16), Utc::now())
            .unwrap();
        assert_eq!(avg, dec!(12));
        assert_eq!(item.average_cost, dec!(12));
    }

    #[test]
    fn kind_parses_its_own_label() {
        for kind in [ItemKind::Storable, ItemKind::Service] {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), kind);
        }
        assert!("GADGET".parse::<ItemKind>().is_err());
    }
}
