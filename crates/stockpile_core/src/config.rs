//! # Storage Layout Configuration
//!
//! TOML-declared store layouts. A layout names each store, picks its kind
//! and sizes it; [`StorageLayout::build`] turns the declaration into live
//! stores. All sizing data lives in config files, never in code.
//!
//! ```toml
//! [[stores]]
//! name = "main_chest"
//! kind = "slotted"
//! handles = 27
//! capacity = 1728
//!
//! [[stores]]
//! name = "boiler"
//! kind = "tank"
//! capacity = { whole = 4, numerator = 0, divisor = 1 }
//! ```

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{StockpileError, StockpileResult};
use crate::fraction::Fraction;
use crate::store::{DynamicStore, SlottedStore, Tank};

/// A declared capacity: a bare whole count for discrete stores, or a
/// fraction table for tanks.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum CapacityDecl {
    /// Whole-unit capacity.
    Whole(u64),
    /// Fractional capacity, tanks only.
    Fractional(Fraction),
}

/// One `[[stores]]` entry.
#[derive(Clone, Debug, Deserialize)]
pub struct StoreDecl {
    /// Unique store name.
    pub name: String,
    /// `"slotted"`, `"dynamic"` or `"tank"`.
    pub kind: String,
    /// Handle count. Required for slotted stores; the starting size for
    /// dynamic stores (default 0); meaningless for tanks.
    #[serde(default)]
    pub handles: Option<usize>,
    /// Capacity bound. Omitting it on a tank declares it unbounded.
    #[serde(default)]
    pub capacity: Option<CapacityDecl>,
}

/// A parsed storage layout.
#[derive(Clone, Debug, Deserialize)]
pub struct StorageLayout {
    /// The declared stores, in file order.
    #[serde(default)]
    pub stores: Vec<StoreDecl>,
}

/// A store constructed from a [`StoreDecl`].
#[derive(Debug)]
pub enum BuiltStore {
    /// Fixed-handle discrete store.
    Slotted(SlottedStore),
    /// Growing discrete store.
    Dynamic(DynamicStore),
    /// Bulk fractional store.
    Tank(Tank),
}

impl StorageLayout {
    /// Parses a layout from TOML text.
    ///
    /// # Errors
    ///
    /// [`StockpileError::InvalidConfig`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> StockpileResult<Self> {
        toml::from_str(text).map_err(|e| StockpileError::invalid_config(e.to_string()))
    }

    /// Constructs every declared store, in declaration order.
    ///
    /// # Errors
    ///
    /// [`StockpileError::InvalidConfig`] on duplicate names, unknown
    /// kinds, zero capacities or missing required fields.
    pub fn build(&self) -> StockpileResult<Vec<(String, BuiltStore)>> {
        let mut seen = HashSet::new();
        let mut built = Vec::with_capacity(self.stores.len());
        for decl in &self.stores {
            if !seen.insert(decl.name.as_str()) {
                return Err(StockpileError::invalid_config(format!(
                    "duplicate store name '{}'",
                    decl.name
                )));
            }
            built.push((decl.name.clone(), decl.build()?));
        }
        Ok(built)
    }
}

impl StoreDecl {
    fn build(&self) -> StockpileResult<BuiltStore> {
        match self.kind.as_str() {
            "slotted" => {
                let handles = self.require_handles()?;
                Ok(BuiltStore::Slotted(SlottedStore::new(
                    handles,
                    self.whole_capacity()?,
                )))
            }
            "dynamic" => Ok(BuiltStore::Dynamic(DynamicStore::new(
                self.handles.unwrap_or(0),
                self.whole_capacity()?,
            ))),
            "tank" => Ok(BuiltStore::Tank(Tank::new(self.tank_capacity()?))),
            other => Err(StockpileError::invalid_config(format!(
                "store '{}': unknown kind '{other}'",
                self.name
            ))),
        }
    }

    fn require_handles(&self) -> StockpileResult<usize> {
        match self.handles {
            Some(n) if n > 0 => Ok(n),
            _ => Err(StockpileError::invalid_config(format!(
                "store '{}': slotted stores need a positive handle count",
                self.name
            ))),
        }
    }

    fn whole_capacity(&self) -> StockpileResult<u64> {
        match self.capacity {
            Some(CapacityDecl::Whole(n)) if n > 0 => Ok(n),
            Some(CapacityDecl::Whole(_)) => Err(StockpileError::invalid_config(format!(
                "store '{}': capacity must be positive",
                self.name
            ))),
            Some(CapacityDecl::Fractional(_)) => Err(StockpileError::invalid_config(format!(
                "store '{}': discrete stores take a whole capacity",
                self.name
            ))),
            None => Err(StockpileError::invalid_config(format!(
                "store '{}': capacity is required",
                self.name
            ))),
        }
    }

    fn tank_capacity(&self) -> StockpileResult<Fraction> {
        let capacity = match self.capacity {
            Some(CapacityDecl::Whole(n)) => {
                let n = i64::try_from(n).map_err(|_| {
                    StockpileError::invalid_config(format!(
                        "store '{}': capacity too large",
                        self.name
                    ))
                })?;
                Fraction::of_whole(n)
            }
            Some(CapacityDecl::Fractional(f)) => f,
            None => return Ok(Fraction::MAX),
        };
        if capacity.is_zero() || capacity.is_negative() {
            return Err(StockpileError::invalid_config(format!(
                "store '{}': capacity must be positive",
                self.name
            )));
        }
        Ok(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"
        [[stores]]
        name = "main_chest"
        kind = "slotted"
        handles = 27
        capacity = 1728

        [[stores]]
        name = "overflow"
        kind = "dynamic"
        capacity = 512

        [[stores]]
        name = "boiler"
        kind = "tank"
        capacity = { whole = 4, numerator = 1, divisor = 2 }

        [[stores]]
        name = "void_tank"
        kind = "tank"
    "#;

    #[test]
    fn test_layout_builds_declared_stores() {
        let layout = StorageLayout::from_toml_str(LAYOUT).unwrap();
        let built = layout.build().unwrap();
        assert_eq!(built.len(), 4);

        match &built[0] {
            (name, BuiltStore::Slotted(store)) => {
                assert_eq!(name, "main_chest");
                assert_eq!(store.handle_count(), 27);
                assert_eq!(store.capacity(), 1728);
            }
            _ => panic!("expected slotted store"),
        }
        match &built[2] {
            (_, BuiltStore::Tank(tank)) => {
                assert_eq!(tank.capacity(), Fraction::of(4, 1, 2).unwrap());
            }
            _ => panic!("expected tank"),
        }
        match &built[3] {
            (_, BuiltStore::Tank(tank)) => assert!(tank.capacity().is_max()),
            _ => panic!("expected tank"),
        }
    }

    #[test]
    fn test_unknown_kind_is_invalid_config() {
        let layout = StorageLayout::from_toml_str(
            "[[stores]]\nname = \"x\"\nkind = \"barrel\"\ncapacity = 1\n",
        )
        .unwrap();
        assert!(matches!(
            layout.build().unwrap_err(),
            StockpileError::InvalidConfig { .. }
        ));
    }

    #[test]
    fn test_zero_capacity_is_invalid_config() {
        let layout = StorageLayout::from_toml_str(
            "[[stores]]\nname = \"x\"\nkind = \"slotted\"\nhandles = 1\ncapacity = 0\n",
        )
        .unwrap();
        assert!(matches!(
            layout.build().unwrap_err(),
            StockpileError::InvalidConfig { .. }
        ));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let text = "[[stores]]\nname = \"x\"\nkind = \"tank\"\n[[stores]]\nname = \"x\"\nkind = \"tank\"\n";
        let layout = StorageLayout::from_toml_str(text).unwrap();
        assert!(layout.build().is_err());
    }

    #[test]
    fn test_malformed_toml_is_invalid_config() {
        assert!(matches!(
            StorageLayout::from_toml_str("stores = 3").unwrap_err(),
            StockpileError::InvalidConfig { .. }
        ));
    }
}
