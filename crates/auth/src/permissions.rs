use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. `"sales.create"`).
///
/// The wildcard `"*"` grants every permission within the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const SALES_CREATE: Permission = Permission::from_static("sales.create");
    pub const SALES_VOID: Permission = Permission::from_static("sales.void");
    pub const DEBTS_PAY: Permission = Permission::from_static("debts.pay");
    pub const DEBTS_DELETE: Permission = Permission::from_static("debts.delete");
    pub const PURCHASES_CREATE: Permission = Permission::from_static("purchases.create");
    pub const PURCHASES_PAY: Permission = Permission::from_static("purchases.pay");
    pub const PURCHASES_DELETE: Permission = Permission::from_static("purchases.delete");
    pub const STOCK_ADJUST: Permission = Permission::from_static("stock.adjust");
    pub const EXPENSES_CREATE: Permission = Permission::from_static("expenses.create");
    pub const CATALOG_WRITE: Permission = Permission::from_static("catalog.write");
    pub const PARTIES_WRITE: Permission = Permission::from_static("parties.write");
    pub const LEDGER_READ: Permission = Permission::from_static("ledger.read");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
