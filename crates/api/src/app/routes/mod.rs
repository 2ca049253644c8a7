use axum::{
    routing::{get, post},
    Router,
};

pub mod debts;
pub mod inventory;
pub mod ledger;
pub mod parties;
pub mod purchases;
pub mod sales;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/sales", post(sales::record_sale))
        .route("/sales/:id", get(sales::get_sale).delete(sales::void_sale))
        .route(
            "/debts/:id",
            get(debts::get_debt).put(debts::pay_debt).delete(debts::delete_debt),
        )
        .route("/purchases", post(purchases::record_purchase))
        .route(
            "/purchases/:id",
            get(purchases::get_purchase)
                .put(purchases::pay_purchase)
                .delete(purchases::delete_purchase),
        )
        .route("/products", post(inventory::register_product))
        .route("/products/:id", get(inventory::get_product))
        .route("/stock-adjustments", post(inventory::adjust_stock))
        .route("/customers", post(parties::register_customer))
        .route("/customers/:id", get(parties::get_customer))
        .route("/suppliers", post(parties::register_supplier))
        .route("/suppliers/:id", get(parties::get_supplier))
        .route("/expenses", post(ledger::record_expense))
        .route("/cash-positions", get(ledger::cash_positions))
}
