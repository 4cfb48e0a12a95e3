//! Domain model
//!
//! Owned data types shared by the stores, the routing scorer, and the
//! dispatch pipeline. Cross-entity references are ids, never pointer graphs;
//! joins happen at the store boundary.

pub mod api_client;
pub mod phone;
pub mod product;
pub mod supplier;
pub mod transaction;
pub mod user;

pub use api_client::ApiClient;
pub use product::{Product, ProductKind, ProductMapping, StockStatus};
pub use supplier::{Supplier, SupplierRequest, SupplierResponse};
pub use transaction::{
    Mutation, MutationKind, MutationRef, ReferenceKind, Transaction, TransactionStats,
    TransactionStatus,
};
pub use user::{User, UserLevel};
