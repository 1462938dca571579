//! # Procura Core Domain Models
//!
//! This module contains the core domain models for the Procura BOM
//! procurement workflow. All models implement serialization with serde;
//! catalog records additionally carry validator rules.
//!
//! ## Key Models
//!
//! - **LineItem**: One BOM row with its match annotations and item status
//! - **MatchCandidate / MatchResult**: Ranked supplier offers for a line item
//! - **CatalogOffer**: A supplier offer joined with its supplier and part
//! - **RunState**: The orchestration record of one BOM run
//! - **ReviewRequest**: Escalation of a line item to an operator
//! - **PoGroup / PoDraft**: Supplier groups and the draft purchase orders built from them

pub mod bom;
pub mod catalog;
pub mod purchase_order;
pub mod review;
pub mod workflow;

#[cfg(test)]
pub mod property_tests;

pub use bom::*;
pub use catalog::*;
pub use purchase_order::*;
pub use review::*;
pub use workflow::*;
