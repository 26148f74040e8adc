//! Warehouse rules that do not touch the database.
//!
//! Handlers load rows, hand them to these functions, and persist whatever
//! the functions decide.

pub mod audit;
pub mod codes;
pub mod filter;
pub mod metrics;
pub mod posting;
pub mod rates;
pub mod shipping;

pub use audit::{plan_completion, AuditCount, AuditStatus, AuditSummary};
pub use filter::{InventoryFilter, MovementFilter};
pub use posting::{MovementType, PostingError, StagedLine, StockCounters};
pub use shipping::{Carrier, ShippingNotes};
