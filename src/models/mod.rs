pub mod audit;
pub mod customer;
pub mod inventory;
pub mod product;
pub mod rate;
pub mod user;

pub use audit::{Audit, AuditDisplay, AuditItem, AuditLine, AuditResultDisplay};
pub use customer::{Customer, CustomerDisplay, CustomerDocument, CustomerOption};
pub use inventory::{Attachment, InventoryItem, InventoryItemDisplay, Movement, MovementDisplay};
pub use product::{Product, ProductCategory, ProductDisplay, ProductImage, ProductOption};
pub use rate::{StorageRate, StorageRateDisplay};
pub use user::User;
