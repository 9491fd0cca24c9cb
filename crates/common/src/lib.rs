//! Shared value objects for the course checkout service.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CourseId, IdError, OrderId, PaymentId, UserId};
