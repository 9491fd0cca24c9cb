//! Collaborator traits and in-memory implementations.
//!
//! Each collaborator returns an explicit [`ServiceError`](crate::ServiceError)
//! kind so the orchestrator can pattern-match transient and fatal failures.

pub mod catalog;
pub mod gateway;
pub mod identity;
pub mod notification;

pub use catalog::{CatalogClient, CourseSnapshot, InMemoryCatalogClient};
pub use gateway::{
    CreateOrderRequest, InMemoryPaymentGateway, OrderLine, PaymentGateway, ProcessorOrder,
};
pub use identity::{IdentityClient, InMemoryIdentityClient, UserProfile};
pub use notification::{InMemoryNotificationClient, Notification, NotificationClient, PaymentReceipt};
