//! Payment gateway trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CourseId, Money, OrderId, PaymentId, UserId};
use secrecy::SecretString;

use crate::error::ServiceError;
use crate::signature::SignatureVerifier;

/// One course and the price charged for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub course_id: CourseId,
    pub price: Money,
}

/// Order creation request sent to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    /// Total in minor currency units.
    pub amount: Money,
    pub currency: String,
    /// Fresh per attempt so retried captures never collide.
    pub receipt: String,
    /// Metadata tying the order to its buyer.
    pub user_id: UserId,
    /// Metadata tying the order to the course set and per-course prices.
    pub lines: Vec<OrderLine>,
}

/// An order as the processor knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOrder {
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
}

impl ProcessorOrder {
    /// Returns the price charged for `course_id`, if the order covers it.
    pub fn price_of(&self, course_id: &CourseId) -> Option<Money> {
        self.lines
            .iter()
            .find(|line| &line.course_id == course_id)
            .map(|line| line.price)
    }
}

/// Trait for the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an order the client can then pay out-of-band.
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<ProcessorOrder, ServiceError>;

    /// Fetches an existing order with its metadata.
    async fn fetch_order(&self, order_id: &OrderId) -> Result<ProcessorOrder, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    orders: HashMap<OrderId, ProcessorOrder>,
    receipts: HashSet<String>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_fetch: bool,
    max_lines: Option<usize>,
}

/// In-memory payment processor for testing.
///
/// [`pay`](Self::pay) plays the client's part: it settles an order and
/// returns the payment id and signature the processor would hand out.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
    signer: SignatureVerifier,
}

impl InMemoryPaymentGateway {
    /// Creates a processor that signs payments with `secret`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            state: Arc::default(),
            signer: SignatureVerifier::new(SecretString::new(secret.into())),
        }
    }

    /// Configures order creation to fail.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures order lookups to fail.
    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.state.write().unwrap().fail_on_fetch = fail;
    }

    /// Refuses orders with more than `max` lines, as a processor with
    /// bounded order metadata would.
    pub fn set_max_lines(&self, max: Option<usize>) {
        self.state.write().unwrap().max_lines = max;
    }

    /// Returns the number of orders created.
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Settles an order, returning `(payment_id, signature)`.
    pub fn pay(&self, order_id: &OrderId) -> Result<(PaymentId, String), ServiceError> {
        let mut state = self.state.write().unwrap();
        if !state.orders.contains_key(order_id) {
            return Err(ServiceError::NotFound(format!("order {order_id}")));
        }
        state.next_id += 1;
        let payment_id = PaymentId::parse(format!("pay_{:06}", state.next_id))
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        let signature = self.signer.sign(order_id, &payment_id);
        Ok((payment_id, signature))
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<ProcessorOrder, ServiceError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(ServiceError::Unavailable("gateway offline".to_string()));
        }
        if let Some(max) = state.max_lines
            && request.lines.len() > max
        {
            return Err(ServiceError::Rejected(format!(
                "order has {} lines, at most {max} allowed",
                request.lines.len()
            )));
        }
        if !state.receipts.insert(request.receipt.clone()) {
            return Err(ServiceError::Conflict(format!(
                "receipt {} already used",
                request.receipt
            )));
        }

        state.next_id += 1;
        let order_id = OrderId::parse(format!("order_{:06}", state.next_id))
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        let order = ProcessorOrder {
            order_id: order_id.clone(),
            amount: request.amount,
            currency: request.currency,
            receipt: request.receipt,
            user_id: request.user_id,
            lines: request.lines,
        };
        state.orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<ProcessorOrder, ServiceError> {
        let state = self.state.read().unwrap();
        if state.fail_on_fetch {
            return Err(ServiceError::Unavailable("gateway offline".to_string()));
        }
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
    }
}
