//! Razorpay orders API adapter.
//!
//! The buyer and the per-course prices travel with the order as `notes`, so
//! a later lookup can confirm what was actually charged for each course.

use std::collections::HashMap;

use async_trait::async_trait;
use checkout::{CreateOrderRequest, OrderLine, PaymentGateway, ProcessorOrder, ServiceError};
use common::{CourseId, Money, OrderId, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{send_json, status_error};

const NOTE_USER: &str = "user_id";
const NOTE_COURSES_PREFIX: &str = "courses_";
/// Razorpay caps each note value at 256 characters and an order at 15 notes.
const MAX_NOTE_LEN: usize = 256;
const MAX_NOTES: usize = 15;

/// Razorpay API credentials.
#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    key_id: String,
    key_secret: SecretString,
    base_url: String,
}

impl RazorpayConfig {
    pub fn new(key_id: impl Into<String>, key_secret: SecretString) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret,
            base_url: "https://api.razorpay.com".to_string(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Serialize)]
struct RazorpayOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
    // Razorpay returns `[]` instead of `{}` for orders without notes.
    #[serde(default, deserialize_with = "notes_map")]
    notes: HashMap<String, String>,
}

fn notes_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Notes {
        Map(HashMap<String, String>),
        Empty(Vec<serde::de::IgnoredAny>),
    }

    Ok(match Notes::deserialize(deserializer)? {
        Notes::Map(map) => map,
        Notes::Empty(_) => HashMap::new(),
    })
}

/// Builds the order notes: the buyer under `user_id`, and the lines as
/// `course:price,course:price` (minor units) packed into `courses_0`,
/// `courses_1`, ... so no value outgrows the processor's limit.
///
/// A cart needing more notes than an order can carry is `Rejected`.
pub fn encode_notes(
    user_id: &UserId,
    lines: &[OrderLine],
) -> Result<HashMap<String, String>, ServiceError> {
    let mut chunks: Vec<String> = Vec::new();
    for line in lines {
        let entry = format!("{}:{}", line.course_id, line.price.minor());
        match chunks.last_mut() {
            Some(chunk) if chunk.len() + 1 + entry.len() <= MAX_NOTE_LEN => {
                chunk.push(',');
                chunk.push_str(&entry);
            }
            _ => chunks.push(entry),
        }
    }

    if chunks.len() + 1 > MAX_NOTES {
        return Err(ServiceError::Rejected(format!(
            "{} courses do not fit in one order",
            lines.len()
        )));
    }

    let mut notes = HashMap::with_capacity(chunks.len() + 1);
    notes.insert(NOTE_USER.to_string(), user_id.to_string());
    for (i, chunk) in chunks.into_iter().enumerate() {
        notes.insert(format!("{NOTE_COURSES_PREFIX}{i}"), chunk);
    }
    Ok(notes)
}

/// Reassembles the lines written by [`encode_notes`]; `None` if there are
/// none or any entry is malformed.
pub fn decode_notes(notes: &HashMap<String, String>) -> Option<Vec<OrderLine>> {
    let mut lines = Vec::new();
    for chunk in (0..).map_while(|i| notes.get(&format!("{NOTE_COURSES_PREFIX}{i}"))) {
        lines.extend(decode_lines(chunk)?);
    }
    (!lines.is_empty()).then_some(lines)
}

/// Decodes one `course:price,...` note value.
fn decode_lines(encoded: &str) -> Option<Vec<OrderLine>> {
    if encoded.is_empty() {
        return Some(Vec::new());
    }
    encoded
        .split(',')
        .map(|entry| {
            let (course, price) = entry.rsplit_once(':')?;
            Some(OrderLine {
                course_id: CourseId::parse(course).ok()?,
                price: Money::from_minor(price.parse().ok()?),
            })
        })
        .collect()
}

impl RazorpayOrder {
    fn into_processor_order(self) -> Result<ProcessorOrder, ServiceError> {
        let foreign = || ServiceError::NotFound(format!("order {} carries no checkout notes", self.id));
        let user_id = self
            .notes
            .get(NOTE_USER)
            .and_then(|u| UserId::parse(u.as_str()).ok())
            .ok_or_else(foreign)?;
        let lines = decode_notes(&self.notes).ok_or_else(foreign)?;
        let order_id = OrderId::parse(self.id.as_str())
            .map_err(|e| ServiceError::Unavailable(format!("unexpected order id: {e}")))?;

        Ok(ProcessorOrder {
            order_id,
            amount: Money::from_minor(self.amount),
            currency: self.currency,
            receipt: self.receipt.unwrap_or_default(),
            user_id,
            lines,
        })
    }
}

/// Payment gateway backed by the Razorpay orders API.
#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    config: RazorpayConfig,
    http_client: reqwest::Client,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.config.base_url, path))
            .basic_auth(&self.config.key_id, Some(self.config.key_secret.expose_secret()))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<ProcessorOrder, ServiceError> {
        let notes = encode_notes(&request.user_id, &request.lines)?;
        let body = RazorpayOrderRequest {
            amount: request.amount.minor(),
            currency: &request.currency,
            receipt: &request.receipt,
            notes,
        };

        let order: RazorpayOrder = send_json(
            self.request(reqwest::Method::POST, "/v1/orders").json(&body),
            "razorpay create order",
        )
        .await?;

        let created = order.into_processor_order()?;
        if created.amount != request.amount {
            return Err(ServiceError::Conflict(format!(
                "order {} created for {} instead of {}",
                created.order_id, created.amount, request.amount
            )));
        }
        Ok(created)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<ProcessorOrder, ServiceError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/orders/{order_id}"))
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("razorpay fetch order: {e}")))?;

        // Razorpay answers unknown ids with 400 BAD_REQUEST_ERROR.
        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(ServiceError::NotFound(format!("order {order_id}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, "razorpay fetch order", &body));
        }

        let order: RazorpayOrder = response
            .json()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("razorpay fetch order: {e}")))?;
        order.into_processor_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(course: &str, price: i64) -> OrderLine {
        OrderLine {
            course_id: CourseId::parse(course).unwrap(),
            price: Money::from_minor(price),
        }
    }

    fn user() -> UserId {
        UserId::parse("u1").unwrap()
    }

    fn mongo_cart(len: usize) -> Vec<OrderLine> {
        (0..len)
            .map(|i| line(&format!("65f1c2a9e4b0{i:012}"), 149_900))
            .collect()
    }

    #[test]
    fn test_lines_survive_notes() {
        let lines = vec![line("course-a", 50_000), line("course_b", 30_000)];
        let notes = encode_notes(&user(), &lines).unwrap();
        assert_eq!(notes["user_id"], "u1");
        assert_eq!(notes["courses_0"], "course-a:50000,course_b:30000");
        assert_eq!(decode_notes(&notes), Some(lines));
    }

    #[test]
    fn test_large_cart_spreads_over_notes() {
        let lines = mongo_cart(30);
        let notes = encode_notes(&user(), &lines).unwrap();

        assert!(notes.len() > 2);
        assert!(notes.len() <= MAX_NOTES);
        assert!(notes.values().all(|v| v.len() <= MAX_NOTE_LEN));
        assert_eq!(decode_notes(&notes), Some(lines));
    }

    #[test]
    fn test_cart_beyond_note_capacity_rejected() {
        let err = encode_notes(&user(), &mongo_cart(200)).unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_malformed_notes_rejected() {
        assert_eq!(decode_lines("course-a"), None);
        assert_eq!(decode_lines("course-a:abc"), None);
        assert_eq!(decode_lines("bad id:100"), None);

        let gap = HashMap::from([("courses_1".to_string(), "c1:100".to_string())]);
        assert_eq!(decode_notes(&gap), None);
    }

    #[test]
    fn test_decode_order_with_notes() {
        let body = r#"{
            "id": "order_EKwxwAgItmmXdp",
            "entity": "order",
            "amount": 80000,
            "amount_paid": 0,
            "currency": "INR",
            "receipt": "rcpt_1",
            "status": "created",
            "notes": {"user_id": "u1", "courses_0": "c1:50000", "courses_1": "c2:30000"}
        }"#;
        let order: RazorpayOrder = serde_json::from_str(body).unwrap();
        let order = order.into_processor_order().unwrap();

        assert_eq!(order.user_id.as_str(), "u1");
        assert_eq!(order.amount, Money::from_minor(80_000));
        assert_eq!(
            order.price_of(&CourseId::parse("c2").unwrap()),
            Some(Money::from_minor(30_000))
        );
    }

    #[test]
    fn test_order_without_notes_is_foreign() {
        let body = r#"{"id": "order_X", "amount": 100, "currency": "INR", "notes": []}"#;
        let order: RazorpayOrder = serde_json::from_str(body).unwrap();
        let err = order.into_processor_order().unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
