//! Purchase intents built at capture time.

use std::collections::HashSet;

use common::{CourseId, Money, OrderId, UserId};
use uuid::Uuid;

use crate::error::{CheckoutError, Result};
use crate::services::{CourseSnapshot, OrderLine};

/// Parses and deduplicates caller-supplied course ids, keeping first-seen order.
pub fn parse_course_ids(raw: &[String]) -> Result<Vec<CourseId>> {
    if raw.is_empty() {
        return Err(CheckoutError::InvalidRequest(
            "Please provide at least one course id".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(raw.len());
    for value in raw {
        let id = CourseId::parse(value.as_str())
            .map_err(|e| CheckoutError::InvalidRequest(e.to_string()))?;
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Generates a collision-resistant processor receipt id.
pub fn new_receipt_id() -> String {
    format!("rcpt_{}", Uuid::new_v4().simple())
}

/// What the user is about to pay for, priced from the catalog at call time.
///
/// Never persisted and never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseIntent {
    user_id: UserId,
    lines: Vec<OrderLine>,
    total: Money,
}

impl PurchaseIntent {
    /// Builds an intent from fresh catalog snapshots.
    ///
    /// Fails with `AlreadyEnrolled` if the user owns any of the courses, and
    /// with `InvalidAmount` on a negative price or an overflowing total.
    pub fn from_snapshots(user_id: UserId, snapshots: Vec<CourseSnapshot>) -> Result<Self> {
        if snapshots.is_empty() {
            return Err(CheckoutError::InvalidRequest(
                "Please provide at least one course id".to_string(),
            ));
        }

        let mut total = Money::zero();
        let mut lines = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            if snapshot.enrolled_user_ids.contains(&user_id) {
                return Err(CheckoutError::AlreadyEnrolled {
                    course_id: snapshot.course_id,
                });
            }
            if snapshot.price.is_negative() {
                return Err(CheckoutError::InvalidAmount {
                    total: snapshot.price,
                    minimum: Money::zero(),
                });
            }
            total = total
                .checked_add(snapshot.price)
                .ok_or(CheckoutError::InvalidAmount {
                    total: Money::from_minor(i64::MAX),
                    minimum: Money::zero(),
                })?;
            lines.push(OrderLine {
                course_id: snapshot.course_id,
                price: snapshot.price,
            });
        }

        Ok(Self {
            user_id,
            lines,
            total,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn into_lines(self) -> Vec<OrderLine> {
        self.lines
    }
}

/// Order handle returned to the client after a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResponse {
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
    pub per_course: Vec<OrderLine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, price: i64, enrolled: &[&str]) -> CourseSnapshot {
        CourseSnapshot {
            course_id: CourseId::parse(id).unwrap(),
            price: Money::from_minor(price),
            enrolled_user_ids: enrolled
                .iter()
                .map(|u| UserId::parse(*u).unwrap())
                .collect(),
        }
    }

    fn user() -> UserId {
        UserId::parse("user-1").unwrap()
    }

    #[test]
    fn test_parse_course_ids_dedupes_in_order() {
        let raw = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let ids = parse_course_ids(&raw).unwrap();
        let ids: Vec<_> = ids.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn test_parse_course_ids_rejects_empty_and_malformed() {
        assert!(matches!(
            parse_course_ids(&[]),
            Err(CheckoutError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_course_ids(&["ok".to_string(), "not ok".to_string()]),
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_total_is_sum_of_catalog_prices() {
        let intent = PurchaseIntent::from_snapshots(
            user(),
            vec![snapshot("a", 500, &[]), snapshot("b", 300, &["user-2"])],
        )
        .unwrap();
        assert_eq!(intent.total(), Money::from_minor(800));
        assert_eq!(intent.lines().len(), 2);
    }

    #[test]
    fn test_already_enrolled_fails_whole_batch() {
        let err = PurchaseIntent::from_snapshots(
            user(),
            vec![snapshot("a", 500, &[]), snapshot("b", 300, &["user-1"])],
        )
        .unwrap_err();
        match err {
            CheckoutError::AlreadyEnrolled { course_id } => assert_eq!(course_id.as_str(), "b"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_overflowing_total_rejected() {
        let err = PurchaseIntent::from_snapshots(
            user(),
            vec![snapshot("a", i64::MAX, &[]), snapshot("b", 1, &[])],
        )
        .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidAmount { .. }));
    }

    #[test]
    fn test_receipt_ids_are_fresh() {
        let a = new_receipt_id();
        let b = new_receipt_id();
        assert_ne!(a, b);
        assert!(a.starts_with("rcpt_"));
        assert!(a.len() <= 40);
    }
}
