//! Catalog service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CourseId, Money, UserId};

use crate::error::ServiceError;

/// Price and enrollment state of a course at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSnapshot {
    pub course_id: CourseId,
    pub price: Money,
    pub enrolled_user_ids: HashSet<UserId>,
}

/// Trait for the course catalog service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches a course's price and enrolled students.
    async fn get_course(&self, course_id: &CourseId) -> Result<CourseSnapshot, ServiceError>;

    /// Marks `user_id` enrolled in the course. Enrolling twice is not an error.
    async fn enroll_student(&self, course_id: &CourseId, user_id: &UserId)
    -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    courses: HashMap<CourseId, (Money, HashSet<UserId>)>,
    unavailable: bool,
    fail_enroll: HashSet<CourseId>,
    hang_enroll: HashSet<CourseId>,
    enroll_calls: usize,
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogClient {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalogClient {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a course with the given price.
    pub fn add_course(&self, course_id: &CourseId, price: Money) {
        self.state
            .write()
            .unwrap()
            .courses
            .insert(course_id.clone(), (price, HashSet::new()));
    }

    /// Configures every call to fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap().unavailable = unavailable;
    }

    /// Configures enrollment in `course_id` to fail as unavailable.
    pub fn set_fail_enroll(&self, course_id: &CourseId, fail: bool) {
        let mut state = self.state.write().unwrap();
        if fail {
            state.fail_enroll.insert(course_id.clone());
        } else {
            state.fail_enroll.remove(course_id);
        }
    }

    /// Configures enrollment in `course_id` to never answer.
    pub fn set_hang_enroll(&self, course_id: &CourseId, hang: bool) {
        let mut state = self.state.write().unwrap();
        if hang {
            state.hang_enroll.insert(course_id.clone());
        } else {
            state.hang_enroll.remove(course_id);
        }
    }

    /// Returns true if the user is enrolled in the course.
    pub fn is_enrolled(&self, course_id: &CourseId, user_id: &UserId) -> bool {
        self.state
            .read()
            .unwrap()
            .courses
            .get(course_id)
            .is_some_and(|(_, enrolled)| enrolled.contains(user_id))
    }

    /// Returns the number of enroll calls received.
    pub fn enroll_calls(&self) -> usize {
        self.state.read().unwrap().enroll_calls
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalogClient {
    async fn get_course(&self, course_id: &CourseId) -> Result<CourseSnapshot, ServiceError> {
        let state = self.state.read().unwrap();
        if state.unavailable {
            return Err(ServiceError::Unavailable("catalog offline".to_string()));
        }

        let (price, enrolled) = state
            .courses
            .get(course_id)
            .ok_or_else(|| ServiceError::NotFound(format!("course {course_id}")))?;

        Ok(CourseSnapshot {
            course_id: course_id.clone(),
            price: *price,
            enrolled_user_ids: enrolled.clone(),
        })
    }

    async fn enroll_student(
        &self,
        course_id: &CourseId,
        user_id: &UserId,
    ) -> Result<(), ServiceError> {
        let hang = {
            let mut state = self.state.write().unwrap();
            state.enroll_calls += 1;
            if state.unavailable || state.fail_enroll.contains(course_id) {
                return Err(ServiceError::Unavailable("catalog offline".to_string()));
            }
            state.hang_enroll.contains(course_id)
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.write().unwrap();
        let (_, enrolled) = state
            .courses
            .get_mut(course_id)
            .ok_or_else(|| ServiceError::NotFound(format!("course {course_id}")))?;
        enrolled.insert(user_id.clone());
        Ok(())
    }
}
