//! Identity service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CourseId, UserId};

use crate::error::ServiceError;

/// The parts of a user profile the checkout flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl UserProfile {
    /// Returns `"first last"`.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Trait for the identity (user profile) service.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Fetches a user's contact details.
    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ServiceError>;

    /// Appends the course to the user's enrolled courses. Appending twice is not an error.
    async fn add_enrolled_course(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryIdentityState {
    users: HashMap<UserId, UserProfile>,
    enrolled: HashMap<UserId, Vec<CourseId>>,
    unavailable: bool,
    hang_for: HashSet<CourseId>,
    add_calls: usize,
}

/// In-memory identity service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityClient {
    state: Arc<RwLock<InMemoryIdentityState>>,
}

impl InMemoryIdentityClient {
    /// Creates an empty identity service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user profile.
    pub fn add_user(&self, profile: UserProfile) {
        self.state
            .write()
            .unwrap()
            .users
            .insert(profile.user_id.clone(), profile);
    }

    /// Configures every call to fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap().unavailable = unavailable;
    }

    /// Configures `add_enrolled_course` for `course_id` to never answer.
    pub fn set_hang_for(&self, course_id: &CourseId, hang: bool) {
        let mut state = self.state.write().unwrap();
        if hang {
            state.hang_for.insert(course_id.clone());
        } else {
            state.hang_for.remove(course_id);
        }
    }

    /// Returns the courses recorded for the user.
    pub fn enrolled_courses(&self, user_id: &UserId) -> Vec<CourseId> {
        self.state
            .read()
            .unwrap()
            .enrolled
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of `add_enrolled_course` calls received.
    pub fn add_calls(&self) -> usize {
        self.state.read().unwrap().add_calls
    }
}

#[async_trait]
impl IdentityClient for InMemoryIdentityClient {
    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ServiceError> {
        let state = self.state.read().unwrap();
        if state.unavailable {
            return Err(ServiceError::Unavailable("identity offline".to_string()));
        }
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))
    }

    async fn add_enrolled_course(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError> {
        let hang = {
            let mut state = self.state.write().unwrap();
            state.add_calls += 1;
            if state.unavailable {
                return Err(ServiceError::Unavailable("identity offline".to_string()));
            }
            state.hang_for.contains(course_id)
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.write().unwrap();
        let courses = state.enrolled.entry(user_id.clone()).or_default();
        if !courses.contains(course_id) {
            courses.push(course_id.clone());
        }
        Ok(())
    }
}
