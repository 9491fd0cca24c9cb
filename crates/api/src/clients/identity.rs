//! Identity adapter: the auth service for profiles, the profile service for
//! enrolled courses.

use async_trait::async_trait;
use checkout::{IdentityClient, ServiceError, UserProfile};
use common::{CourseId, UserId};
use serde::Deserialize;
use serde_json::json;

use super::{ServiceEndpoint, send, send_json};

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthUser {
    email: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

/// Identity client backed by the auth and profile services.
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    auth: ServiceEndpoint,
    profile: ServiceEndpoint,
}

impl HttpIdentityClient {
    pub fn new(auth: ServiceEndpoint, profile: ServiceEndpoint) -> Self {
        Self { auth, profile }
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ServiceError> {
        let envelope: UserEnvelope = send_json(
            self.auth.get(&format!("/api/v1/auth/user/{user_id}")),
            "user lookup",
        )
        .await?;
        Ok(UserProfile {
            user_id: user_id.clone(),
            email: envelope.user.email,
            first_name: envelope.user.first_name,
            last_name: envelope.user.last_name,
        })
    }

    async fn add_enrolled_course(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError> {
        send(
            self.profile
                .post("/api/v1/profile/enroll-course")
                .json(&json!({ "userId": user_id, "courseId": course_id })),
            "profile enrollment",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_auth_user() {
        let body = r#"{"success":true,"user":{"email":"a@b.c","firstName":"Asha","lastName":"Rao","accountType":"Student"}}"#;
        let envelope: UserEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.user.email, "a@b.c");
        assert_eq!(envelope.user.first_name, "Asha");
        assert_eq!(envelope.user.last_name, "Rao");
    }
}
