//! Course service adapter.

use async_trait::async_trait;
use checkout::{CatalogClient, CourseSnapshot, ServiceError};
use common::{CourseId, Money, UserId};
use serde::Deserialize;
use serde_json::json;

use super::{ServiceEndpoint, send, send_json};

#[derive(Debug, Deserialize)]
struct CourseDetailsEnvelope {
    data: CourseDetailsData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseDetailsData {
    course_details: CourseDetails,
}

#[derive(Debug, Deserialize)]
struct CourseDetails {
    /// Whole currency units.
    price: f64,
    #[serde(rename = "studentsEnroled", default)]
    students_enrolled: Vec<String>,
}

impl CourseDetails {
    fn into_snapshot(self, course_id: &CourseId) -> Result<CourseSnapshot, ServiceError> {
        if !self.price.is_finite() {
            return Err(ServiceError::Unavailable(format!(
                "course {course_id} has no valid price"
            )));
        }
        Ok(CourseSnapshot {
            course_id: course_id.clone(),
            price: Money::from_minor((self.price * 100.0).round() as i64),
            // Ids that are not well-formed can never match an authenticated caller.
            enrolled_user_ids: self
                .students_enrolled
                .into_iter()
                .filter_map(|id| UserId::parse(id).ok())
                .collect(),
        })
    }
}

/// Catalog client backed by the course service.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    endpoint: ServiceEndpoint,
}

impl HttpCatalogClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn get_course(&self, course_id: &CourseId) -> Result<CourseSnapshot, ServiceError> {
        let envelope: CourseDetailsEnvelope = send_json(
            self.endpoint
                .post("/api/v1/course/getCourseDetails")
                .json(&json!({ "courseId": course_id })),
            "course details",
        )
        .await?;
        envelope.data.course_details.into_snapshot(course_id)
    }

    async fn enroll_student(
        &self,
        course_id: &CourseId,
        user_id: &UserId,
    ) -> Result<(), ServiceError> {
        send(
            self.endpoint
                .post("/api/v1/course/enroll-student")
                .json(&json!({ "courseId": course_id, "userId": user_id })),
            "course enrollment",
        )
        .await?;
        Ok(())
    }
}
