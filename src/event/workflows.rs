//! Typed payloads exchanged by each workflow.
//!
//! A request type names its [`Workflow`] and its reply type, so
//! [`RequestClient::call`](super::request_client::RequestClient::call) can pick
//! topics and decode the reply without the caller spelling either out.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::topic_registry::Workflow;

/// Payload of a request message.
pub trait WorkflowRequest: Serialize + Send + Sync {
    type Reply: WorkflowReply;

    const WORKFLOW: Workflow;
    const EVENT_TYPE: &'static str;
}

/// Payload of a reply message.
pub trait WorkflowReply: Serialize + DeserializeOwned + Send + 'static {
    const EVENT_TYPE: &'static str;
}

// forgot-password

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordSendEmail {
    pub email: String,
    #[serde(default)]
    pub delivered: bool,
}

impl WorkflowRequest for ForgotPasswordRequest {
    type Reply = ForgotPasswordSendEmail;
    const WORKFLOW: Workflow = Workflow::ForgotPassword;
    const EVENT_TYPE: &'static str = "ForgotPasswordRequestEvent";
}

impl WorkflowReply for ForgotPasswordSendEmail {
    const EVENT_TYPE: &'static str = "ForgotPasswordSendEmailEvent";
}

// joined-events-by-user

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedEventsByUserRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedEventsByUserResponse {
    pub user_id: String,
    #[serde(default)]
    pub event_ids: Vec<String>,
}

impl WorkflowRequest for JoinedEventsByUserRequest {
    type Reply = JoinedEventsByUserResponse;
    const WORKFLOW: Workflow = Workflow::JoinedEventsByUser;
    const EVENT_TYPE: &'static str = "JoinedEventsByUserRequestEvent";
}

impl WorkflowReply for JoinedEventsByUserResponse {
    const EVENT_TYPE: &'static str = "JoinedEventsByUserResponseEvent";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedEventsByUserFetch {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedEventsByUserFetched {
    pub user_id: String,
    #[serde(default)]
    pub event_ids: Vec<String>,
}

impl WorkflowRequest for JoinedEventsByUserFetch {
    type Reply = JoinedEventsByUserFetched;
    const WORKFLOW: Workflow = Workflow::JoinedEventsByUserFetch;
    const EVENT_TYPE: &'static str = "JoinedEventsByUserFetchEvent";
}

impl WorkflowReply for JoinedEventsByUserFetched {
    const EVENT_TYPE: &'static str = "JoinedEventsByUserFetchedEvent";
}

// user

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user_id: String,
    /// Serialized user document, as produced by the users service.
    pub user: String,
}

impl WorkflowRequest for UserRequest {
    type Reply = UserResponse;
    const WORKFLOW: Workflow = Workflow::User;
    const EVENT_TYPE: &'static str = "UserRequestEvent";
}

impl WorkflowReply for UserResponse {
    const EVENT_TYPE: &'static str = "UserResponseEvent";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFetch {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFetched {
    pub user_id: String,
    /// Profile document as a JSON string: `{"profile":{"sportsOfPreference":[...]}}`.
    pub user: String,
}

impl WorkflowRequest for UserFetch {
    type Reply = UserFetched;
    const WORKFLOW: Workflow = Workflow::UserFetch;
    const EVENT_TYPE: &'static str = "UserFetchEvent";
}

impl WorkflowReply for UserFetched {
    const EVENT_TYPE: &'static str = "UserFetchedEvent";
}

// notification-send

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSendRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSend {
    pub user_id: String,
    #[serde(default)]
    pub delivered: bool,
}

impl WorkflowRequest for NotificationSendRequest {
    type Reply = NotificationSend;
    const WORKFLOW: Workflow = Workflow::NotificationSend;
    const EVENT_TYPE: &'static str = "NotificationSendRequestEvent";
}

impl WorkflowReply for NotificationSend {
    const EVENT_TYPE: &'static str = "NotificationSendEvent";
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payloads_use_camel_case() {
        let value = serde_json::to_value(JoinedEventsByUserResponse {
            user_id: "u-1".to_string(),
            event_ids: vec!["e-1".to_string(), "e-2".to_string()],
        })
        .unwrap();
        assert_eq!(value, json!({ "userId": "u-1", "eventIds": ["e-1", "e-2"] }));
    }

    #[test]
    fn test_reply_defaults_tolerate_missing_fields() {
        let reply: ForgotPasswordSendEmail =
            serde_json::from_value(json!({ "email": "a@b.c" })).unwrap();
        assert!(!reply.delivered);

        let reply: JoinedEventsByUserFetched =
            serde_json::from_value(json!({ "userId": "u-1" })).unwrap();
        assert!(reply.event_ids.is_empty());
    }

    #[test]
    fn test_request_types_point_at_their_workflow() {
        assert_eq!(UserFetch::WORKFLOW.topics().request, "user.fetch");
        assert_eq!(
            NotificationSendRequest::WORKFLOW.topics().response,
            "notification.send"
        );
    }
}
