//! # Topic Registry
//!
//! Fixed mapping from a logical workflow name to the physical channel names on
//! the bus. The table is compiled in and never mutated; services agree on these
//! names out of band.
//!
//! Fetch variants are addressed as their own workflows (`user-fetch`,
//! `joined-events-by-user-fetch`) whose request/response topics are the base
//! workflow's fetch/fetched topics.

use strum::IntoEnumIterator;

/// Named request/reply interaction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Workflow {
    ForgotPassword,
    JoinedEventsByUser,
    JoinedEventsByUserFetch,
    User,
    UserFetch,
    NotificationSend,
}

/// Channel names used by one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub workflow: Workflow,
    pub request: &'static str,
    pub response: &'static str,
    pub fetch: Option<&'static str>,
    pub fetched: Option<&'static str>,
}

const ENTRIES: [TopicSet; 6] = [
    TopicSet {
        workflow: Workflow::ForgotPassword,
        request: "forgot-password.request",
        response: "forgot-password.send-email",
        fetch: None,
        fetched: None,
    },
    TopicSet {
        workflow: Workflow::JoinedEventsByUser,
        request: "joined-events-by-user.request",
        response: "joined-events-by-user.response",
        fetch: Some("joined-events-by-user.fetch"),
        fetched: Some("joined-events-by-user.fetched"),
    },
    TopicSet {
        workflow: Workflow::JoinedEventsByUserFetch,
        request: "joined-events-by-user.fetch",
        response: "joined-events-by-user.fetched",
        fetch: None,
        fetched: None,
    },
    TopicSet {
        workflow: Workflow::User,
        request: "user.request",
        response: "user.response",
        fetch: Some("user.fetch"),
        fetched: Some("user.fetched"),
    },
    TopicSet {
        workflow: Workflow::UserFetch,
        request: "user.fetch",
        response: "user.fetched",
        fetch: None,
        fetched: None,
    },
    TopicSet {
        workflow: Workflow::NotificationSend,
        request: "notification.send.request",
        response: "notification.send",
        fetch: None,
        fetched: None,
    },
];

impl Workflow {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn topics(self) -> &'static TopicSet {
        TopicRegistry::get(self)
    }
}

/// Read-only view over the compiled-in topic table.
pub struct TopicRegistry;

impl TopicRegistry {
    pub fn get(workflow: Workflow) -> &'static TopicSet {
        // ENTRIES is indexed in declaration order of Workflow
        &ENTRIES[workflow as usize]
    }

    /// Looks up a workflow by its kebab-case name.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a registered workflow. Workflow names are
    /// compiled in, so an unknown name is a programming error.
    pub fn lookup(name: &str) -> &'static TopicSet {
        match name.parse::<Workflow>() {
            Ok(workflow) => Self::get(workflow),
            Err(_) => panic!("unknown workflow: {name}"),
        }
    }

    pub fn entries() -> impl Iterator<Item = &'static TopicSet> {
        Workflow::iter().map(Self::get)
    }
}
