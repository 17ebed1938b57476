//! Notification categories and feed change signals.
//!
//! Categories are free-form strings written by the subsystems that own each
//! source. The catalogue below names the ones the visibility rules know about,
//! together with legacy spellings that are folded onto the canonical key.

use serde::{Deserialize, Serialize};

use crate::domain::{FeedKind, Viewer};

/// Which broadcast audience a category is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CategoryGroup {
    /// Platform health alerts every administrative role sees.
    System,
    /// Alerts about teacher accounts, reviewed by super-admins.
    TeacherDirected,
    /// Alerts about students, reviewed by teachers.
    StudentDirected,
    /// Account and security change requests, reviewed by admins.
    AccountReview,
    /// Only ever delivered to a specific identity.
    Personal,
}

/// Static metadata about a known category.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CategoryInfo {
    /// Canonical key (snake_case).
    pub category: &'static str,
    pub label: &'static str,
    pub group: CategoryGroup,
    /// Additional accepted spellings.
    pub aliases: &'static [&'static str],
}

pub const CHAT_MESSAGE: &str = "chat_message";
pub const FRIEND_REQUEST: &str = "friend_request";

const CATEGORIES: &[CategoryInfo] = &[
    CategoryInfo {
        category: "system_api_failure",
        label: "API Failure",
        group: CategoryGroup::System,
        aliases: &["api_failure", "system.api_failure", "ApiFailure"],
    },
    CategoryInfo {
        category: "system_error",
        label: "System Error",
        group: CategoryGroup::System,
        aliases: &["system.error", "SystemError"],
    },
    CategoryInfo {
        category: "system_quota_limit",
        label: "Quota Limit",
        group: CategoryGroup::System,
        aliases: &["quota_limit", "system.quota_limit", "QuotaLimit"],
    },
    CategoryInfo {
        category: "teacher_password_expired",
        label: "Teacher Password Expired",
        group: CategoryGroup::TeacherDirected,
        aliases: &["teacher.password_expired"],
    },
    CategoryInfo {
        category: "teacher_account_change_request",
        label: "Teacher Account Change",
        group: CategoryGroup::TeacherDirected,
        aliases: &["teacher.account_change"],
    },
    CategoryInfo {
        category: "teacher_registration_pending",
        label: "Teacher Registration",
        group: CategoryGroup::TeacherDirected,
        aliases: &["teacher_registration", "teacher.registration"],
    },
    CategoryInfo {
        category: "student_password_expired",
        label: "Student Password Expired",
        group: CategoryGroup::StudentDirected,
        aliases: &["student.password_expired"],
    },
    CategoryInfo {
        category: "student_assessment_alert",
        label: "Assessment Alert",
        group: CategoryGroup::StudentDirected,
        aliases: &["assessment_alert", "student.assessment_alert"],
    },
    CategoryInfo {
        category: "student_account_change_request",
        label: "Student Account Change",
        group: CategoryGroup::StudentDirected,
        aliases: &["student.account_change"],
    },
    CategoryInfo {
        category: "account_change_request",
        label: "Account Change Request",
        group: CategoryGroup::AccountReview,
        aliases: &["account_change", "AccountChangeRequest"],
    },
    CategoryInfo {
        category: "security_change_request",
        label: "Security Change Request",
        group: CategoryGroup::AccountReview,
        aliases: &["security_change", "SecurityChangeRequest"],
    },
    CategoryInfo {
        category: CHAT_MESSAGE,
        label: "Chat Message",
        group: CategoryGroup::Personal,
        aliases: &["chat", "chat.unread"],
    },
    CategoryInfo {
        category: FRIEND_REQUEST,
        label: "Friend Request",
        group: CategoryGroup::Personal,
        aliases: &["friend.request"],
    },
];

pub fn categories() -> &'static [CategoryInfo] {
    CATEGORIES
}

pub fn category_info(category: &str) -> Option<&'static CategoryInfo> {
    let key = normalize_key(category);
    CATEGORIES.iter().find(|info| {
        info.category == key || info.aliases.iter().any(|alias| normalize_key(alias) == key)
    })
}

/// Fold a stored category onto its canonical key. Unknown categories are kept
/// (trimmed, lowercased) so they still filter and count, but no role can see
/// them as broadcasts.
pub fn canonicalize_category(input: &str) -> String {
    match category_info(input) {
        Some(info) => info.category.to_string(),
        None => normalize_key(input),
    }
}

/// Every stored spelling (canonical key plus aliases, normalized) of the given
/// canonical categories. Used to push category scoping down to the store.
pub fn category_spellings<'a, I>(canonical: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut spellings = Vec::new();
    for category in canonical {
        match CATEGORIES.iter().find(|info| info.category == category) {
            Some(info) => {
                spellings.push(info.category.to_string());
                spellings.extend(info.aliases.iter().map(|alias| normalize_key(alias)));
            }
            None => spellings.push(normalize_key(category)),
        }
    }
    spellings.sort_unstable();
    spellings.dedup();
    spellings
}

fn normalize_key(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

/// Who a [`FeedSignal`] concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SignalAudience {
    /// A single identity.
    Identity(String),
    /// Every viewer whose role admits this broadcast category.
    Category(String),
    Everyone,
}

/// "Something changed" notice published by the owner of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSignal {
    pub audience: SignalAudience,
    pub kind: FeedKind,
}

impl FeedSignal {
    pub fn for_identity(identity: impl Into<String>, kind: FeedKind) -> Self {
        Self {
            audience: SignalAudience::Identity(identity.into()),
            kind,
        }
    }

    pub fn for_category(category: impl Into<String>) -> Self {
        Self {
            audience: SignalAudience::Category(canonicalize_category(&category.into())),
            kind: FeedKind::Notification,
        }
    }

    /// Whether `viewer` should re-fetch when this signal arrives.
    pub fn concerns(&self, viewer: &Viewer) -> bool {
        match &self.audience {
            SignalAudience::Identity(identity) => identity == &viewer.identity,
            SignalAudience::Category(category) => {
                super::visibility::viewer_categories(viewer).contains(category.as_str())
            }
            SignalAudience::Everyone => true,
        }
    }
}
