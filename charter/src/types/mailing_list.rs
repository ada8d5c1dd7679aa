use serde::{Deserialize, Serialize};

/// Mailing lists mirrored by the archive backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MailingList {
    SwiftEvolution,
    SwiftUsers,
    SwiftDev,
    SwiftBuildDev,
}

impl MailingList {
    pub const ALL: [MailingList; 4] = [
        MailingList::SwiftEvolution,
        MailingList::SwiftUsers,
        MailingList::SwiftDev,
        MailingList::SwiftBuildDev,
    ];

    /// Identifier used by the backend in the `mailingList` field
    pub fn identifier(&self) -> &'static str {
        match self {
            MailingList::SwiftEvolution => "swift-evolution",
            MailingList::SwiftUsers => "swift-users",
            MailingList::SwiftDev => "swift-dev",
            MailingList::SwiftBuildDev => "swift-build-dev",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MailingList::SwiftEvolution => "Swift Evolution",
            MailingList::SwiftUsers => "Swift Users",
            MailingList::SwiftDev => "Swift Dev",
            MailingList::SwiftBuildDev => "Swift Build Dev",
        }
    }

    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|list| list.identifier() == identifier)
    }
}
