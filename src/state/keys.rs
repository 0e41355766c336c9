// Namespaced cache keys

use std::fmt;

/// Kind of entity that owns a direct key and a list-cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Business,
    Job,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Business => "business",
            EntityKind::Job => "job",
        }
    }
}

/// Closed set of key prefixes
///
/// Prefixes are not free text so that two subsystems can never write into the
/// same key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPrefix {
    Session,
    EmailVerification,
    PasswordReset,
    RefreshToken,
    Entity(EntityKind),
    EntityList(EntityKind),
}

impl KeyPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::Session => "session",
            KeyPrefix::EmailVerification => "email-verification",
            KeyPrefix::PasswordReset => "password-reset",
            KeyPrefix::RefreshToken => "refresh-token",
            KeyPrefix::Entity(kind) => kind.as_str(),
            KeyPrefix::EntityList(EntityKind::User) => "user-list",
            KeyPrefix::EntityList(EntityKind::Business) => "business-list",
            KeyPrefix::EntityList(EntityKind::Job) => "job-list",
        }
    }

    /// Glob matching every key under this prefix
    pub fn pattern(&self) -> String {
        format!("{}:*", self.as_str())
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build `<prefix>:<part1>:<part2>...`; part order is significant
pub fn build_key<I, S>(prefix: KeyPrefix, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::from(prefix.as_str());
    for part in parts {
        key.push(':');
        key.push_str(part.as_ref());
    }
    key
}
