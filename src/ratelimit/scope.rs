//! Rate limit scope: who is calling and what kind of operation they invoke.

use serde::{Deserialize, Serialize};

/// Subject identifier used when no usable identity can be derived.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// How the caller was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// Authenticated user
    User,
    /// Authenticated user holding the admin role
    Admin,
    /// Unauthenticated caller identified by client address
    Ip,
    /// Caller with no usable identity
    Anonymous,
}

impl SubjectKind {
    /// Lowercase label used in keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Admin => "admin",
            SubjectKind::Ip => "ip",
            SubjectKind::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of operation a request performs; each class carries its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    #[serde(alias = "PUBLIC")]
    Public,
    #[serde(alias = "READ")]
    Read,
    #[serde(alias = "WRITE")]
    Write,
    #[serde(alias = "ADMIN")]
    Admin,
}

impl OperationClass {
    /// Uppercase label used in keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Public => "PUBLIC",
            OperationClass::Read => "READ",
            OperationClass::Write => "WRITE",
            OperationClass::Admin => "ADMIN",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity quotas are tracked against.
///
/// Two requests share counters exactly when their scopes are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    kind: SubjectKind,
    subject: String,
    operation: OperationClass,
}

impl Scope {
    /// Create a scope. A blank subject collapses to the anonymous scope.
    pub fn new(kind: SubjectKind, subject: impl AsRef<str>, operation: OperationClass) -> Self {
        let subject = subject.as_ref().trim();
        if subject.is_empty() {
            return Self::anonymous(operation);
        }

        Self {
            kind,
            subject: subject.to_string(),
            operation,
        }
    }

    /// The shared scope for callers without a usable identity.
    pub fn anonymous(operation: OperationClass) -> Self {
        Self {
            kind: SubjectKind::Anonymous,
            subject: ANONYMOUS_SUBJECT.to_string(),
            operation,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn operation(&self) -> OperationClass {
        self.operation
    }

    /// Key fragment identifying this scope in the counter store.
    pub fn to_key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.subject, self.operation)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}
