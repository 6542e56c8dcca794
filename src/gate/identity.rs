//! Caller identity and operation classification.
//!
//! Nothing here validates credentials. An upstream authentication layer
//! places an [`AuthenticatedSubject`] in the request extensions; the gate
//! only reads what is already there.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, Method};

use crate::ratelimit::{OperationClass, Role, Scope, SubjectKind};

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Single-address header set by some proxies.
pub const REAL_IP: &str = "x-real-ip";

/// Claims extracted by an upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    /// Stable subject identifier
    pub id: String,
    /// Granted roles, e.g. `admin` or `ROLE_ADMIN`
    pub roles: Vec<String>,
}

impl AuthenticatedSubject {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| {
            let role = role.trim();
            role.eq_ignore_ascii_case("admin") || role.eq_ignore_ascii_case("role_admin")
        })
    }

    fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Everything the gate needs to know about a request, already extracted.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub method: Method,
    pub path: String,
    pub subject: Option<AuthenticatedSubject>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer_addr: Option<IpAddr>,
}

impl RequestMetadata {
    /// Extract metadata from an axum request.
    pub fn from_request(request: &Request) -> Self {
        let peer_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());

        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            subject: request.extensions().get::<AuthenticatedSubject>().cloned(),
            forwarded_for: header_value(request.headers(), FORWARDED_FOR),
            real_ip: header_value(request.headers(), REAL_IP),
            peer_addr,
        }
    }

    /// Role granted by the subject's claims.
    pub fn role(&self) -> Role {
        match &self.subject {
            Some(subject) if subject.has_id() && subject.is_admin() => Role::Admin,
            Some(subject) if subject.has_id() => Role::Member,
            _ => Role::Guest,
        }
    }

    /// Best-effort client address: first forwarded hop, then `X-Real-IP`, then the peer.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .and_then(parse_ip)
            .or_else(|| self.real_ip.as_deref().and_then(parse_ip))
            .or(self.peer_addr)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// Whether `path` equals `prefix` or lies beneath it.
pub(crate) fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Classify a request into an operation class.
pub fn classify_operation(
    method: &Method,
    path: &str,
    admin_prefixes: &[String],
    public_prefixes: &[String],
) -> OperationClass {
    if admin_prefixes.iter().any(|p| matches_prefix(path, p)) {
        return OperationClass::Admin;
    }
    if public_prefixes.iter().any(|p| matches_prefix(path, p)) {
        return OperationClass::Public;
    }
    match *method {
        Method::GET | Method::HEAD | Method::OPTIONS => OperationClass::Read,
        _ => OperationClass::Write,
    }
}

/// Derive the rate limit scope for a request.
///
/// Prefers the authenticated subject, then the client address; anything
/// unusable lands in the shared anonymous scope.
pub fn resolve_identity(metadata: &RequestMetadata, operation: OperationClass) -> Scope {
    if let Some(subject) = metadata.subject.as_ref().filter(|s| s.has_id()) {
        let kind = if subject.is_admin() {
            SubjectKind::Admin
        } else {
            SubjectKind::User
        };
        return Scope::new(kind, &subject.id, operation);
    }

    match metadata.client_ip() {
        Some(ip) => Scope::new(SubjectKind::Ip, ip.to_string(), operation),
        None => Scope::anonymous(operation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn metadata() -> RequestMetadata {
        RequestMetadata {
            method: Method::GET,
            path: "/api/goals".to_string(),
            subject: None,
            forwarded_for: None,
            real_ip: None,
            peer_addr: None,
        }
    }

    #[test]
    fn test_authenticated_subject_wins() {
        let meta = RequestMetadata {
            subject: Some(AuthenticatedSubject::new("user-7", ["member"])),
            forwarded_for: Some("203.0.113.5".to_string()),
            ..metadata()
        };
        let scope = resolve_identity(&meta, OperationClass::Read);

        assert_eq!(scope.kind(), SubjectKind::User);
        assert_eq!(scope.subject(), "user-7");
        assert_eq!(meta.role(), Role::Member);
    }

    #[test]
    fn test_admin_role_detected() {
        let meta = RequestMetadata {
            subject: Some(AuthenticatedSubject::new("root", ["ROLE_ADMIN"])),
            ..metadata()
        };
        assert_eq!(resolve_identity(&meta, OperationClass::Admin).kind(), SubjectKind::Admin);
        assert_eq!(meta.role(), Role::Admin);
    }

    #[test]
    fn test_blank_subject_falls_through_to_address() {
        let meta = RequestMetadata {
            subject: Some(AuthenticatedSubject::new("  ", ["admin"])),
            peer_addr: Some("192.0.2.1".parse().unwrap()),
            ..metadata()
        };
        let scope = resolve_identity(&meta, OperationClass::Read);

        assert_eq!(scope.kind(), SubjectKind::Ip);
        assert_eq!(scope.subject(), "192.0.2.1");
        assert_eq!(meta.role(), Role::Guest);
    }

    #[test]
    fn test_first_forwarded_hop_used() {
        let meta = RequestMetadata {
            forwarded_for: Some(" 203.0.113.5 , 10.0.0.1, 10.0.0.2".to_string()),
            real_ip: Some("198.51.100.9".to_string()),
            peer_addr: Some("10.0.0.2".parse().unwrap()),
            ..metadata()
        };
        assert_eq!(resolve_identity(&meta, OperationClass::Read).subject(), "203.0.113.5");
    }

    #[test]
    fn test_malformed_forwarded_header_falls_back() {
        let meta = RequestMetadata {
            forwarded_for: Some("not-an-ip, 10.0.0.1".to_string()),
            peer_addr: Some("192.0.2.44".parse().unwrap()),
            ..metadata()
        };
        assert_eq!(resolve_identity(&meta, OperationClass::Read).subject(), "192.0.2.44");

        let meta = RequestMetadata {
            forwarded_for: Some("garbage".to_string()),
            real_ip: Some("198.51.100.9".to_string()),
            ..metadata()
        };
        assert_eq!(resolve_identity(&meta, OperationClass::Read).subject(), "198.51.100.9");
    }

    #[test]
    fn test_no_identity_is_anonymous() {
        let scope = resolve_identity(&metadata(), OperationClass::Write);
        assert_eq!(scope, Scope::anonymous(OperationClass::Write));
    }

    #[test]
    fn test_classify_operation() {
        let admin = vec!["/api/admin".to_string()];
        let public = vec!["/api/public/".to_string()];

        assert_eq!(classify_operation(&Method::GET, "/api/goals", &admin, &public), OperationClass::Read);
        assert_eq!(classify_operation(&Method::HEAD, "/api/goals", &admin, &public), OperationClass::Read);
        assert_eq!(classify_operation(&Method::POST, "/api/goals", &admin, &public), OperationClass::Write);
        assert_eq!(classify_operation(&Method::DELETE, "/api/goals/1", &admin, &public), OperationClass::Write);
        assert_eq!(classify_operation(&Method::GET, "/api/admin/stats", &admin, &public), OperationClass::Admin);
        assert_eq!(classify_operation(&Method::GET, "/api/public", &admin, &public), OperationClass::Public);
        // Prefix match respects segment boundaries
        assert_eq!(classify_operation(&Method::GET, "/api/administrators", &admin, &public), OperationClass::Read);
    }

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("/health", "/health"));
        assert!(matches_prefix("/health/live", "/health"));
        assert!(!matches_prefix("/healthz", "/health"));
        assert!(!matches_prefix("/anything", "/"));
    }

    #[test]
    fn test_from_request_reads_headers_and_extensions() {
        let mut request = axum::http::Request::builder()
            .method(Method::PUT)
            .uri("/api/hives/3?x=1")
            .header(FORWARDED_FOR, "203.0.113.5")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedSubject::new("user-1", Vec::<String>::new()));
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 5555))));

        let meta = RequestMetadata::from_request(&request);
        assert_eq!(meta.method, Method::PUT);
        assert_eq!(meta.path, "/api/hives/3");
        assert_eq!(meta.forwarded_for.as_deref(), Some("203.0.113.5"));
        assert_eq!(meta.peer_addr, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(meta.subject.as_ref().map(|s| s.id.as_str()), Some("user-1"));
    }
}
