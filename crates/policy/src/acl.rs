//! Route table: `(method, path-prefix) → required access level`.

use torbo_common::AccessLevel;

struct RouteRule {
    /// HTTP method, or `*` for any.
    method: &'static str,
    prefix: &'static str,
    required: AccessLevel,
}

/// First matching rule wins. Routes not listed here are public (pairing,
/// health) or unknown (404 downstream).
const ROUTE_RULES: &[RouteRule] = &[
    RouteRule {
        method: "POST",
        prefix: "/v1/chat/completions",
        required: AccessLevel::Chat,
    },
    RouteRule {
        method: "GET",
        prefix: "/v1/models",
        required: AccessLevel::Chat,
    },
    RouteRule {
        method: "GET",
        prefix: "/v1/dashboard",
        required: AccessLevel::Chat,
    },
    RouteRule {
        method: "*",
        prefix: "/v1/agents",
        required: AccessLevel::Chat,
    },
    RouteRule {
        method: "*",
        prefix: "/v1/devices",
        required: AccessLevel::Chat,
    },
    RouteRule {
        method: "*",
        prefix: "/v1/config",
        required: AccessLevel::Chat,
    },
    RouteRule {
        method: "GET",
        prefix: "/v1/audit",
        required: AccessLevel::Chat,
    },
    // Catch-all for any other /v1 surface.
    RouteRule {
        method: "*",
        prefix: "/v1/",
        required: AccessLevel::Chat,
    },
];

/// Required level for a route, or `None` for routes outside the table.
pub fn required_level(method: &str, path: &str) -> Option<AccessLevel> {
    ROUTE_RULES
        .iter()
        .find(|r| (r.method == "*" || r.method == method) && path.starts_with(r.prefix))
        .map(|r| r.required)
}

/// Effective level of an agent under the server-wide clamp.
pub fn effective_level(server: AccessLevel, agent: AccessLevel) -> AccessLevel {
    agent.clamped_by(server)
}
