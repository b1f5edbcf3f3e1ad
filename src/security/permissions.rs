//! ACL-string permission checks for tool dispatch.
//!
//! Permission format: `<service>.<resource_type>[/<namespace>/<name>].<action>:<scope>`,
//! e.g. `resource.function/marketing/send_email.execute:own`. Dots separate
//! service/resource_type/action, a slash-delimited path carries the optional
//! namespace/name hierarchy, and a scope of `all` grants `own`.

use async_trait::async_trait;
use std::collections::HashMap;

/// The resolved identity + permission set a caller presents to the core.
/// Authentication itself (OTP, JWT, API-key hashing) is out of scope; the
/// core only consumes this tuple.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: String,
    pub permissions: HashMap<String, bool>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, permissions: HashMap<String, bool>) -> Self {
        Self {
            user_id: user_id.into(),
            permissions,
        }
    }

    pub fn has_permission(&self, required: &str) -> bool {
        check_permission(&self.permissions, required)
    }
}

/// Turns an opaque bearer token carried on a queued job into a [`UserContext`].
/// The core ships no implementation — token formats (JWT, session lookup,
/// API-key hash) belong to whatever gateway issues the tokens.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, user_token: &str) -> Result<UserContext, String>;
}

/// Builds the ACL string for executing one function: `resource.function/<ns>/<name>.execute:<scope>`.
pub fn function_execute_permission(namespace: &str, name: &str, scope: &str) -> String {
    format!("resource.function/{namespace}/{name}.execute:{scope}")
}

/// True if `permissions` grants `required`, directly, via wildcard, or via
/// the `:all` scope granting `:own`.
pub fn check_permission(permissions: &HashMap<String, bool>, required: &str) -> bool {
    if permissions.get(required).copied().unwrap_or(false) {
        return true;
    }
    permissions
        .iter()
        .any(|(pattern, granted)| *granted && matches_permission_pattern(pattern, required))
}

/// True if `concrete` is covered by `pattern`, per the module doc's format.
pub fn matches_permission_pattern(pattern: &str, concrete: &str) -> bool {
    let Some((pattern_parts, pattern_scope)) = rsplit_once(pattern, ':') else {
        return false;
    };
    let Some((concrete_parts, concrete_scope)) = rsplit_once(concrete, ':') else {
        return false;
    };

    let valid_scopes = ["own", "all", "*"];
    if !valid_scopes.contains(&pattern_scope) || !valid_scopes.contains(&concrete_scope) {
        return false;
    }
    let allowed = match pattern_scope {
        "all" | "*" => concrete_scope == "all" || concrete_scope == "own",
        "own" => concrete_scope == "own",
        _ => false,
    };
    if !allowed {
        return false;
    }

    let Some((pattern_resource, pattern_action)) = rsplit_once(pattern_parts, '.') else {
        return false;
    };
    let Some((concrete_resource, concrete_action)) = rsplit_once(concrete_parts, '.') else {
        return false;
    };

    if pattern_action != "*" && pattern_action != concrete_action {
        return false;
    }

    let (pattern_base, pattern_path) = split_once_opt(pattern_resource, '/');
    let (concrete_base, concrete_path) = split_once_opt(concrete_resource, '/');

    let pattern_base_segs: Vec<&str> = pattern_base.split('.').collect();
    let concrete_base_segs: Vec<&str> = concrete_base.split('.').collect();

    let base_is_wildcard_prefix = pattern_base_segs.last() == Some(&"*");
    let action_wildcard_shorter =
        pattern_action == "*" && pattern_base_segs.len() < concrete_base_segs.len();

    if base_is_wildcard_prefix || action_wildcard_shorter {
        let prefix = if base_is_wildcard_prefix {
            &pattern_base_segs[..pattern_base_segs.len() - 1]
        } else {
            &pattern_base_segs[..]
        };
        if concrete_base_segs.len() < prefix.len() {
            return false;
        }
        if !prefix
            .iter()
            .zip(concrete_base_segs.iter())
            .all(|(p, c)| *p == "*" || p == c)
        {
            return false;
        }
    } else {
        if pattern_base_segs.len() != concrete_base_segs.len() {
            return false;
        }
        if !pattern_base_segs
            .iter()
            .zip(concrete_base_segs.iter())
            .all(|(p, c)| *p == "*" || p == c)
        {
            return false;
        }
    }

    match (pattern_path, concrete_path) {
        (None, None) => true,
        (None, Some(_)) => base_is_wildcard_prefix || pattern_action == "*",
        (Some(_), None) => false,
        (Some(pp), Some(cp)) => {
            let pp_segs: Vec<&str> = pp.split('/').collect();
            let cp_segs: Vec<&str> = cp.split('/').collect();
            pp_segs.len() == cp_segs.len()
                && pp_segs
                    .iter()
                    .zip(cp_segs.iter())
                    .all(|(p, c)| *p == "*" || p == c)
        }
    }
}

fn rsplit_once(s: &str, sep: char) -> Option<(&str, &str)> {
    let idx = s.rfind(sep)?;
    Some((&s[..idx], &s[idx + 1..]))
}

fn split_once_opt(s: &str, sep: char) -> (&str, Option<&str>) {
    match s.find(sep) {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn exact_match() {
        assert!(check_permission(
            &perms(&[("resource.chats.read:own", true)]),
            "resource.chats.read:own"
        ));
    }

    #[test]
    fn service_wildcard_grants_namespaced_action() {
        assert!(check_permission(
            &perms(&[("resource.*:all", true)]),
            "resource.function/marketing/send.execute:own"
        ));
    }

    #[test]
    fn namespaced_wildcard_matches_specific_function() {
        assert!(check_permission(
            &perms(&[("resource.function/*/*.execute:own", true)]),
            "resource.function/marketing/send_email.execute:own"
        ));
    }

    #[test]
    fn scoped_namespace_wildcard() {
        assert!(check_permission(
            &perms(&[("resource.function/marketing/*.execute:own", true)]),
            "resource.function/marketing/send_email.execute:own"
        ));
        assert!(!check_permission(
            &perms(&[("resource.function/marketing/*.execute:own", true)]),
            "resource.function/sales/send_email.execute:own"
        ));
    }

    #[test]
    fn all_scope_grants_own() {
        assert!(check_permission(
            &perms(&[("resource.function/ops/delete_user.execute:all", true)]),
            "resource.function/ops/delete_user.execute:own"
        ));
    }

    #[test]
    fn own_scope_does_not_grant_all() {
        assert!(!check_permission(
            &perms(&[("resource.function/ops/delete_user.execute:own", true)]),
            "resource.function/ops/delete_user.execute:all"
        ));
    }

    #[test]
    fn missing_permission_denied() {
        assert!(!check_permission(&perms(&[]), "resource.function/ops/x.execute:own"));
    }

    #[test]
    fn granted_false_does_not_count() {
        assert!(!check_permission(
            &perms(&[("resource.function/ops/x.execute:own", false)]),
            "resource.function/ops/x.execute:own"
        ));
    }

    #[test]
    fn function_execute_permission_format() {
        assert_eq!(
            function_execute_permission("ops", "delete_user", "own"),
            "resource.function/ops/delete_user.execute:own"
        );
    }

    #[test]
    fn user_context_has_permission() {
        let ctx = UserContext::new("u1", perms(&[("resource.*:all", true)]));
        assert!(ctx.has_permission(&function_execute_permission("math", "add", "own")));
    }
}
