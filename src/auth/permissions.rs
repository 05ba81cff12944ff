//! Capability checks over access-token claims.

use crate::jwt::AccessClaims;

/// Role that satisfies every permission check.
pub const ADMIN_ROLE: &str = "admin";

/// True if the claims grant `required`.
///
/// Permissions are a flat capability set: none implies another, and only the
/// admin role acts as a wildcard.
pub fn has_permission(claims: &AccessClaims, required: &str) -> bool {
    claims.roles.iter().any(|role| role == ADMIN_ROLE)
        || claims.permissions.iter().any(|p| p == required)
}

/// A permission name usable as a type parameter of `RequirePermission`.
pub trait Permission {
    const NAME: &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::TokenType;

    fn claims(roles: &[&str], permissions: &[&str]) -> AccessClaims {
        AccessClaims {
            sub: "alice".to_string(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
            token_type: TokenType::Access,
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_admin_is_wildcard() {
        assert!(has_permission(&claims(&["admin"], &[]), "anything:at-all"));
    }

    #[test]
    fn test_exact_permission_required() {
        let c = claims(&["editor"], &["announcements:write"]);
        assert!(has_permission(&c, "announcements:write"));
        assert!(!has_permission(&c, "announcements:delete"));
    }

    #[test]
    fn test_no_implication_between_permissions() {
        let c = claims(&["editor"], &["activities:write"]);
        assert!(!has_permission(&c, "activities:read"));
    }

    #[test]
    fn test_role_name_is_not_a_permission() {
        let c = claims(&["editor"], &[]);
        assert!(!has_permission(&c, "editor"));
    }
}
