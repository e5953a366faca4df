//! IRSA detection for suites calling AWS APIs
//!
//! When the test pod runs with IAM Roles for Service Accounts the pod
//! identity webhook injects `AWS_ROLE_ARN` and `AWS_WEB_IDENTITY_TOKEN_FILE`,
//! which the AWS SDK credential chain picks up. Suites use these helpers to
//! skip AWS assertions when no role is available.

/// Role assumed through IRSA
pub const ENV_ROLE_ARN: &str = "AWS_ROLE_ARN";

/// Projected service account token used for IRSA
pub const ENV_WEB_IDENTITY_TOKEN_FILE: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";

/// Whether both IRSA variables are set
pub fn irsa_configured() -> bool {
    irsa_configured_with(|key| std::env::var(key).ok())
}

/// Role ARN injected for IRSA, if any
pub fn irsa_role_arn() -> Option<String> {
    std::env::var(ENV_ROLE_ARN).ok().filter(|v| !v.is_empty())
}

fn irsa_configured_with(lookup: impl Fn(&str) -> Option<String>) -> bool {
    [ENV_ROLE_ARN, ENV_WEB_IDENTITY_TOKEN_FILE]
        .iter()
        .all(|key| lookup(key).is_some_and(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irsa_needs_both_variables() {
        let both = |key: &str| Some(format!("set-{key}"));
        assert!(irsa_configured_with(both));

        let role_only = |key: &str| (key == ENV_ROLE_ARN).then(|| "arn".to_string());
        assert!(!irsa_configured_with(role_only));

        let empty_token = |key: &str| {
            Some(if key == ENV_ROLE_ARN { "arn" } else { "" }.to_string())
        };
        assert!(!irsa_configured_with(empty_token));
    }
}
