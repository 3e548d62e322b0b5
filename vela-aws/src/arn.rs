//! Load balancer ARN helpers

use std::sync::LazyLock;

use regex::Regex;

use vela_core::error::{ProviderError, ProviderResult};

static LB_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new("([^/]+/[^/]+/[^/]+)$").unwrap());

static LB_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("arn:.*:loadbalancer/(.*)").unwrap());

/// Extracts the `type/name/id` form EC2 uses in network interface
/// descriptions (e.g. `app/example-alb/b26e625cdde161e6`).
pub fn load_balancer_name(arn: &str) -> ProviderResult<&str> {
    LB_NAME
        .find(arn)
        .map(|m| m.as_str())
        .ok_or_else(|| ProviderError::new(format!("unexpected load balancer ARN format: {arn:?}")))
}

/// The ARN suffix used by CloudWatch metric dimensions, or `None` when the
/// ARN is not a load balancer ARN.
pub fn load_balancer_suffix(arn: &str) -> Option<&str> {
    LB_SUFFIX
        .captures(arn)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str =
        "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/example-alb/b26e625cdde161e6";

    #[test]
    fn name_is_the_last_three_segments() {
        assert_eq!(
            load_balancer_name(ARN).unwrap(),
            "app/example-alb/b26e625cdde161e6"
        );
    }

    #[test]
    fn name_rejects_malformed_arns() {
        assert!(load_balancer_name("arn:aws:elasticloadbalancing:us-east-1").is_err());
    }

    #[test]
    fn suffix_strips_everything_up_to_the_resource() {
        assert_eq!(
            load_balancer_suffix(ARN),
            Some("app/example-alb/b26e625cdde161e6")
        );
    }

    #[test]
    fn suffix_is_none_for_other_arns() {
        assert_eq!(
            load_balancer_suffix("arn:aws:ssm:us-east-1:123456789012:document/example"),
            None
        );
    }
}
