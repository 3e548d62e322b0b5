//! Error type shared by all resource controllers
//!
//! Every error is wrapped with the identity of the resource it concerns and
//! the operation that produced it before it reaches the caller.

use std::fmt;

/// Identity of a managed resource: its kind plus the remote identifier
/// (name or ARN) the cloud API knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: String,
    pub identifier: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identifier)
    }
}

/// Error type for resource operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource: Option<ResourceId>,
    pub operation: Option<&'static str>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    transient: bool,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref id) = self.resource {
            write!(f, "[{id}] ")?;
        }
        if let Some(operation) = self.operation {
            write!(f, "{operation}: ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource: None,
            operation: None,
            cause: None,
            transient: false,
        }
    }

    /// Wraps a failed API request with the resource and operation it was for.
    pub fn request(operation: &'static str, resource: &ResourceId, err: impl fmt::Debug) -> Self {
        Self::new(format!("request failed: {err:?}"))
            .for_resource(resource.clone())
            .during(operation)
    }

    pub fn for_resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn during(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Marks the error as transient: the condition is expected to clear on
    /// its own (eventual consistency), so bounded retry loops may keep going.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Enforces the exactly-one invariant on describe results for a
/// single-identity query. Zero or multiple results fail immediately;
/// callers that treat an empty result as "absent" must check for that
/// before calling this.
pub fn exactly_one<T>(mut items: Vec<T>, what: &str) -> ProviderResult<T> {
    match items.len() {
        1 => Ok(items.remove(0)),
        n => Err(ProviderError::new(format!(
            "expected exactly one {what}, API returned {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_resource_and_operation() {
        let err = ProviderError::new("boom")
            .for_resource(ResourceId::new("load_balancer", "my-lb"))
            .during("create");
        assert_eq!(err.to_string(), "[load_balancer/my-lb] create: boom");
    }

    #[test]
    fn display_without_context() {
        let err = ProviderError::new("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn errors_are_not_transient_by_default() {
        assert!(!ProviderError::new("boom").is_transient());
        assert!(ProviderError::new("boom").transient().is_transient());
    }

    #[test]
    fn exactly_one_accepts_single_result() {
        assert_eq!(exactly_one(vec![7], "widget").unwrap(), 7);
    }

    #[test]
    fn exactly_one_rejects_multiple_results() {
        let err = exactly_one(vec![1, 2], "compute environment").unwrap_err();
        assert!(err.to_string().contains("expected exactly one"));
        assert!(err.to_string().contains("returned 2"));
        assert!(!err.is_transient());
    }

    #[test]
    fn exactly_one_rejects_empty_results() {
        let err = exactly_one(Vec::<i32>::new(), "document").unwrap_err();
        assert!(err.to_string().contains("returned 0"));
    }
}
