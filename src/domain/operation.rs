//! GraphQL operation body carried by relay frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SubscriptionId;

/// A GraphQL document plus its variables, as sent to the local API and
/// carried in `query`, `mutation` and `start` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlOperation {
    /// GraphQL document text.
    pub query: String,
    /// Operation variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl GraphqlOperation {
    /// Creates an operation without variables.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
        }
    }

    /// Attaches variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Returns the content-derived identity of this operation.
    #[must_use]
    pub fn content_id(&self) -> SubscriptionId {
        SubscriptionId::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_variables_are_omitted() {
        let op = GraphqlOperation::new("{ping}");
        let json = serde_json::to_value(&op).unwrap_or_default();
        assert_eq!(json, json!({"query": "{ping}"}));
    }

    #[test]
    fn deserializes_without_variables() {
        let op: Option<GraphqlOperation> = serde_json::from_str(r#"{"query":"{ping}"}"#).ok();
        assert_eq!(op, Some(GraphqlOperation::new("{ping}")));
    }
}
