//! Command descriptors: one unit of SQL work plus its execution policies.

use serde::{Deserialize, Serialize};

use crate::value::DbValue;

/// How `text` is interpreted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    #[default]
    Text,
    StoredProcedure,
}

/// Requirement on the number of rows a statement affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectPolicy {
    /// Any affected-row count is acceptable.
    #[default]
    None,

    /// Affecting zero rows is a command failure.
    RequireNonZeroEffect,
}

/// What a command failure does to its enclosing chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Roll back the chunk and halt the batch.
    #[default]
    StopOnError,

    /// Drop this command's contribution and keep going in the same transaction.
    ContinueOnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// A single bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: Option<String>,
    pub value: DbValue,
    #[serde(default)]
    pub direction: ParameterDirection,
}

impl Parameter {
    pub fn positional(value: impl Into<DbValue>) -> Self {
        Self {
            name: None,
            value: value.into(),
            direction: ParameterDirection::Input,
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<DbValue>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
            direction: ParameterDirection::Input,
        }
    }

    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Immutable unit of work handed to an executor or a batch.
///
/// Nothing is validated at construction time. An empty `text` is a no-op
/// when executed, never an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub text: String,
    #[serde(default)]
    pub kind: CommandKind,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub effect_policy: EffectPolicy,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl CommandDescriptor {
    /// Plain SQL text with default policies.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Stored-procedure invocation by name.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::StoredProcedure,
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Shorthand for appending a positional input parameter.
    pub fn bind(self, value: impl Into<DbValue>) -> Self {
        self.with_parameter(Parameter::positional(value))
    }

    pub fn with_effect_policy(mut self, policy: EffectPolicy) -> Self {
        self.effect_policy = policy;
        self
    }

    pub fn require_rows(self) -> Self {
        self.with_effect_policy(EffectPolicy::RequireNonZeroEffect)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn continue_on_error(self) -> Self {
        self.with_failure_policy(FailurePolicy::ContinueOnError)
    }

    /// Whether executing this descriptor would be a no-op.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Check an affected-row count against the effect policy.
    pub fn check_effect(&self, affected: u64) -> crate::Result<u64> {
        if self.effect_policy == EffectPolicy::RequireNonZeroEffect && affected == 0 {
            return Err(crate::Error::EffectPolicyViolation {
                statement: self.text.clone(),
            });
        }
        Ok(affected)
    }
}
