//! Binding descriptor parameters onto libsql statements.

use libsql::params::Params;

use crate::command::{CommandDescriptor, ParameterDirection};
use crate::{Error, Result};

const NAME_PREFIXES: [char; 3] = [':', '@', '$'];

/// Convert the descriptor's parameters into libsql parameters.
///
/// Parameters are bound by name when every parameter is named and by position
/// when none are. Output and return-value parameters cannot be filled by
/// SQLite and are rejected.
pub fn bind(command: &CommandDescriptor) -> Result<Params> {
    if command.parameters.is_empty() {
        return Ok(Params::None);
    }

    for parameter in &command.parameters {
        if matches!(
            parameter.direction,
            ParameterDirection::Output | ParameterDirection::ReturnValue
        ) {
            return Err(Error::Binding {
                statement: command.text.clone(),
                details: format!(
                    "{:?} parameter '{}' is not supported",
                    parameter.direction,
                    parameter.name.as_deref().unwrap_or("<positional>")
                ),
            });
        }
    }

    let named = command
        .parameters
        .iter()
        .filter(|parameter| parameter.name.is_some())
        .count();

    if named == 0 {
        let values = command
            .parameters
            .iter()
            .map(|parameter| libsql::Value::from(&parameter.value))
            .collect();
        return Ok(Params::Positional(values));
    }

    if named != command.parameters.len() {
        return Err(Error::Binding {
            statement: command.text.clone(),
            details: "named and positional parameters cannot be mixed".to_string(),
        });
    }

    let values = command
        .parameters
        .iter()
        .filter_map(|parameter| {
            parameter
                .name
                .as_deref()
                .map(|name| (normalize_name(name), libsql::Value::from(&parameter.value)))
        })
        .collect();
    Ok(Params::Named(values))
}

fn normalize_name(name: &str) -> String {
    if name.starts_with(NAME_PREFIXES) {
        name.to_string()
    } else {
        format!(":{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Parameter;

    #[test]
    fn test_no_parameters() {
        let command = CommandDescriptor::text("SELECT 1");
        assert!(matches!(bind(&command).unwrap(), Params::None));
    }

    #[test]
    fn test_positional_parameters_keep_order() {
        let command = CommandDescriptor::text("INSERT INTO t VALUES (?1, ?2)")
            .bind(1)
            .bind("two");
        match bind(&command).unwrap() {
            Params::Positional(values) => {
                assert_eq!(values.len(), 2);
                assert!(matches!(values[0], libsql::Value::Integer(1)));
                assert!(matches!(&values[1], libsql::Value::Text(text) if text == "two"));
            }
            _ => panic!("expected positional parameters"),
        }
    }

    #[test]
    fn test_named_parameters_get_prefix() {
        let command = CommandDescriptor::text("UPDATE t SET a = :a WHERE id = @id")
            .with_parameter(Parameter::named("a", 5))
            .with_parameter(Parameter::named("@id", 1));
        match bind(&command).unwrap() {
            Params::Named(values) => {
                let names: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
                assert_eq!(names, vec![":a", "@id"]);
            }
            _ => panic!("expected named parameters"),
        }
    }

    #[test]
    fn test_mixed_parameters_rejected() {
        let command = CommandDescriptor::text("UPDATE t SET a = ?1 WHERE id = :id")
            .bind(5)
            .with_parameter(Parameter::named("id", 1));
        let err = bind(&command).unwrap_err();
        assert!(matches!(err, Error::Binding { .. }));
    }

    #[test]
    fn test_output_parameters_rejected() {
        let command = CommandDescriptor::text("SELECT 1").with_parameter(
            Parameter::named("result", 0).with_direction(ParameterDirection::Output),
        );
        let err = bind(&command).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_input_output_binds_as_input() {
        let command = CommandDescriptor::text("SELECT ?1").with_parameter(
            Parameter::positional(7).with_direction(ParameterDirection::InputOutput),
        );
        assert!(matches!(bind(&command).unwrap(), Params::Positional(_)));
    }
}
