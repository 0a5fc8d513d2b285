// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Argument evaluation and storage-key formatting.
//!
//! A storage key is the field name plus its non-null argument values in
//! declaration order: `name(arg1:<json>,arg2:<json>)`. Values are rendered as
//! compact JSON with object keys sorted, so equal arguments always format to
//! the same key.
use serde_json::Value;

use crate::normalizer::NormalizeError;
use crate::selection::{Argument, ArgumentDefinition, HandleField, Variables};

/// Reads a bound variable; unbound variables are a contract violation.
pub fn variable_value(name: &str, variables: &Variables) -> Result<Value, NormalizeError> {
    variables
        .get(name)
        .cloned()
        .ok_or_else(|| NormalizeError::UndefinedVariable(name.to_owned()))
}

/// Evaluates one argument against `variables`.
pub fn argument_value(argument: &Argument, variables: &Variables) -> Result<Value, NormalizeError> {
    match argument {
        Argument::Literal(arg) => Ok(arg.value.clone()),
        Argument::Variable(arg) => variable_value(&arg.variable_name, variables),
        Argument::ObjectValue(arg) => {
            let mut object = serde_json::Map::new();
            for field in &arg.fields {
                object.insert(field.name().to_owned(), argument_value(field, variables)?);
            }
            Ok(Value::Object(object))
        }
        Argument::ListValue(arg) => arg
            .items
            .iter()
            .map(|item| match item {
                Some(item) => argument_value(item, variables),
                None => Ok(Value::Null),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

/// Evaluates `arguments` in declaration order.
pub fn argument_values(
    arguments: &[Argument],
    variables: &Variables,
) -> Result<Vec<(String, Value)>, NormalizeError> {
    arguments
        .iter()
        .map(|arg| Ok((arg.name().to_owned(), argument_value(arg, variables)?)))
        .collect()
}

/// Evaluates `arguments` into a name → value map.
pub fn argument_map(arguments: &[Argument], variables: &Variables) -> Result<Variables, NormalizeError> {
    Ok(argument_values(arguments, variables)?.into_iter().collect())
}

/// Formats `name` with already-evaluated argument values. Null values are
/// omitted; with no remaining values the bare name is returned.
#[must_use]
pub fn format_storage_key(name: &str, values: &[(String, Value)]) -> String {
    let rendered: Vec<String> = values
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(arg, value)| format!("{arg}:{value}"))
        .collect();
    if rendered.is_empty() {
        return name.to_owned();
    }
    format!("{name}({})", rendered.join(","))
}

/// Storage key for a field; a precomputed key wins.
pub fn storage_key(
    name: &str,
    arguments: &[Argument],
    precomputed: Option<&str>,
    variables: &Variables,
) -> Result<String, NormalizeError> {
    if let Some(key) = precomputed {
        return Ok(key.to_owned());
    }
    if arguments.is_empty() {
        return Ok(name.to_owned());
    }
    Ok(format_storage_key(
        name,
        &argument_values(arguments, variables)?,
    ))
}

/// Storage key prefix for a handle: `__<key>_<handle>`, or
/// `__<field_name>_<handle>` when no key was given.
#[must_use]
pub fn handle_key(handle: &str, key: &str, field_name: &str) -> String {
    if key.is_empty() {
        format!("__{field_name}_{handle}")
    } else {
        format!("__{key}_{handle}")
    }
}

/// Storage key a handle's derived value is written under: the handle key
/// followed by the filter arguments and the dynamic key, if any.
pub fn handle_storage_key(field: &HandleField, variables: &Variables) -> Result<String, NormalizeError> {
    let name = handle_key(&field.handle, &field.key, &field.name);
    let mut filter_args: Vec<Argument> = match &field.filters {
        Some(filters) if !filters.is_empty() => field
            .args
            .iter()
            .filter(|arg| filters.iter().any(|f| f == arg.name()))
            .cloned()
            .collect(),
        _ => Vec::new(),
    };
    if let Some(dynamic) = &field.dynamic_key {
        filter_args.push(dynamic.clone());
    }
    if filter_args.is_empty() {
        return Ok(name);
    }
    Ok(format_storage_key(
        &name,
        &argument_values(&filter_args, variables)?,
    ))
}

/// Variable scope for a fragment spread: `current` rebound by the fragment's
/// argument definitions and the spread's arguments.
pub fn local_variables(
    current: &Variables,
    definitions: &[ArgumentDefinition],
    arguments: &[Argument],
) -> Result<Variables, NormalizeError> {
    if definitions.is_empty() {
        return Ok(current.clone());
    }
    let passed = argument_map(arguments, current)?;
    let mut next = current.clone();
    for definition in definitions {
        match (definition, passed.get(definition.name())) {
            (_, Some(value)) => {
                next.insert(definition.name().to_owned(), value.clone());
            }
            (ArgumentDefinition::LocalArgument { name, default_value }, None) => {
                next.insert(name.clone(), default_value.clone());
            }
            (ArgumentDefinition::RootArgument { .. }, None) => {}
        }
    }
    Ok(next)
}
