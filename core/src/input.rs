//! Parsing of `KEY=VALUE` style caller input.
//!
//! Build parameters are given as `name=value` and dependencies as
//! `pipelineId=buildId`. Anything that does not split into exactly two parts
//! on `=` is rejected before a request is built.

use crate::error::{BuildServerError, Result};
use crate::types::{BuildProperty, DependencyRef};

/// Split `input` into `(key, value)` on its single `=`.
pub fn parse_key_value(input: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = input.split('=').collect();
    if parts.len() != 2 {
        return Err(BuildServerError::invalid_argument(format!(
            "{input:?} is not in the form KEY=VALUE"
        )));
    }
    let key = parts[0].trim();
    if key.is_empty() {
        return Err(BuildServerError::invalid_argument(format!(
            "{input:?} has an empty key"
        )));
    }
    Ok((key.to_string(), parts[1].to_string()))
}

/// Parse build parameters. A repeated name keeps its first position and takes
/// the last value.
pub fn parse_properties<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<BuildProperty>> {
    let mut properties: Vec<BuildProperty> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let (name, value) = parse_key_value(input.as_ref())?;
        match properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => properties.push(BuildProperty { name, value }),
        }
    }
    Ok(properties)
}

/// Parse one `pipelineId=buildId` dependency.
pub fn parse_dependency(input: &str) -> Result<DependencyRef> {
    let (build_type_id, id) = parse_key_value(input)?;
    let id = id.trim().parse::<u64>().map_err(|_| {
        BuildServerError::invalid_argument(format!(
            "{input:?} is not in the form PIPELINE_ID=BUILD_ID (build id must be a number)"
        ))
    })?;
    Ok(DependencyRef { id, build_type_id })
}

pub fn parse_dependencies<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<DependencyRef>> {
    inputs
        .iter()
        .map(|input| parse_dependency(input.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(result: Result<impl std::fmt::Debug>) {
        match result {
            Err(BuildServerError::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn single_equals_splits() {
        assert_eq!(
            parse_key_value("ENV=prod").unwrap(),
            ("ENV".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_key_value("env.TARGET=").unwrap(),
            ("env.TARGET".to_string(), String::new())
        );
    }

    #[test]
    fn zero_or_many_equals_fail() {
        assert_invalid(parse_key_value("ENV"));
        assert_invalid(parse_key_value("A=B=C"));
        assert_invalid(parse_key_value("=="));
        assert_invalid(parse_key_value(""));
    }

    #[test]
    fn empty_key_fails() {
        assert_invalid(parse_key_value("=value"));
    }

    #[test]
    fn repeated_property_takes_last_value() {
        let props = parse_properties(&["A=1", "B=2", "A=3"]).unwrap();
        assert_eq!(
            props,
            vec![BuildProperty::new("A", "3"), BuildProperty::new("B", "2")]
        );
    }

    #[test]
    fn one_bad_property_fails_the_batch() {
        assert_invalid(parse_properties(&["A=1", "oops"]));
    }

    #[test]
    fn dependency_requires_numeric_build_id() {
        assert_eq!(
            parse_dependency("Lib_Build=123").unwrap(),
            DependencyRef::new("Lib_Build", 123)
        );
        assert_invalid(parse_dependency("Lib_Build=latest"));
        assert_invalid(parse_dependency("Lib_Build"));
    }

    #[test]
    fn dependencies_parse_in_order() {
        let deps = parse_dependencies(&["A=1".to_string(), "B=2".to_string()]).unwrap();
        assert_eq!(deps, vec![DependencyRef::new("A", 1), DependencyRef::new("B", 2)]);
        assert!(parse_dependencies::<String>(&[]).unwrap().is_empty());
    }
}
