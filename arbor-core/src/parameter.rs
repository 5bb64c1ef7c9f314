//! Parameter constraints and their validation.
//!
//! A [`Parameter`] describes one named input of a leaf handler: its aliases,
//! whether it may be omitted, length bounds, an optional full-match pattern,
//! and whether the raw value is a list split on a separator pattern.
//!
//! Resolution applies the checks in a fixed order and stops at the first
//! violation:
//!
//! 1. count (`minCount`, `maxCount`) for multi-value parameters
//! 2. optionality
//! 3. per value: `minLength` (required parameters only), `maxLength`, pattern
//!
//! Empty entries of a multi-value list are dropped between steps 2 and 3, so
//! a list that passed `minCount` may end up shorter than `minCount`.
//!
//! ```
//! use arbor_core::{Parameter, RequestContext, Resolved};
//!
//! let tags = Parameter::new("tags").multiple(",").unwrap().min_count(1);
//! let ctx = RequestContext::new("/").with_query("tags=a,,b");
//!
//! assert_eq!(
//!     tags.resolve(&ctx).unwrap(),
//!     Resolved::Many(vec!["a".to_string(), "b".to_string()])
//! );
//! ```

use crate::context::RequestContext;
use crate::error::{Error, ErrorCode, Result, codes};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Outcome of resolving a parameter against a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Resolved {
    /// No value supplied for an optional parameter
    Absent,
    /// One raw string
    Single(String),
    /// A split list
    Many(Vec<String>),
}

impl Resolved {
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            Resolved::Single(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_many(&self) -> Option<&[String]> {
        match self {
            Resolved::Many(values) => Some(values),
            _ => None,
        }
    }

    /// Flatten into a list; `Absent` becomes empty
    pub fn into_values(self) -> Vec<String> {
        match self {
            Resolved::Absent => Vec::new(),
            Resolved::Single(value) => vec![value],
            Resolved::Many(values) => values,
        }
    }
}

/// The check that rejected a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Check {
    Optionality,
    MinLength,
    MaxLength,
    Regex,
    MinCount,
    MaxCount,
}

impl Check {
    pub fn as_str(&self) -> &'static str {
        match self {
            Check::Optionality => "optionality",
            Check::MinLength => "minLength",
            Check::MaxLength => "maxLength",
            Check::Regex => "regex",
            Check::MinCount => "minCount",
            Check::MaxCount => "maxCount",
        }
    }

    fn code(&self) -> ErrorCode {
        match self {
            Check::Optionality => codes::OPTIONALITY,
            Check::MinLength => codes::MIN_LENGTH,
            Check::MaxLength => codes::MAX_LENGTH,
            Check::Regex => codes::REGEX,
            Check::MinCount => codes::MIN_COUNT,
            Check::MaxCount => codes::MAX_COUNT,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure for a single parameter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parameter `{parameter}` failed {check} check (required: {constraint})")]
pub struct ValidationError {
    /// Canonical alias of the parameter
    pub parameter: String,
    pub check: Check,
    /// The constraint that was required
    pub constraint: String,
    /// The offending value, when there was one
    pub value: Option<String>,
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        let mut error = Error::new(err.check.code(), err.to_string())
            .with_data("parameter", err.parameter.clone())
            .with_data("check", err.check.as_str())
            .with_data("constraint", err.constraint.clone());
        if let Some(value) = &err.value {
            error = error.with_data("value", value.clone());
        }
        error
    }
}

/// Compiled regular expression that keeps its source text
#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern that must match the whole value
    fn full_match(source: &str) -> Result<Self> {
        Self::compile(source, &format!("^(?:{})$", source))
    }

    fn separator(source: &str) -> Result<Self> {
        Self::compile(source, source)
    }

    fn compile(source: &str, expr: &str) -> Result<Self> {
        let regex = Regex::new(expr).map_err(|e| {
            Error::new(
                codes::INVALID_PATTERN,
                format!("invalid pattern `{}`: {}", source, e),
            )
            .with_data("pattern", source)
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }
}

/// Named, aliasable value-constraint descriptor
#[derive(Debug, Clone)]
pub struct Parameter {
    aliases: Vec<String>,
    optional: bool,
    min_length: usize,
    max_length: usize,
    must_match: Option<Pattern>,
    split: Option<Pattern>,
    min_count: usize,
    max_count: usize,
    positional: bool,
    description: String,
}

impl Parameter {
    /// Create a required single-value parameter
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            aliases: vec![name.into().to_lowercase()],
            optional: false,
            min_length: 0,
            max_length: 0,
            must_match: None,
            split: None,
            min_count: 0,
            max_count: 0,
            positional: false,
            description: String::new(),
        }
    }

    /// Add an alternative name; duplicates (case-insensitive) are ignored
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into().to_lowercase();
        if !alias.is_empty() && !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Minimum length in characters; 0 disables the check
    pub fn min_length(mut self, length: usize) -> Self {
        self.min_length = length;
        self
    }

    /// Maximum length in characters; 0 disables the check
    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }

    /// Every value must match `pattern` in full
    pub fn must_match(mut self, pattern: &str) -> Result<Self> {
        self.must_match = Some(Pattern::full_match(pattern)?);
        Ok(self)
    }

    /// Treat the raw value as a list separated by `separator`
    pub fn multiple(mut self, separator: &str) -> Result<Self> {
        self.split = Some(Pattern::separator(separator)?);
        Ok(self)
    }

    /// Minimum list size; 0 disables the check
    pub fn min_count(mut self, count: usize) -> Self {
        self.min_count = count;
        self
    }

    /// Maximum list size; 0 disables the check
    pub fn max_count(mut self, count: usize) -> Self {
        self.max_count = count;
        self
    }

    /// Allow the value to come from the next unconsumed path segment
    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Canonical (first) alias
    pub fn name(&self) -> &str {
        &self.aliases[0]
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Check whether `name` is one of the aliases (case-insensitive)
    pub fn answers_to(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_multiple(&self) -> bool {
        self.split.is_some()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    /// Resolve and validate this parameter against a request
    pub fn resolve(&self, ctx: &RequestContext) -> std::result::Result<Resolved, ValidationError> {
        let raw = self.lookup(ctx);

        let Some(split) = &self.split else {
            return match raw {
                None if self.optional => Ok(Resolved::Absent),
                None => Err(self.violation(Check::Optionality, "a value", None)),
                Some(value) if value.is_empty() && !self.optional => {
                    Err(self.violation(Check::Optionality, "a value", Some(value)))
                }
                Some(value) => {
                    self.check_value(&value)?;
                    Ok(Resolved::Single(value))
                }
            };
        };

        let mut values: Vec<String> = match raw.as_deref() {
            Some(value) => split.regex.split(value).map(str::to_string).collect(),
            None => Vec::new(),
        };

        if self.min_count > 0
            && (!values.is_empty() || !self.optional)
            && values.len() < self.min_count
        {
            return Err(self.violation(
                Check::MinCount,
                &format!("at least {} values", self.min_count),
                raw,
            ));
        }
        if self.max_count > 0 && values.len() > self.max_count {
            return Err(self.violation(
                Check::MaxCount,
                &format!("at most {} values", self.max_count),
                raw,
            ));
        }

        if values.is_empty() {
            if self.optional {
                return Ok(Resolved::Absent);
            }
            return Err(self.violation(Check::Optionality, "at least one value", raw));
        }

        // Dropped after the count check on purpose; see module docs.
        values.retain(|value| !value.is_empty());

        for value in &values {
            self.check_value(value)?;
        }
        Ok(Resolved::Many(values))
    }

    fn lookup(&self, ctx: &RequestContext) -> Option<String> {
        self.aliases
            .iter()
            .find_map(|alias| ctx.parameter(alias))
            .or_else(|| {
                if self.positional {
                    ctx.peek_action()
                } else {
                    None
                }
            })
            .map(str::to_string)
    }

    fn check_value(&self, value: &str) -> std::result::Result<(), ValidationError> {
        let length = value.chars().count();

        if !self.optional && self.min_length > 0 && length < self.min_length {
            return Err(self.violation(
                Check::MinLength,
                &self.min_length.to_string(),
                Some(value.to_string()),
            ));
        }
        if self.max_length > 0 && length > self.max_length {
            return Err(self.violation(
                Check::MaxLength,
                &self.max_length.to_string(),
                Some(value.to_string()),
            ));
        }
        if let Some(pattern) = &self.must_match
            && !pattern.regex.is_match(value)
        {
            return Err(self.violation(Check::Regex, &pattern.source, Some(value.to_string())));
        }
        Ok(())
    }

    fn violation(&self, check: Check, constraint: &str, value: Option<String>) -> ValidationError {
        ValidationError {
            parameter: self.name().to_string(),
            check,
            constraint: constraint.to_string(),
            value,
        }
    }

    /// Serializable summary used by help output
    pub fn description(&self) -> ParameterDescription {
        ParameterDescription {
            name: self.name().to_string(),
            aliases: self.aliases[1..].to_vec(),
            description: self.description.clone(),
            optional: self.optional,
            min_length: self.min_length,
            max_length: self.max_length,
            pattern: self.must_match.as_ref().map(|p| p.source.clone()),
            separator: self.split.as_ref().map(|p| p.source.clone()),
            min_count: self.min_count,
            max_count: self.max_count,
            positional: self.positional,
        }
    }
}

/// Help-output view of a [`Parameter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescription {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub optional: bool,
    pub min_length: usize,
    pub max_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    pub min_count: usize,
    pub max_count: usize,
    pub positional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(query: &str) -> RequestContext {
        RequestContext::new("/").with_query(query)
    }

    fn check_of(result: std::result::Result<Resolved, ValidationError>) -> Check {
        result.unwrap_err().check
    }

    #[test]
    fn test_aliases_case_folded_and_unique() {
        let p = Parameter::new("Name").alias("N").alias("name").alias("n");
        assert_eq!(p.aliases(), &["name".to_string(), "n".to_string()]);
        assert!(p.answers_to("NAME"));
    }

    #[test]
    fn test_alias_lookup_in_registration_order() {
        let p = Parameter::new("user").alias("u");
        let resolved = p.resolve(&ctx("u=second&user=first")).unwrap();
        assert_eq!(resolved, Resolved::Single("first".to_string()));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let p = Parameter::new("Token");
        assert_eq!(
            p.resolve(&ctx("TOKEN=abc")).unwrap(),
            Resolved::Single("abc".to_string())
        );
    }

    #[test]
    fn test_required_missing_fails_optionality() {
        let p = Parameter::new("id");
        assert_eq!(check_of(p.resolve(&ctx(""))), Check::Optionality);
    }

    #[test]
    fn test_optional_missing_is_absent() {
        let p = Parameter::new("id").optional().min_length(3);
        assert_eq!(p.resolve(&ctx("")).unwrap(), Resolved::Absent);
    }

    #[test]
    fn test_optionality_before_length() {
        let p = Parameter::new("code").min_length(5);
        let err = p.resolve(&ctx("code=")).unwrap_err();
        assert_eq!(err.check, Check::Optionality);
        assert_eq!(err.parameter, "code");
    }

    #[test]
    fn test_optional_empty_string_is_kept() {
        let p = Parameter::new("note").optional();
        assert_eq!(
            p.resolve(&ctx("note=")).unwrap(),
            Resolved::Single(String::new())
        );
    }

    #[test]
    fn test_min_length_skipped_when_optional() {
        let p = Parameter::new("nick").optional().min_length(5);
        assert_eq!(
            p.resolve(&ctx("nick=ab")).unwrap(),
            Resolved::Single("ab".to_string())
        );

        let required = Parameter::new("nick").min_length(5);
        let err = required.resolve(&ctx("nick=ab")).unwrap_err();
        assert_eq!(err.check, Check::MinLength);
        assert_eq!(err.constraint, "5");
        assert_eq!(err.value.as_deref(), Some("ab"));
    }

    #[test]
    fn test_max_length_always_enforced() {
        let p = Parameter::new("nick").optional().max_length(3);
        assert_eq!(check_of(p.resolve(&ctx("nick=abcd"))), Check::MaxLength);
    }

    #[test]
    fn test_length_counts_characters() {
        let p = Parameter::new("word").max_length(4);
        // four byte-chars after percent decoding
        assert!(p.resolve(&ctx("word=%C3%A9t%C3")).is_ok());
    }

    #[test]
    fn test_pattern_must_match_whole_value() {
        let p = Parameter::new("id").must_match("[0-9]+").unwrap();
        assert!(p.resolve(&ctx("id=123")).is_ok());
        assert_eq!(check_of(p.resolve(&ctx("id=12a"))), Check::Regex);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = Parameter::new("id").must_match("(").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_PATTERN);
    }

    #[test]
    fn test_multi_value_drops_empty_entries() {
        let p = Parameter::new("tags").multiple(",").unwrap().min_count(1);
        assert_eq!(
            p.resolve(&ctx("tags=a,,b")).unwrap(),
            Resolved::Many(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_empty_entries_dropped_after_min_count() {
        // Three raw entries satisfy minCount before the empty ones are dropped.
        let p = Parameter::new("tags").multiple(",").unwrap().min_count(3);
        assert_eq!(
            p.resolve(&ctx("tags=a,,")).unwrap(),
            Resolved::Many(vec!["a".to_string()])
        );
    }

    #[test]
    fn test_required_multi_value_accepts_empty_raw_value() {
        // `""` splits into one empty entry, which passes optionality and is then dropped
        let p = Parameter::new("tags").multiple(",").unwrap();
        assert_eq!(p.resolve(&ctx("tags=")).unwrap(), Resolved::Many(Vec::new()));
    }

    #[test]
    fn test_multi_value_absent_optional() {
        let p = Parameter::new("tags")
            .multiple(",")
            .unwrap()
            .optional()
            .min_count(2);
        assert_eq!(p.resolve(&ctx("")).unwrap(), Resolved::Absent);
    }

    #[test]
    fn test_count_checked_before_optionality() {
        let p = Parameter::new("tags").multiple(",").unwrap().min_count(1);
        assert_eq!(check_of(p.resolve(&ctx(""))), Check::MinCount);

        let no_count = Parameter::new("tags").multiple(",").unwrap();
        assert_eq!(check_of(no_count.resolve(&ctx(""))), Check::Optionality);
    }

    #[test]
    fn test_max_count() {
        let p = Parameter::new("ids").multiple(";").unwrap().max_count(2);
        assert_eq!(check_of(p.resolve(&ctx("ids=1;2;3"))), Check::MaxCount);
    }

    #[test]
    fn test_multi_value_per_element_checks() {
        let p = Parameter::new("ids")
            .multiple(",")
            .unwrap()
            .must_match("[0-9]+")
            .unwrap();
        let err = p.resolve(&ctx("ids=1,x,3")).unwrap_err();
        assert_eq!(err.check, Check::Regex);
        assert_eq!(err.value.as_deref(), Some("x"));
    }

    #[test]
    fn test_regex_separator() {
        let p = Parameter::new("words").multiple(r"\s*,\s*").unwrap();
        assert_eq!(
            p.resolve(&ctx("words=a+,+b+,c")).unwrap().into_values(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_positional_peeks_next_segment() {
        let p = Parameter::new("id").positional();
        let ctx = RequestContext::new("/42/rest");

        assert_eq!(p.resolve(&ctx).unwrap(), Resolved::Single("42".to_string()));
        // peek, not pop
        assert_eq!(ctx.peek_action(), Some("42"));
    }

    #[test]
    fn test_explicit_value_beats_positional() {
        let p = Parameter::new("id").positional();
        let ctx = RequestContext::new("/42").with_query("id=7");
        assert_eq!(p.resolve(&ctx).unwrap(), Resolved::Single("7".to_string()));
    }

    #[test]
    fn test_validation_error_into_error() {
        let p = Parameter::new("code").min_length(5);
        let err: Error = p.resolve(&ctx("code=abc")).unwrap_err().into();

        assert_eq!(err.code(), codes::MIN_LENGTH);
        let data = err.data().unwrap();
        assert_eq!(data["parameter"], "code");
        assert_eq!(data["check"], "minLength");
        assert_eq!(data["value"], "abc");
    }

    #[test]
    fn test_description() {
        let p = Parameter::new("tags")
            .alias("t")
            .multiple(",")
            .unwrap()
            .min_count(1)
            .describe("Labels to apply");
        let d = p.description();

        assert_eq!(d.name, "tags");
        assert_eq!(d.aliases, vec!["t".to_string()]);
        assert_eq!(d.separator.as_deref(), Some(","));
        assert_eq!(d.min_count, 1);
    }
}
