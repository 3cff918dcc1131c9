//! Type domains - named rules that coerce raw command tokens into typed values

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex_lite::Regex;
use serde::Serialize;

/// A typed value produced by the parser
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Date(NaiveDateTime),
    List(Vec<ArgValue>),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(n) => Some(*n),
            ArgValue::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Integer(n) => Some(*n as f64),
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ArgValue]> {
        match self {
            ArgValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Integer(n) => write!(f, "{}", n),
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Text(s) => write!(f, "{}", s),
            ArgValue::Date(d) => write!(f, "{}", d),
            ArgValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(" "))
            }
        }
    }
}

/// Transform callback: raw token in, typed value or failure message out
pub type Transform = Arc<dyn Fn(&str) -> Result<ArgValue, String> + Send + Sync>;

/// A registered domain
#[derive(Clone)]
pub struct DomainConfig {
    pub transform: Transform,
    /// Greedy domains consume the remainder of the line unsplit
    pub greedy: bool,
}

/// How a slot's value is coerced
#[derive(Clone)]
pub enum ValueType {
    /// A domain looked up in the registry by name
    Named(String),
    /// An ad-hoc transform
    Function(Transform),
    /// The token must match this pattern
    Pattern(Regex),
    /// The token must be one of these values
    OneOf(Vec<String>),
}

impl ValueType {
    pub fn named(name: impl Into<String>) -> Self {
        ValueType::Named(name.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<ArgValue, String> + Send + Sync + 'static,
    {
        ValueType::Function(Arc::new(f))
    }

    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, ValueType::Named(n) if n == name)
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Named(name) => write!(f, "Named({})", name),
            ValueType::Function(_) => write!(f, "Function(..)"),
            ValueType::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            ValueType::OneOf(values) => write!(f, "OneOf({:?})", values),
        }
    }
}

/// Registry of named domains, owned by whoever parses commands
pub struct TypeRegistry {
    domains: HashMap<String, DomainConfig>,
}

impl TypeRegistry {
    /// Registry preloaded with the built-in domains
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("string", |s| Ok(ArgValue::Text(s.to_string())), false);
        registry.register("text", |s| Ok(ArgValue::Text(s.to_string())), true);
        registry.register("boolean", |_| Ok(ArgValue::Bool(true)), false);
        registry.register("number", parse_number, false);
        registry.register("integer", parse_integer, false);
        registry.register("date", parse_date, false);
        registry
    }

    pub fn empty() -> Self {
        Self {
            domains: HashMap::new(),
        }
    }

    /// Register (or replace) a named domain
    pub fn register<F>(&mut self, name: impl Into<String>, transform: F, greedy: bool)
    where
        F: Fn(&str) -> Result<ArgValue, String> + Send + Sync + 'static,
    {
        self.domains.insert(
            name.into(),
            DomainConfig {
                transform: Arc::new(transform),
                greedy,
            },
        );
    }

    pub fn resolve(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.get(name)
    }

    /// The transform a slot type resolves to, if any
    pub fn transform_for(&self, ty: &ValueType) -> Option<Transform> {
        match ty {
            ValueType::Named(name) => self.resolve(name).map(|d| d.transform.clone()),
            ValueType::Function(f) => Some(f.clone()),
            ValueType::Pattern(re) => {
                let re = re.clone();
                Some(Arc::new(move |s: &str| {
                    if re.is_match(s) {
                        Ok(ArgValue::Text(s.to_string()))
                    } else {
                        Err("value does not match the expected pattern".to_string())
                    }
                }))
            }
            ValueType::OneOf(values) => {
                let values = values.clone();
                Some(Arc::new(move |s: &str| {
                    if values.iter().any(|v| v == s) {
                        Ok(ArgValue::Text(s.to_string()))
                    } else {
                        Err(format!("expected one of {}", values.join(", ")))
                    }
                }))
            }
        }
    }

    pub fn is_greedy(&self, ty: &ValueType) -> bool {
        match ty {
            ValueType::Named(name) => self.resolve(name).map(|d| d.greedy).unwrap_or(false),
            _ => false,
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(source: &str) -> Result<ArgValue, String> {
    match source.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(ArgValue::Number(value)),
        _ => Err("invalid number".to_string()),
    }
}

/// Largest magnitude an `f64` holds without gaps between integers
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

fn parse_integer(source: &str) -> Result<ArgValue, String> {
    let source = source.trim();
    if let Ok(value) = source.parse::<i64>() {
        return Ok(ArgValue::Integer(value));
    }
    // forms like `1e3` or `12.0`
    match source.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 && value.abs() <= MAX_EXACT_FLOAT_INT => {
            Ok(ArgValue::Integer(value as i64))
        }
        _ => Err("invalid integer".to_string()),
    }
}

fn parse_date(source: &str) -> Result<ArgValue, String> {
    let source = source.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(source) {
        return Ok(ArgValue::Date(dt.naive_utc()));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(source, format) {
            return Ok(ArgValue::Date(dt));
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(source, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(ArgValue::Date(dt));
            }
        }
    }
    Err("invalid date".to_string())
}

/// Numeric parse used when a slot has no transform. Only accepts values that print back the same.
pub fn lossless_number(source: &str) -> Option<ArgValue> {
    if let Ok(n) = source.parse::<i64>() {
        return (n.to_string() == source).then_some(ArgValue::Integer(n));
    }
    match source.parse::<f64>() {
        Ok(n) if n.is_finite() && n.to_string() == source => Some(ArgValue::Number(n)),
        _ => None,
    }
}
