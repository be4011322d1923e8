//! Declarative context setup from a TOML file.
//!
//! ```toml
//! discovery = "declared"
//!
//! [[field]]
//! name = "locale"
//! default = "en"
//!
//! [[field]]
//! name = "request_id"
//! ```

use crate::context::{
    defaults::{DefaultPolicy, FieldSpec},
    manager::{ContextOptions, Discovery},
    value::Value,
};
use indexmap::IndexMap;
use miette::{Diagnostic, NamedSource, SourceSpan};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read {}: {error}", .path.display())]
    #[diagnostic(code(scoped_context::config::io))]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("Invalid context config: {message}")]
    #[diagnostic(code(scoped_context::config::parse))]
    Parse {
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: Option<SourceSpan>,
        message: String,
    },
    #[error("Unknown discovery mode `{value}`")]
    #[diagnostic(
        code(scoped_context::config::discovery),
        help("expected `automatic` or `declared`")
    )]
    InvalidDiscovery { value: String },
    #[error("Field `{name}` is declared more than once")]
    #[diagnostic(code(scoped_context::config::duplicate_field))]
    DuplicateField { name: String },
    #[error("Field declarations need a non-empty `name`")]
    #[diagnostic(code(scoped_context::config::empty_name))]
    EmptyFieldName,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    discovery: Option<String>,
    #[serde(default, rename = "field")]
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    name: String,
    default: Option<toml::Value>,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub discovery: Discovery,
    pub fields: Vec<FieldSpec>,
}

impl ContextConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_str_named(&path.display().to_string(), &content)
    }

    pub fn from_str_named(name: &str, source: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(source).map_err(|error| ConfigError::Parse {
            src: NamedSource::new(name, source.to_string()),
            span: error.span().map(|range| (range.start, range.len()).into()),
            message: error.message().to_string(),
        })?;

        let discovery = match raw.discovery.as_deref() {
            None | Some("automatic") => Discovery::Automatic,
            Some("declared") => Discovery::DeclaredOnly,
            Some(other) => {
                return Err(ConfigError::InvalidDiscovery {
                    value: other.to_string(),
                })
            }
        };

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(raw.fields.len());
        for entry in raw.fields {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::EmptyFieldName);
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateField { name });
            }
            let default = entry
                .default
                .map(|value| DefaultPolicy::Constant(value_from_toml(value)))
                .unwrap_or_default();
            fields.push(FieldSpec { name, default });
        }

        Ok(Self { discovery, fields })
    }

    pub fn into_options(self) -> ContextOptions {
        ContextOptions::new()
            .discovery(self.discovery)
            .fields(self.fields)
    }
}

fn value_from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(value_from_toml).collect()),
        toml::Value::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(key, value)| (key, value_from_toml(value)))
                .collect::<IndexMap<_, _>>(),
        ),
    }
}
