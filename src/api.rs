//! Per-API call builders.
//!
//! An [`ApiGenerator`] wraps one immutable [`ApiDescriptor`] and turns its
//! parameter grammars into either statement text (`Name(...)`, `Name = v`) or
//! a structured [`RawCall`] record that later passes can rewrite before
//! rendering.

use std::collections::BTreeMap;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::grammar::Grammar;
use crate::normalize::ValueNormalizer;

/// Parameter name meaning "pass the value positionally".
pub const NO_PARAMETER_NAME: &str = "NoParameterName";

/// Grammar output asking for any live instance expression.
pub const BUILTIN_OBJECT_TOKEN: &str = "<<BUILTINOBJ>>";

/// Grammar output asking for a side-effecting hook body.
pub const SCRIPTS_TOKEN: &str = "<<SCRIPTS>>";

/// Method return types that never yield a reusable instance.
pub const TRIVIAL_RETURN_TYPES: &[&str] = &["unknown", "Boolean", "String", "Integer", "Number", "void"];

/// Property types that never yield a reusable instance.
pub const TRIVIAL_PROPERTY_TYPES: &[&str] = &["unknown", "Boolean", "String", "Integer"];

const PAGE_PARAMETERS: &[&str] = &["nPage", "nPageNum"];

const HOOK_SLOT_REPLACEMENT_PROBABILITY: f64 = 0.1;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const PRINTABLE: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ \t\n\r\x0b\x0c";

/// Random string over `[A-Za-z0-9]`.
pub fn random_alphanumeric<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| *ALPHANUMERIC.choose(rng).unwrap_or(&b'a') as char)
        .collect()
}

/// Random string over printable ASCII plus whitespace.
pub fn random_printable<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| *PRINTABLE.choose(rng).unwrap_or(&b' ') as char)
        .collect()
}

/// Strip characters that cannot appear in a JavaScript identifier built from
/// a documented type name, e.g. `Array of Field` becomes `ArrayofField`.
pub fn normalize_return_type(return_type: &str) -> String {
    return_type
        .chars()
        .filter(|c| !matches!(c, ',' | '.' | '[' | ']' | '{' | '}' | '(' | ')' | '\'' | '"' | '<' | '>' | ' '))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    Method,
    Property,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKind::Method => "method",
            ApiKind::Property => "property",
        }
    }
}

/// Everything known about one API once its directory has been loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiDescriptor {
    pub object_name: String,
    pub api_name: String,
    pub kind: ApiKind,
    pub return_type: Option<String>,
    /// Parameter name to grammar. Empty when the API takes no parameters.
    pub params: BTreeMap<String, Grammar>,
}

impl ApiDescriptor {
    pub fn new(object_name: &str, api_name: &str, kind: ApiKind) -> Self {
        Self {
            object_name: object_name.to_string(),
            api_name: api_name.to_string(),
            kind,
            return_type: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_return_type(mut self, return_type: &str) -> Self {
        self.return_type = Some(return_type.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, grammar: Grammar) -> Self {
        self.params.insert(name.to_string(), grammar);
        self
    }

    /// `Object.api`
    pub fn key(&self) -> String {
        format!("{}.{}", self.object_name, self.api_name)
    }
}

/// Authoring errors that make a single API unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiConfigError {
    #[error("API name is empty")]
    EmptyName,

    #[error("property {key} declares {count} parameters, at most one is allowed")]
    PropertyArity { key: String, count: usize },
}

/// Structured, pre-serialization form of one API invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCall {
    pub object_name: String,
    /// Receiver expression; empty until the object generator picks one
    pub instance_name: String,
    pub api_name: String,
    pub api_kind: ApiKind,
    pub return_type: Option<String>,
    /// Fresh variable capturing the result, when the return type is useful
    pub return_value: Option<String>,
    /// Parameter name (or [`NO_PARAMETER_NAME`]) to literal text
    pub params: BTreeMap<String, String>,
}

impl RawCall {
    /// `Object.api`
    pub fn key(&self) -> String {
        format!("{}.{}", self.object_name, self.api_name)
    }
}

/// Builds calls for one API.
#[derive(Debug, Clone)]
pub struct ApiGenerator {
    descriptor: ApiDescriptor,
    normalizer: ValueNormalizer,
}

impl ApiGenerator {
    pub fn new(descriptor: ApiDescriptor) -> Result<Self, ApiConfigError> {
        if descriptor.api_name.is_empty() {
            return Err(ApiConfigError::EmptyName);
        }
        if descriptor.kind == ApiKind::Property && descriptor.params.len() > 1 {
            return Err(ApiConfigError::PropertyArity {
                key: descriptor.key(),
                count: descriptor.params.len(),
            });
        }
        Ok(Self {
            descriptor,
            normalizer: ValueNormalizer::default(),
        })
    }

    pub fn with_normalizer(mut self, normalizer: ValueNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn descriptor(&self) -> &ApiDescriptor {
        &self.descriptor
    }

    pub fn api_name(&self) -> &str {
        &self.descriptor.api_name
    }

    pub fn kind(&self) -> ApiKind {
        self.descriptor.kind
    }

    pub fn has_no_parameters(&self) -> bool {
        self.descriptor.params.is_empty()
    }

    fn is_positional(&self) -> bool {
        self.descriptor.params.len() == 1 && self.descriptor.params.contains_key(NO_PARAMETER_NAME)
    }

    /// Expand one parameter grammar, falling back to a short random string.
    fn expand_parameter<R: Rng + ?Sized>(&self, name: &str, grammar: &Grammar, rng: &mut R) -> String {
        match grammar.generate_parameter(None, rng) {
            Ok(value) => value,
            Err(e) => {
                debug!("{}.{}: {}, using fallback", self.descriptor.key(), name, e);
                random_alphanumeric(3, rng)
            }
        }
    }

    /// Value for a named method parameter, before normalization.
    fn named_parameter_value<R: Rng + ?Sized>(&self, name: &str, grammar: &Grammar, rng: &mut R) -> String {
        let value = self.expand_parameter(name, grammar, rng);
        if rng.gen_bool(HOOK_SLOT_REPLACEMENT_PROBABILITY)
            && (value == BUILTIN_OBJECT_TOKEN || value == SCRIPTS_TOKEN)
        {
            return random_printable(8, rng);
        }
        value
    }

    fn method_params<R: Rng + ?Sized>(&self, rng: &mut R) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if self.is_positional() {
            if let Some(grammar) = self.descriptor.params.get(NO_PARAMETER_NAME) {
                let raw = self.expand_parameter(NO_PARAMETER_NAME, grammar, rng);
                params.insert(NO_PARAMETER_NAME.to_string(), self.normalizer.normalize(&raw, rng));
            }
            return params;
        }
        for (name, grammar) in &self.descriptor.params {
            let raw = self.named_parameter_value(name, grammar, rng);
            let normalized = self.normalizer.normalize(&raw, rng);
            let value = if PAGE_PARAMETERS.contains(&name.as_str()) {
                rng.gen_range(0..=9u8).to_string()
            } else {
                normalized
            };
            params.insert(name.clone(), value);
        }
        params
    }

    fn property_value<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let (name, grammar) = self.descriptor.params.iter().next()?;
        let raw = self.expand_parameter(name, grammar, rng);
        Some(self.normalizer.normalize(&raw, rng))
    }

    /// Call text without a receiver, e.g. `getField({cName: "a"})`.
    pub fn generate_call_statement<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let name = &self.descriptor.api_name;
        match self.descriptor.kind {
            ApiKind::Method => {
                if self.has_no_parameters() {
                    return format!("{}({{}})", name);
                }
                let params = self.method_params(rng);
                if let Some(value) = params.get(NO_PARAMETER_NAME).filter(|_| self.is_positional()) {
                    return format!("{}({})", name, value);
                }
                let pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                format!("{}({{{}}})", name, pairs.join(", "))
            }
            ApiKind::Property => match self.property_value(rng) {
                Some(value) => format!("{} = {}", name, value),
                None => name.clone(),
            },
        }
    }

    /// Structured call record; the receiver is left empty.
    pub fn generate_call_raw<R: Rng + ?Sized>(&self, rng: &mut R) -> RawCall {
        let trivial = match self.descriptor.kind {
            ApiKind::Method => TRIVIAL_RETURN_TYPES,
            ApiKind::Property => TRIVIAL_PROPERTY_TYPES,
        };
        let return_value = self
            .descriptor
            .return_type
            .as_deref()
            .filter(|t| !t.is_empty() && !trivial.contains(t))
            .map(|t| format!("{}_{}", normalize_return_type(t), random_alphanumeric(5, rng)));

        let params = match self.descriptor.kind {
            ApiKind::Method => self.method_params(rng),
            ApiKind::Property => {
                let mut params = BTreeMap::new();
                if let Some(value) = self.property_value(rng) {
                    params.insert(self.descriptor.api_name.clone(), value);
                }
                params
            }
        };

        RawCall {
            object_name: self.descriptor.object_name.clone(),
            instance_name: String::new(),
            api_name: self.descriptor.api_name.clone(),
            api_kind: self.descriptor.kind,
            return_type: self.descriptor.return_type.clone(),
            return_value,
            params,
        }
    }
}
