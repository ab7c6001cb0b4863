use crate::prelude::*;
use crate::pi30::packet::{DATA_START, TERMINATOR};
use crate::pi30::schema::{FieldKind, FieldSpec, Layout, Registry, Schema};

use {
    serde::ser::{Serialize, SerializeMap, Serializer},
    std::sync::Arc,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Raw(String),
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Raw(v) => serializer.serialize_str(v),
        }
    }
}

/// One decoded response: every field of its schema, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub command: &'static str,
    pub subtopic: &'static str,
    pub fields: Vec<(&'static str, Value)>,
}

impl DecodedRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(Value::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Raw(v)) => Some(v),
            _ => None,
        }
    }
}

// serialises as a flat JSON object, eg {"GridVoltage":229.8,...}
impl Serialize for DecodedRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Stateless payload decoder over a shared, immutable registry.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    registry: Arc<Registry>,
}

impl Decoder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn decode(&self, command: &str, payload: &str) -> Result<DecodedRecord, DecodeError> {
        let schema = self
            .registry
            .get(command)
            .ok_or_else(|| DecodeError::UnknownCommand(command.to_owned()))?;

        let cleaned = payload.strip_prefix(DATA_START).unwrap_or(payload);
        let cleaned = cleaned
            .strip_suffix(TERMINATOR as char)
            .unwrap_or(cleaned);

        let fields = match schema.layout {
            Layout::Whole(name) => {
                if cleaned.is_empty() {
                    return Err(DecodeError::EmptyPayload {
                        command: schema.command.to_owned(),
                    });
                }
                vec![(name, Value::Raw(cleaned.to_owned()))]
            }
            Layout::Fields(specs) => decode_fields(schema, specs, cleaned)?,
        };

        Ok(DecodedRecord {
            command: schema.command,
            subtopic: schema.subtopic,
            fields,
        })
    }
}

fn decode_fields(
    schema: &Schema,
    specs: &'static [FieldSpec],
    cleaned: &str,
) -> Result<Vec<(&'static str, Value)>, DecodeError> {
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();

    if tokens.len() < specs.len() {
        return Err(DecodeError::TooFewFields {
            command: schema.command.to_owned(),
            got: tokens.len(),
            want: specs.len(),
        });
    }
    if tokens.len() > specs.len() {
        trace!(
            "{}: ignoring {} trailing fields",
            schema.command,
            tokens.len() - specs.len()
        );
    }

    specs
        .iter()
        .zip(&tokens)
        .map(|(spec, token)| {
            let parse_error = || DecodeError::FieldParse {
                command: schema.command.to_owned(),
                field: spec.name,
                token: token.to_string(),
            };

            let value = match spec.kind {
                FieldKind::Float => Value::Float(token.parse().map_err(|_| parse_error())?),
                FieldKind::Int => Value::Int(token.parse().map_err(|_| parse_error())?),
                FieldKind::Raw => Value::Raw(token.to_string()),
            };

            Ok((spec.name, value))
        })
        .collect()
}
