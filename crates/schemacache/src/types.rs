//! Registry data model shared by the cache, the registrar and the client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Globally unique schema id assigned by the registry.
pub type SchemaId = u32;

/// Version number of a schema under a subject.
pub type SchemaVersion = u32;

/// Serialization format of a schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaFormat {
    #[default]
    Avro,
    Protobuf,
    Json,
}

impl SchemaFormat {
    /// Parse a format tag leniently: unknown or empty tags fall back to Avro.
    pub fn parse_lenient(tag: Option<&str>) -> Self {
        tag.and_then(|t| t.parse().ok()).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avro => "AVRO",
            Self::Protobuf => "PROTOBUF",
            Self::Json => "JSON",
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avro" => Ok(Self::Avro),
            "protobuf" => Ok(Self::Protobuf),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown schema format: {other}")),
        }
    }
}

/// Whether a schema describes the key or the value of a record.
///
/// Informational only: it feeds subject naming and is carried on records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaRole {
    Key,
    Value,
}

impl SchemaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Value => "value",
        }
    }
}

impl fmt::Display for SchemaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key" => Ok(Self::Key),
            "value" => Ok(Self::Value),
            other => Err(format!("unknown schema role: {other}")),
        }
    }
}

/// One registry entry. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    /// Subject the schema was found under; absent for id-only lookups
    pub subject: Option<String>,
    pub id: SchemaId,
    /// Raw schema text
    pub schema: String,
    pub format: SchemaFormat,
    pub role: Option<SchemaRole>,
}

impl SchemaRecord {
    pub fn new(id: SchemaId, schema: impl Into<String>, format: SchemaFormat) -> Self {
        Self {
            subject: None,
            id,
            schema: schema.into(),
            format,
            role: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: SchemaRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// A schema document submitted for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    pub schema: String,
    pub format: SchemaFormat,
    /// Carried onto the cached record; not sent to the registry
    pub role: Option<SchemaRole>,
}

impl SchemaDocument {
    pub fn new(schema: impl Into<String>, format: SchemaFormat) -> Self {
        Self {
            schema: schema.into(),
            format,
            role: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Option<SchemaRole>) -> Self {
        self.role = role;
        self
    }

    pub fn avro(schema: impl Into<String>) -> Self {
        Self::new(schema, SchemaFormat::Avro)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_is_case_insensitive() {
        assert_eq!("protobuf".parse::<SchemaFormat>(), Ok(SchemaFormat::Protobuf));
        assert_eq!("Json".parse::<SchemaFormat>(), Ok(SchemaFormat::Json));
        assert_eq!(" AVRO ".parse::<SchemaFormat>(), Ok(SchemaFormat::Avro));
    }

    #[test]
    fn test_format_lenient_fallback() {
        assert_eq!(SchemaFormat::parse_lenient(None), SchemaFormat::Avro);
        assert_eq!(SchemaFormat::parse_lenient(Some("")), SchemaFormat::Avro);
        assert_eq!(SchemaFormat::parse_lenient(Some("thrift")), SchemaFormat::Avro);
        assert_eq!(
            SchemaFormat::parse_lenient(Some("PROTOBUF")),
            SchemaFormat::Protobuf
        );
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("KEY".parse::<SchemaRole>(), Ok(SchemaRole::Key));
        assert_eq!("value".parse::<SchemaRole>(), Ok(SchemaRole::Value));
        assert!("header".parse::<SchemaRole>().is_err());
    }
}
