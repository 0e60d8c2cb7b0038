//! Subject naming strategies.
//!
//! A subject groups schema versions in the registry. Producers derive it
//! from the topic name, the role of the schema (key or value) and, for some
//! strategies, the fully qualified record type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::SchemaRole;

/// Computes a subject name from a topic, an optional role and an optional record type.
pub trait SubjectNameStrategy: Send + Sync {
    fn subject_name(
        &self,
        topic: &str,
        role: Option<SchemaRole>,
        record_type: Option<&str>,
    ) -> String;
}

/// `<topic>-key` / `<topic>-value`, or `<topic>` when no role is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopicNameStrategy;

impl SubjectNameStrategy for TopicNameStrategy {
    fn subject_name(&self, topic: &str, role: Option<SchemaRole>, _record_type: Option<&str>) -> String {
        match role {
            Some(role) => format!("{topic}-{role}"),
            None => topic.to_string(),
        }
    }
}

/// `<topic>-<recordType>`, falling back to [`TopicNameStrategy`] without a record type.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopicRecordNameStrategy;

impl SubjectNameStrategy for TopicRecordNameStrategy {
    fn subject_name(&self, topic: &str, role: Option<SchemaRole>, record_type: Option<&str>) -> String {
        match non_blank(record_type) {
            Some(record_type) => format!("{topic}-{record_type}"),
            None => TopicNameStrategy.subject_name(topic, role, None),
        }
    }
}

/// `<recordType>`, falling back to `<topic>` without a record type.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordNameStrategy;

impl SubjectNameStrategy for RecordNameStrategy {
    fn subject_name(&self, topic: &str, _role: Option<SchemaRole>, record_type: Option<&str>) -> String {
        non_blank(record_type).unwrap_or(topic).to_string()
    }
}

/// Built-in strategy selector, as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectNameStrategyKind {
    TopicName,
    TopicRecordName,
    RecordName,
}

impl SubjectNameStrategyKind {
    pub fn subject_name(
        &self,
        topic: &str,
        role: Option<SchemaRole>,
        record_type: Option<&str>,
    ) -> String {
        match self {
            Self::TopicName => TopicNameStrategy.subject_name(topic, role, record_type),
            Self::TopicRecordName => TopicRecordNameStrategy.subject_name(topic, role, record_type),
            Self::RecordName => RecordNameStrategy.subject_name(topic, role, record_type),
        }
    }
}

impl fmt::Display for SubjectNameStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopicName => write!(f, "topic_name"),
            Self::TopicRecordName => write!(f, "topic_record_name"),
            Self::RecordName => write!(f, "record_name"),
        }
    }
}

impl FromStr for SubjectNameStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "topicname" | "topicnamestrategy" => Ok(Self::TopicName),
            "topicrecordname" | "topicrecordnamestrategy" => Ok(Self::TopicRecordName),
            "recordname" | "recordnamestrategy" => Ok(Self::RecordName),
            other => Err(format!("unknown subject name strategy: {other}")),
        }
    }
}

/// Subject naming used when no strategy is configured: topic-record naming
/// when a record type is given, topic naming otherwise.
pub fn legacy_subject_name(topic: &str, role: Option<SchemaRole>, record_type: Option<&str>) -> String {
    if non_blank(record_type).is_some() {
        TopicRecordNameStrategy.subject_name(topic, role, record_type)
    } else {
        TopicNameStrategy.subject_name(topic, role, record_type)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
