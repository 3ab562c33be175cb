//! Purpose: Classify JSON property names of a setting document into field tags.
//! Exports: `FieldTag`, `classify`.
//! Role: Drives the decoder's "current field" register.
//! Invariants: The lookup table is built once from each tag's canonical name and never mutated.
//! Invariants: Matching is byte-exact; anything unrecognized is `FieldTag::Other`.
use serde::de::{self, Deserialize, Deserializer, Visitor};
use std::fmt;
use std::sync::LazyLock;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FieldTag {
    #[default]
    Other,
    Key,
    Label,
    ContentType,
    Locked,
    Value,
    ETag,
    LastModified,
}

impl FieldTag {
    pub const KNOWN: [FieldTag; 7] = [
        FieldTag::Key,
        FieldTag::Label,
        FieldTag::ContentType,
        FieldTag::Locked,
        FieldTag::Value,
        FieldTag::ETag,
        FieldTag::LastModified,
    ];

    /// Property name on the wire; empty for `Other`.
    pub const fn name(self) -> &'static str {
        match self {
            FieldTag::Other => "",
            FieldTag::Key => "key",
            FieldTag::Label => "label",
            FieldTag::ContentType => "content_type",
            FieldTag::Locked => "locked",
            FieldTag::Value => "value",
            FieldTag::ETag => "etag",
            FieldTag::LastModified => "lastmodified",
        }
    }
}

static FIELD_TABLE: LazyLock<Vec<(&'static [u8], FieldTag)>> = LazyLock::new(|| {
    FieldTag::KNOWN
        .iter()
        .map(|tag| (tag.name().as_bytes(), *tag))
        .collect()
});

pub fn classify(name: &[u8]) -> FieldTag {
    FIELD_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, tag)| *tag)
        .unwrap_or(FieldTag::Other)
}

struct FieldTagVisitor;

impl Visitor<'_> for FieldTagVisitor {
    type Value = FieldTag;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a property name")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<FieldTag, E> {
        Ok(classify(value.as_bytes()))
    }

    fn visit_bytes<E: de::Error>(self, value: &[u8]) -> Result<FieldTag, E> {
        Ok(classify(value))
    }
}

impl<'de> Deserialize<'de> for FieldTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_identifier(FieldTagVisitor)
    }
}
