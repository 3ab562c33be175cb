//! Purpose: Decode setting documents (one object, or one array of objects) from a byte buffer.
//! Exports: `decode_setting`, `decode_batch`, `Decoded`.
//! Role: Token-driven field dispatch on top of `serde_json`'s deserializer.
//! Invariants: A "current field" register names the property whose value is being read;
//! Invariants: it is reset to `FieldTag::Other` after every assignment or skip.
//! Invariants: Unknown properties never mutate the setting; repeated properties are last-write-wins.
//! Notes: Failures carry the byte offset and, when inside a value, the field being decoded.
//! Notes: Numbers in text fields are stored in canonical form, not as written
//! Notes: (`1.50` becomes `"1.5"`, `1e2` becomes `"100"`); integers keep their digits.
use crate::core::error::{Error, ErrorKind};
use crate::core::field::FieldTag;
use crate::core::setting::ConfigurationSetting;
use serde::de::{
    self, Deserialize, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor,
};
use serde_json::error::Category;
use std::cell::Cell;
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A decoded value plus the number of input bytes it spans.
#[derive(Debug)]
pub struct Decoded<T> {
    pub value: T,
    pub consumed: usize,
}

/// Decodes a single setting object.
pub fn decode_setting(input: &[u8]) -> Result<ConfigurationSetting, Error> {
    let register = Cell::new(FieldTag::Other);
    let mut deserializer = serde_json::Deserializer::from_slice(input);
    SettingSeed {
        register: &register,
    }
    .deserialize(&mut deserializer)
    .and_then(|setting| deserializer.end().map(|()| setting))
    .map_err(|err| decode_error(err, input, register.get()))
}

/// Decodes a top-level array of setting objects, preserving source order.
///
/// `consumed` ends at the array's closing bracket; only whitespace may follow it.
pub fn decode_batch(input: &[u8]) -> Result<Decoded<Vec<ConfigurationSetting>>, Error> {
    let register = Cell::new(FieldTag::Other);
    let mut deserializer = serde_json::Deserializer::from_slice(input);
    let settings = BatchSeed {
        register: &register,
    }
    .deserialize(&mut deserializer)
    .and_then(|settings| deserializer.end().map(|()| settings))
    .map_err(|err| decode_error(err, input, register.get()))?;

    let consumed = input
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    Ok(Decoded {
        value: settings,
        consumed,
    })
}

#[derive(Clone, Copy)]
struct SettingSeed<'r> {
    register: &'r Cell<FieldTag>,
}

impl<'de> DeserializeSeed<'de> for SettingSeed<'_> {
    type Value = ConfigurationSetting;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for SettingSeed<'_> {
    type Value = ConfigurationSetting;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a setting object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut setting = ConfigurationSetting::default();
        while let Some(tag) = map.next_key::<FieldTag>()? {
            self.register.set(tag);
            match tag {
                FieldTag::Key => {
                    if let Some(key) = map.next_value::<Scalar>()?.0 {
                        setting.key = key;
                    }
                }
                FieldTag::Label => assign(&mut setting.label, map.next_value()?),
                FieldTag::ContentType => assign(&mut setting.content_type, map.next_value()?),
                FieldTag::Value => assign(&mut setting.value, map.next_value()?),
                FieldTag::ETag => assign(&mut setting.etag, map.next_value()?),
                FieldTag::Locked => setting.locked = map.next_value::<bool>()?,
                FieldTag::LastModified => {
                    if let Some(text) = map.next_value::<Option<String>>()? {
                        let parsed = OffsetDateTime::parse(&text, &Rfc3339).map_err(|err| {
                            <A::Error as de::Error>::custom(format!("bad timestamp: {err}"))
                        })?;
                        setting.last_modified = Some(parsed);
                    }
                }
                FieldTag::Other => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
            self.register.set(FieldTag::Other);
        }
        Ok(setting)
    }
}

fn assign(slot: &mut Option<String>, scalar: Scalar) {
    if let Some(text) = scalar.0 {
        *slot = Some(text);
    }
}

struct BatchSeed<'r> {
    register: &'r Cell<FieldTag>,
}

impl<'de> DeserializeSeed<'de> for BatchSeed<'_> {
    type Value = Vec<ConfigurationSetting>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for BatchSeed<'_> {
    type Value = Vec<ConfigurationSetting>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of setting objects")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut settings = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        let seed = SettingSeed {
            register: self.register,
        };
        while let Some(setting) = seq.next_element_seed(seed)? {
            settings.push(setting);
        }
        Ok(settings)
    }
}

/// Text form of a scalar token. `null` decodes to `None` and leaves the field untouched.
struct Scalar(Option<String>);

struct ScalarVisitor;

impl Visitor<'_> for ScalarVisitor {
    type Value = Scalar;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number or boolean")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Scalar, E> {
        Ok(Scalar(Some(value.to_owned())))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Scalar, E> {
        Ok(Scalar(Some(value)))
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Scalar, E> {
        Ok(Scalar(Some(value.to_string())))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Scalar, E> {
        Ok(Scalar(Some(value.to_string())))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Scalar, E> {
        Ok(Scalar(Some(value.to_string())))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Scalar, E> {
        Ok(Scalar(Some(value.to_string())))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Scalar, E> {
        Ok(Scalar(None))
    }

    fn visit_none<E: de::Error>(self) -> Result<Scalar, E> {
        Ok(Scalar(None))
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScalarVisitor)
    }
}

fn decode_error(err: serde_json::Error, input: &[u8], field: FieldTag) -> Error {
    let (kind, message) = match err.classify() {
        Category::Data => (ErrorKind::Format, "unexpected value in settings document"),
        Category::Syntax => (ErrorKind::Decode, "malformed settings document"),
        Category::Eof => (ErrorKind::Decode, "truncated settings document"),
        Category::Io => (ErrorKind::Io, "failed to read settings document"),
    };
    let offset = byte_offset(input, err.line(), err.column());
    let mut decoded = Error::new(kind).with_message(message).with_offset(offset);
    if field != FieldTag::Other {
        decoded = decoded.with_field(field.name());
    }
    decoded.with_source(err)
}

// serde_json reports 1-based lines and the byte column reached on that line.
fn byte_offset(input: &[u8], line: usize, column: usize) -> u64 {
    let line_start: usize = input
        .split_inclusive(|byte| *byte == b'\n')
        .take(line.saturating_sub(1))
        .map(<[u8]>::len)
        .sum();
    (line_start + column).min(input.len()) as u64
}

#[cfg(test)]
mod tests {
    use super::{byte_offset, decode_batch, decode_setting};
    use crate::core::error::ErrorKind;
    use time::macros::datetime;

    #[test]
    fn decodes_recognized_fields() {
        let input =
            br#"{"key":"k1","value":"v1","content_type":"text/plain","locked":true,"etag":"e1"}"#;
        let setting = decode_setting(input).expect("setting");
        assert_eq!(setting.key, "k1");
        assert_eq!(setting.value.as_deref(), Some("v1"));
        assert_eq!(setting.content_type.as_deref(), Some("text/plain"));
        assert_eq!(setting.etag.as_deref(), Some("e1"));
        assert!(setting.locked);
        assert_eq!(setting.label, None);
    }

    #[test]
    fn repeated_field_keeps_last_value() {
        let setting = decode_setting(br#"{"value":"a","value":"b"}"#).expect("setting");
        assert_eq!(setting.value.as_deref(), Some("b"));
    }

    #[test]
    fn null_leaves_previous_value_in_place() {
        let setting = decode_setting(br#"{"label":"prod","label":null}"#).expect("setting");
        assert_eq!(setting.label.as_deref(), Some("prod"));
    }

    #[test]
    fn non_string_scalars_are_kept_as_text() {
        let setting = decode_setting(br#"{"value":42,"etag":false}"#).expect("setting");
        assert_eq!(setting.value.as_deref(), Some("42"));
        assert_eq!(setting.etag.as_deref(), Some("false"));
    }

    #[test]
    fn numbers_are_stored_in_canonical_form() {
        let setting =
            decode_setting(br#"{"value":1.50,"label":1e2,"etag":18446744073709551615}"#)
                .expect("setting");
        assert_eq!(setting.value.as_deref(), Some("1.5"));
        assert_eq!(setting.label.as_deref(), Some("100"));
        assert_eq!(setting.etag.as_deref(), Some("18446744073709551615"));
    }

    #[test]
    fn unknown_fields_are_skipped_including_nested_values() {
        let input = br#"{"tags":{"env":"prod","value":"x"},"extra":[1,{"key":"z"}],"key":"k"}"#;
        let setting = decode_setting(input).expect("setting");
        assert_eq!(setting.key, "k");
        assert_eq!(setting.value, None);
    }

    #[test]
    fn locked_rejects_non_boolean_tokens() {
        for input in [
            br#"{"locked":"true"}"#.as_slice(),
            br#"{"locked":1}"#.as_slice(),
            br#"{"locked":null}"#.as_slice(),
        ] {
            let err = decode_setting(input).expect_err("locked must be boolean");
            assert_eq!(err.kind(), ErrorKind::Format);
            assert_eq!(err.field(), Some("locked"));
        }
    }

    #[test]
    fn last_modified_parses_rfc3339() {
        let setting =
            decode_setting(br#"{"lastmodified":"2024-03-01T10:20:30Z"}"#).expect("setting");
        assert_eq!(setting.last_modified, Some(datetime!(2024-03-01 10:20:30 UTC)));
    }

    #[test]
    fn last_modified_rejects_bad_timestamps() {
        let err = decode_setting(br#"{"lastmodified":"yesterday"}"#).expect_err("bad date");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.field(), Some("lastmodified"));
    }

    #[test]
    fn truncated_document_is_a_decode_error() {
        let err = decode_setting(br#"{"key":"k1","value":"#).expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.field(), Some("value"));
    }

    #[test]
    fn syntax_error_reports_offset_without_field() {
        let err = decode_setting(b"{\"key\":\"k\",,}").expect_err("syntax");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.field(), None);
        assert!(matches!(err.offset(), Some(11..=12)));
    }

    #[test]
    fn setting_document_must_be_an_object() {
        let err = decode_setting(br#"[{"key":"a"}]"#).expect_err("array");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn batch_preserves_order_and_reports_consumed() {
        let input = b"[{\"key\":\"a\"},{\"key\":\"b\",\"locked\":false},{\"key\":\"c\"}]\n ";
        let decoded = decode_batch(input).expect("batch");
        let keys: Vec<_> = decoded.value.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(decoded.consumed, input.len() - 2);
        assert_eq!(input[decoded.consumed - 1], b']');
    }

    #[test]
    fn batch_starts_each_object_fresh() {
        let decoded = decode_batch(br#"[{"key":"a","value":"1","locked":true},{"key":"b"}]"#)
            .expect("batch");
        assert_eq!(decoded.value[1].value, None);
        assert!(!decoded.value[1].locked);
    }

    #[test]
    fn empty_batch_is_valid() {
        let decoded = decode_batch(b"[]").expect("batch");
        assert!(decoded.value.is_empty());
        assert_eq!(decoded.consumed, 2);
    }

    #[test]
    fn batch_rejects_bare_object() {
        let err = decode_batch(br#"{"key":"a"}"#).expect_err("object");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn batch_rejects_trailing_content() {
        let err = decode_batch(br#"[{"key":"a"}] []"#).expect_err("trailing");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn batch_error_names_field_of_failing_element() {
        let err = decode_batch(br#"[{"key":"a"},{"locked":"no"}]"#).expect_err("locked");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.field(), Some("locked"));
    }

    #[test]
    fn byte_offset_accounts_for_lines() {
        let input = b"{\n  \"a\": 1,\n  bad\n}";
        assert_eq!(byte_offset(input, 3, 3), 15);
        assert_eq!(byte_offset(input, 1, 1), 1);
        assert_eq!(byte_offset(input, 9, 9), input.len() as u64);
    }
}
