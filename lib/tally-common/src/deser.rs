//! Deserialization helpers.
//!
//! This module provides helpers for handling the deserialization of common data types in more flexible and permissive
//! ways, mostly to cope with values sourced from environment variables. These helpers are designed to be used with the
//! `serde_with` crate.

use std::fmt;

use serde::{
    de::{Error, Unexpected},
    Deserializer, Serialize as _, Serializer,
};
use serde_with::{DeserializeAs, SerializeAs};

/// Permissively deserializes a boolean.
///
/// This helper allows deserializing a `bool` from a number of possible data types:
///
/// - `true` or `false` as a native boolean
/// - `"true"` or `"false"` as a string (case insensitive)
/// - `1` or `0` as an integer (signed, unsigned, or floating point)
pub struct PermissiveBool;

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> serde::de::Visitor<'vde> for Visitor {
            type Value = bool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean, string, integer, or floating-point number")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(value)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                match value.to_lowercase().as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    _ => Err(Error::invalid_value(
                        Unexpected::Str(value),
                        &"\"true\" or \"false\" (case insensitive)",
                    )),
                }
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Signed(value), &"0 or 1")),
                }
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Unsigned(value), &"0 or 1")),
                }
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if value == 0.0 {
                    Ok(false)
                } else if value == 1.0 {
                    Ok(true)
                } else {
                    Err(Error::invalid_value(Unexpected::Float(value), &"0.0 or 1.0"))
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

impl SerializeAs<bool> for PermissiveBool {
    fn serialize_as<S>(source: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.serialize(serializer)
    }
}

/// Treats empty strings as not being present for optional fields during deserialization.
///
/// Allows deserializing an `Option<String>` as `None` if a value is present but is otherwise empty, which is how an
/// unset-but-declared environment variable shows up.
pub struct EmptyStringAsNone;

impl<'de> DeserializeAs<'de, Option<String>> for EmptyStringAsNone {
    fn deserialize_as<D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> serde::de::Visitor<'vde> for Visitor {
            type Value = Option<String>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(value.to_string()))
                }
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(None)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

impl SerializeAs<Option<String>> for EmptyStringAsNone {
    fn serialize_as<S>(source: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_with::serde_as;

    use super::*;

    #[serde_as]
    #[derive(Deserialize)]
    struct Flags {
        #[serde_as(as = "PermissiveBool")]
        enabled: bool,

        #[serde_as(as = "EmptyStringAsNone")]
        #[serde(default)]
        name: Option<String>,
    }

    #[test]
    fn permissive_bool_accepts_common_forms() {
        let cases = [
            (r#"{"enabled": true}"#, true),
            (r#"{"enabled": "FALSE"}"#, false),
            (r#"{"enabled": "1"}"#, true),
            (r#"{"enabled": 0}"#, false),
            (r#"{"enabled": 1.0}"#, true),
        ];

        for (input, expected) in cases {
            let flags: Flags = serde_json::from_str(input).unwrap();
            assert_eq!(flags.enabled, expected, "input: {}", input);
        }

        assert!(serde_json::from_str::<Flags>(r#"{"enabled": "yes"}"#).is_err());
        assert!(serde_json::from_str::<Flags>(r#"{"enabled": 2}"#).is_err());
    }

    #[test]
    fn empty_string_is_none() {
        let flags: Flags = serde_json::from_str(r#"{"enabled": true, "name": ""}"#).unwrap();
        assert_eq!(flags.name, None);

        let flags: Flags = serde_json::from_str(r#"{"enabled": true, "name": "primary"}"#).unwrap();
        assert_eq!(flags.name.as_deref(), Some("primary"));

        let flags: Flags = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(flags.name, None);
    }
}
