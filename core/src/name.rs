//! Resolution of the caller-supplied `name` field.
//!
//! A caller may pass `name` as a query parameter or inside a JSON body. The
//! query parameter wins when it is present and non-empty. A body that is not
//! valid JSON, or that has no usable `name`, resolves to [`NameSource::Absent`]
//! rather than failing the request.

use serde_json::Value;

/// Where the request's `name` came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSource {
    /// Taken from the `name` query parameter
    FromQuery(String),
    /// Taken from the `name` field of a JSON body
    FromBody(String),
    /// No usable name was supplied
    Absent,
}

impl NameSource {
    /// Resolve the name from the query parameter and raw request body.
    ///
    /// Only an empty string counts as missing; names are kept verbatim. A
    /// scalar body `name` such as a number or boolean is rendered as text.
    ///
    /// # Examples
    ///
    /// ```
    /// use request_relay_core::NameSource;
    ///
    /// let source = NameSource::resolve(Some("Ada"), br#"{"name":"Grace"}"#);
    /// assert_eq!(source, NameSource::FromQuery("Ada".to_string()));
    ///
    /// let source = NameSource::resolve(None, br#"{"name":"Grace"}"#);
    /// assert_eq!(source, NameSource::FromBody("Grace".to_string()));
    ///
    /// let source = NameSource::resolve(None, br#"{"name":42}"#);
    /// assert_eq!(source, NameSource::FromBody("42".to_string()));
    ///
    /// let source = NameSource::resolve(None, b"not json");
    /// assert_eq!(source, NameSource::Absent);
    /// ```
    #[must_use]
    pub fn resolve(query: Option<&str>, body: &[u8]) -> Self {
        if let Some(name) = non_empty(query) {
            return Self::FromQuery(name.to_string());
        }

        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::Absent;
        };

        value
            .get("name")
            .and_then(scalar_text)
            .map_or(Self::Absent, Self::FromBody)
    }

    /// The resolved name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::FromQuery(name) | Self::FromBody(name) => Some(name),
            Self::Absent => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Text of a scalar JSON value; `null`, `""`, arrays and objects yield `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_query_falls_back_to_body() {
        let source = NameSource::resolve(Some(""), br#"{"name":"Grace"}"#);
        assert_eq!(source, NameSource::FromBody("Grace".to_string()));
    }

    #[test]
    fn whitespace_query_still_wins() {
        let source = NameSource::resolve(Some("  "), br#"{"name":"Grace"}"#);
        assert_eq!(source, NameSource::FromQuery("  ".to_string()));
    }

    #[test]
    fn empty_body_is_absent() {
        assert_eq!(NameSource::resolve(None, b""), NameSource::Absent);
    }

    #[test]
    fn scalar_body_names_are_rendered_as_text() {
        assert_eq!(
            NameSource::resolve(None, br#"{"name":42}"#),
            NameSource::FromBody("42".to_string())
        );
        assert_eq!(
            NameSource::resolve(None, br#"{"name":true}"#),
            NameSource::FromBody("true".to_string())
        );
    }

    #[test]
    fn null_empty_and_structured_body_names_are_absent() {
        for body in [
            br#"{"name":null}"#.as_slice(),
            br#"{"name":""}"#,
            br#"{"name":["Ada"]}"#,
            br#"{"name":{"first":"Ada"}}"#,
        ] {
            assert_eq!(NameSource::resolve(None, body), NameSource::Absent);
        }
    }

    #[test]
    fn json_array_body_is_absent() {
        assert_eq!(
            NameSource::resolve(None, br#"["Ada"]"#),
            NameSource::Absent
        );
    }

    #[test]
    fn names_are_kept_verbatim() {
        let source = NameSource::resolve(Some(" Ada "), b"");
        assert_eq!(source.name(), Some(" Ada "));

        let source = NameSource::resolve(None, br#"{"name":" Grace"}"#);
        assert_eq!(source.name(), Some(" Grace"));
    }

    proptest! {
        #[test]
        fn non_empty_query_always_wins(name in "[A-Za-z ]{1,20}", body in any::<Vec<u8>>()) {
            let source = NameSource::resolve(Some(&name), &body);
            prop_assert_eq!(source, NameSource::FromQuery(name));
        }

        #[test]
        fn arbitrary_bodies_never_panic(body in any::<Vec<u8>>()) {
            let _ = NameSource::resolve(None, &body);
        }
    }
}
