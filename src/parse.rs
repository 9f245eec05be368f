use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ParseError;

/// Which top-level JSON value to look for in model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    List,
    Object,
}

impl JsonShape {
    fn opener(self) -> char {
        match self {
            JsonShape::List => '[',
            JsonShape::Object => '{',
        }
    }

    fn noun(self) -> &'static str {
        match self {
            JsonShape::List => "list",
            JsonShape::Object => "object",
        }
    }
}

/// Decode the JSON value starting at the first `[` or `{` in `text`.
///
/// Anything after the value (closing code fences, commentary) is ignored.
pub fn locate_json(text: &str, shape: JsonShape) -> Result<Value, ParseError> {
    let no_json = || ParseError::NoJson {
        expected: shape.noun(),
    };
    let start = text.find(shape.opener()).ok_or_else(no_json)?;
    let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(ParseError::Malformed(e)),
        None => Err(no_json()),
    }
}

/// Locate a JSON value and validate it against `T`.
pub fn parse_typed<T: DeserializeOwned>(text: &str, shape: JsonShape) -> Result<T, ParseError> {
    let value = locate_json(text, shape)?;
    serde_json::from_value(value).map_err(ParseError::InvalidShape)
}

/// Normalise a selector the model was asked to return verbatim.
pub fn clean_selector(response: &str) -> Option<String> {
    let selector = response.replace('`', "").replace('\'', "\"");
    let selector = selector.trim();
    (!selector.is_empty()).then(|| selector.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionStep;

    #[test]
    fn finds_object_inside_fenced_block() {
        let text = "Here you go:\n```json\n{\"action\": \"goto\", \"url\": \"https://example.com\"}\n```\nGood luck!";
        let step: ActionStep = parse_typed(text, JsonShape::Object).unwrap();
        assert_eq!(
            step,
            ActionStep::Goto {
                url: "https://example.com".into()
            }
        );
    }

    #[test]
    fn ignores_trailing_commentary_after_list() {
        let text = r#"JSON PLAN: [{"action":"finish","reason":"done"}] I hope this helps [1]"#;
        let plan: Vec<ActionStep> = parse_typed(text, JsonShape::List).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn missing_json_is_distinct_from_invalid_shape() {
        let none = locate_json("I cannot help with that.", JsonShape::Object).unwrap_err();
        assert!(matches!(none, ParseError::NoJson { expected: "object" }));

        let shape = parse_typed::<ActionStep>(r#"{"action": "scroll"}"#, JsonShape::Object).unwrap_err();
        assert!(matches!(shape, ParseError::InvalidShape(_)));

        let broken = locate_json(r#"{"action": "goto", "url": "#, JsonShape::Object).unwrap_err();
        assert!(matches!(broken, ParseError::Malformed(_)));
    }

    #[test]
    fn list_lookup_ignores_objects() {
        let err = locate_json(r#"{"action": "goto"}"#, JsonShape::List).unwrap_err();
        assert!(matches!(err, ParseError::NoJson { expected: "list" }));
    }

    #[test]
    fn selector_cleanup() {
        assert_eq!(
            clean_selector(" `[aria-label='Search']` \n").as_deref(),
            Some(r#"[aria-label="Search"]"#)
        );
        assert_eq!(clean_selector("``"), None);
        assert_eq!(clean_selector(""), None);
    }
}
