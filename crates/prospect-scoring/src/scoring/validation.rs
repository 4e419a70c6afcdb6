//! Strict contract checks for scoring output returned by the model.
//!
//! Every violation is an `invalid_json` signal. Nothing here clamps or defaults.

use serde_json::Value;

use super::domain::ErrorCategory;

/// A model item that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredItem {
    pub score: u8,
    pub justification: String,
    /// Identity echoed by the model, if any. Never authoritative.
    pub prospect_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("model output is empty")]
    Empty,
    #[error("model output is not valid JSON: {0}")]
    Malformed(String),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("expected a JSON array")]
    NotAnArray,
    #[error("missing `{0}` field")]
    MissingField(&'static str),
    #[error("score {0} is not an integer")]
    NonIntegerScore(String),
    #[error("score {0} is outside 0..=100")]
    ScoreOutOfRange(i64),
    #[error("justification must be text")]
    InvalidJustification,
    #[error("item {index}: {source}")]
    Item {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::InvalidJson
    }
}

/// Removes a leading ```` ```lang ```` marker and a trailing ```` ``` ```` marker.
pub fn strip_code_fences(content: &str) -> &str {
    let mut text = content.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        text = rest[tag_len..].trim_start();
    }

    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }

    text
}

/// Validates one fragment holding a single `{score, justification}` object.
pub fn parse_scored_fragment(content: &str) -> Result<ScoredItem, ValidationError> {
    validate_item(&parse_json(content)?)
}

/// Validates a fragment holding an array of scored objects, preserving their order.
pub fn parse_scored_batch(content: &str) -> Result<Vec<ScoredItem>, ValidationError> {
    let Value::Array(items) = parse_json(content)? else {
        return Err(ValidationError::NotAnArray);
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            validate_item(item).map_err(|source| ValidationError::Item {
                index,
                source: Box::new(source),
            })
        })
        .collect()
}

fn parse_json(content: &str) -> Result<Value, ValidationError> {
    let text = strip_code_fences(content);
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    serde_json::from_str(text).map_err(|err| ValidationError::Malformed(err.to_string()))
}

/// Validates an already-parsed item.
pub fn validate_item(value: &Value) -> Result<ScoredItem, ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let raw_score = object
        .get("score")
        .ok_or(ValidationError::MissingField("score"))?;
    let raw_justification = object
        .get("justification")
        .ok_or(ValidationError::MissingField("justification"))?;

    let score = coerce_score(raw_score)?;
    let justification = coerce_text(raw_justification)?;

    let prospect_id = match object.get("prospect_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    Ok(ScoredItem {
        score,
        justification,
        prospect_id,
    })
}

fn coerce_score(value: &Value) -> Result<u8, ValidationError> {
    let integer = match value {
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(integer), _) => integer,
            (None, Some(float)) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
                float as i64
            }
            _ => return Err(ValidationError::NonIntegerScore(number.to_string())),
        },
        Value::String(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ValidationError::NonIntegerScore(format!("{raw:?}")))?,
        other => return Err(ValidationError::NonIntegerScore(other.to_string())),
    };

    u8::try_from(integer)
        .ok()
        .filter(|score| *score <= 100)
        .ok_or(ValidationError::ScoreOutOfRange(integer))
}

fn coerce_text(value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(ValidationError::InvalidJustification),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_in_range_scores_unchanged() {
        for score in [0, 1, 50, 99, 100] {
            let fragment = format!(r#"{{"score": {score}, "justification": "fits the ICP"}}"#);
            let item = parse_scored_fragment(&fragment).expect("valid fragment");
            assert_eq!(u32::from(item.score), score);
            assert_eq!(item.justification, "fits the ICP");
            assert_eq!(item.prospect_id, None);
        }
    }

    #[test]
    fn strips_fences_with_language_tag() {
        let fragment = "```json\n{\"score\": 72, \"justification\": \"good fit\"}\n```";
        let item = parse_scored_fragment(fragment).expect("fenced fragment parses");
        assert_eq!(item.score, 72);
        assert_eq!(strip_code_fences("  ```\n[]\n```  "), "[]");
        assert_eq!(strip_code_fences("[1]"), "[1]");
    }

    #[test]
    fn rejects_out_of_range_scores() {
        for fragment in [
            r#"{"score": 101, "justification": "x"}"#,
            r#"{"score": -1, "justification": "x"}"#,
        ] {
            let err = parse_scored_fragment(fragment).expect_err("out of range rejected");
            assert!(matches!(err, ValidationError::ScoreOutOfRange(_)));
            assert_eq!(err.category(), ErrorCategory::InvalidJson);
        }
    }

    #[test]
    fn rejects_non_integer_scores() {
        for fragment in [
            r#"{"score": 72.5, "justification": "x"}"#,
            r#"{"score": "high", "justification": "x"}"#,
            r#"{"score": true, "justification": "x"}"#,
            r#"{"score": null, "justification": "x"}"#,
        ] {
            assert!(matches!(
                parse_scored_fragment(fragment),
                Err(ValidationError::NonIntegerScore(_))
            ));
        }
    }

    #[test]
    fn coerces_integral_numbers_and_numeric_strings() {
        let item = parse_scored_fragment(r#"{"score": "64", "justification": "x"}"#)
            .expect("numeric string accepted");
        assert_eq!(item.score, 64);
        let item = parse_scored_fragment(r#"{"score": 80.0, "justification": "x"}"#)
            .expect("integral float accepted");
        assert_eq!(item.score, 80);
    }

    #[test]
    fn rejects_missing_fields_and_non_objects() {
        assert_eq!(
            parse_scored_fragment(r#"{"score": 50}"#),
            Err(ValidationError::MissingField("justification"))
        );
        assert_eq!(
            parse_scored_fragment(r#"{"justification": "x"}"#),
            Err(ValidationError::MissingField("score"))
        );
        assert_eq!(
            parse_scored_fragment(r#"[{"score": 50, "justification": "x"}]"#),
            Err(ValidationError::NotAnObject)
        );
        assert_eq!(
            parse_scored_fragment(r#"{"score": 50, "justification": null}"#),
            Err(ValidationError::InvalidJustification)
        );
        assert_eq!(parse_scored_fragment("   "), Err(ValidationError::Empty));
        assert!(matches!(
            parse_scored_fragment("{not json"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn passes_through_echoed_identity() {
        let item = parse_scored_fragment(
            r#"{"prospect_id": "p9", "score": 10, "justification": "poor fit (D)"}"#,
        )
        .expect("valid fragment");
        assert_eq!(item.prospect_id.as_deref(), Some("p9"));
    }

    #[test]
    fn parsing_is_deterministic() {
        let payload = r#"[{"score": 88, "justification": "a"}, {"score": 12, "justification": "b"}]"#;
        let first = parse_scored_batch(payload).expect("batch parses");
        let second = parse_scored_batch(payload).expect("batch parses");
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].score, 12);
    }

    #[test]
    fn batch_rejects_non_arrays_and_bad_items() {
        assert_eq!(
            parse_scored_batch(r#"{"score": 1, "justification": "x"}"#),
            Err(ValidationError::NotAnArray)
        );
        let err = parse_scored_batch(r#"[{"score": 1, "justification": "x"}, "oops"]"#)
            .expect_err("string item rejected");
        match err {
            ValidationError::Item { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(*source, ValidationError::NotAnObject);
            }
            other => panic!("expected item error, got {other:?}"),
        }
    }
}
