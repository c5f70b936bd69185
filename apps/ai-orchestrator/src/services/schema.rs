//! Lenient reading of model JSON into fixed output schemas.
//!
//! Models drift from the requested shape: numbers arrive as strings, lists as
//! a single string, fields go missing. Nothing here fails; every field falls
//! back to an explicit empty default and the reader records which expected
//! fields were actually present so the facade can compute a confidence score.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

pub struct SchemaReader<'a> {
    root: Option<&'a Map<String, Value>>,
    expected: usize,
    missing: Vec<&'static str>,
}

impl<'a> SchemaReader<'a> {
    /// `value` is the extracted JSON, if any. A non-object reads as all-missing.
    pub fn new(value: Option<&'a Value>) -> Self {
        Self {
            root: value.and_then(Value::as_object),
            expected: 0,
            missing: Vec::new(),
        }
    }

    fn field(&mut self, name: &'static str) -> Option<&'a Value> {
        self.expected += 1;
        let value = self.root.and_then(|m| m.get(name));
        if !value.is_some_and(has_content) {
            self.missing.push(name);
        }
        value
    }

    pub fn text(&mut self, name: &'static str) -> String {
        self.field(name).map(value_to_string).unwrap_or_default()
    }

    pub fn string_list(&mut self, name: &'static str) -> Vec<String> {
        self.field(name).map(value_to_string_list).unwrap_or_default()
    }

    /// Items that do not fit `T` are skipped.
    pub fn list<T: DeserializeOwned>(&mut self, name: &'static str) -> Vec<T> {
        match self.field(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| T::deserialize(item).ok())
                .collect(),
            Some(item @ Value::Object(_)) => T::deserialize(item).ok().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn object<T: DeserializeOwned + Default>(&mut self, name: &'static str) -> T {
        self.field(name)
            .and_then(|v| T::deserialize(v).ok())
            .unwrap_or_default()
    }

    /// Share of expected fields that were present, rounded to two decimals.
    pub fn confidence(&self) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        let present = self.expected - self.missing.len();
        round2(present as f64 / self.expected as f64)
    }

    pub fn missing(&self) -> &[&'static str] {
        &self.missing
    }

    pub fn notes(&self) -> Option<String> {
        if self.missing.is_empty() {
            None
        } else {
            Some(format!("Missing fields: {}", self.missing.join(", ")))
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn value_to_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

// Field-level helpers for nested schema structs, used as
// `#[serde(default, deserialize_with = "...")]`.

pub fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(value_to_string(&Value::deserialize(deserializer)?))
}

pub fn lenient_string_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    Ok(value_to_string_list(&Value::deserialize(deserializer)?))
}

pub fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Job {
        #[serde(default, deserialize_with = "lenient_string")]
        title: String,
        #[serde(default, deserialize_with = "lenient_string")]
        year: String,
        #[serde(default, deserialize_with = "lenient_string_list")]
        tags: Vec<String>,
        #[serde(default, deserialize_with = "lenient_f64")]
        score: f64,
        #[serde(default, deserialize_with = "lenient_i64")]
        id: Option<i64>,
    }

    #[test]
    fn test_confidence_counts_present_fields() {
        let value = json!({"name": "Ada", "skills": ["Rust"], "summary": "  "});
        let mut reader = SchemaReader::new(Some(&value));
        assert_eq!(reader.text("name"), "Ada");
        assert_eq!(reader.string_list("skills"), vec!["Rust"]);
        assert_eq!(reader.text("summary"), "");
        assert!(reader.string_list("languages").is_empty());

        assert_eq!(reader.confidence(), 0.5);
        assert_eq!(reader.missing(), &["summary", "languages"]);
        assert_eq!(reader.notes().as_deref(), Some("Missing fields: summary, languages"));
    }

    #[test]
    fn test_confidence_rounds_to_two_decimals() {
        let value = json!({"a": "x"});
        let mut reader = SchemaReader::new(Some(&value));
        reader.text("a");
        reader.text("b");
        reader.text("c");
        assert_eq!(reader.confidence(), 0.33);
    }

    #[test]
    fn test_wrong_types_fall_back_to_defaults() {
        let value = json!({"name": ["not", "a", "string"], "skills": "Rust", "jobs": "none"});
        let mut reader = SchemaReader::new(Some(&value));
        assert_eq!(reader.text("name"), "");
        assert_eq!(reader.string_list("skills"), vec!["Rust"]);
        assert!(reader.list::<Job>("jobs").is_empty());
    }

    #[test]
    fn test_non_object_root_reads_as_missing() {
        let value = json!(["unexpected"]);
        let mut reader = SchemaReader::new(Some(&value));
        assert_eq!(reader.text("name"), "");
        assert_eq!(reader.confidence(), 0.0);

        let mut empty = SchemaReader::new(None);
        assert!(empty.string_list("skills").is_empty());
        assert_eq!(empty.confidence(), 0.0);
    }

    #[test]
    fn test_nested_lenient_fields() {
        let value = json!({"jobs": [
            {"title": "Engineer", "year": 2021, "tags": "backend", "score": "87%", "id": "12"},
            {"title": 7, "score": 55.5, "id": 3.0},
            "garbage"
        ]});
        let mut reader = SchemaReader::new(Some(&value));
        let jobs: Vec<Job> = reader.list("jobs");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].year, "2021");
        assert_eq!(jobs[0].tags, vec!["backend"]);
        assert_eq!(jobs[0].score, 87.0);
        assert_eq!(jobs[0].id, Some(12));
        assert_eq!(jobs[1].title, "7");
        assert_eq!(jobs[1].id, Some(3));
        assert!(jobs[1].tags.is_empty());
    }
}
