use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediagen_contracts::GenerationError;
use serde_json::{Map, Value};

/// Typed accessors over a caller-supplied parameter bag.
///
/// Numbers may arrive as JSON numbers or numeric strings, booleans as JSON
/// booleans or `"true"`/`"false"`; every accessor reports the offending key.
#[derive(Debug, Clone, Copy)]
pub struct ParamReader<'a> {
    params: &'a Map<String, Value>,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a Map<String, Value>) -> Self {
        Self { params }
    }

    fn present(&self, key: &str) -> Option<&'a Value> {
        self.params.get(key).filter(|value| match value {
            Value::Null => false,
            Value::String(text) => !text.trim().is_empty(),
            _ => true,
        })
    }

    pub fn prompt(&self, key: &str) -> Result<String, GenerationError> {
        self.required_str(key)
    }

    pub fn required_str(&self, key: &str) -> Result<String, GenerationError> {
        self.optional_str(key)?
            .ok_or_else(|| GenerationError::validation(format!("'{key}' is required")))
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<String>, GenerationError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.trim().to_string())),
            Some(scalar @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(scalar.to_string())),
            Some(_) => Err(GenerationError::validation(format!(
                "'{key}' must be a string"
            ))),
        }
    }

    pub fn int_in(
        &self,
        key: &str,
        default: Option<i64>,
        min: i64,
        max: i64,
    ) -> Result<Option<i64>, GenerationError> {
        let Some(raw) = self.present(key) else {
            return Ok(default);
        };
        let parsed = match raw {
            Value::Number(number) => number.as_i64().or_else(|| {
                number
                    .as_f64()
                    .filter(|value| value.fract() == 0.0)
                    .map(|value| value as i64)
            }),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        };
        let Some(value) = parsed else {
            return Err(GenerationError::validation(format!(
                "'{key}' must be an integer"
            )));
        };
        if value < min || value > max {
            return Err(GenerationError::validation(format!(
                "'{key}' must be between {min} and {max}, got {value}"
            )));
        }
        Ok(Some(value))
    }

    pub fn float_in(
        &self,
        key: &str,
        default: f64,
        min: f64,
        max: f64,
    ) -> Result<f64, GenerationError> {
        let Some(raw) = self.present(key) else {
            return Ok(default);
        };
        let parsed = match raw {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(value) = parsed.filter(|value| value.is_finite()) else {
            return Err(GenerationError::validation(format!(
                "'{key}' must be a number"
            )));
        };
        if value < min || value > max {
            return Err(GenerationError::validation(format!(
                "'{key}' must be between {min} and {max}, got {value}"
            )));
        }
        Ok(value)
    }

    pub fn choice(
        &self,
        key: &str,
        default: &str,
        allowed: &[&str],
    ) -> Result<String, GenerationError> {
        let value = match self.present(key) {
            None => return Ok(default.to_string()),
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Number(number)) => number.to_string(),
            Some(_) => {
                return Err(GenerationError::validation(format!(
                    "'{key}' must be one of {}",
                    allowed.join(", ")
                )))
            }
        };
        if !allowed.contains(&value.as_str()) {
            return Err(GenerationError::validation(format!(
                "'{key}' must be one of {}, got '{value}'",
                allowed.join(", ")
            )));
        }
        Ok(value)
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool, GenerationError> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(GenerationError::validation(format!(
                    "'{key}' must be true or false"
                ))),
            },
            Some(_) => Err(GenerationError::validation(format!(
                "'{key}' must be true or false"
            ))),
        }
    }

    /// An image input: http(s) and data URLs pass through, anything else is
    /// read as a local file and inlined as a base64 data URL.
    pub fn image_reference(&self, key: &str) -> Result<Option<String>, GenerationError> {
        let Some(raw) = self.optional_str(key)? else {
            return Ok(None);
        };
        if raw.starts_with("https://") || raw.starts_with("http://") || raw.starts_with("data:") {
            return Ok(Some(raw));
        }
        let path = Path::new(&raw);
        let bytes = fs::read(path).map_err(|err| {
            GenerationError::validation(format!(
                "'{key}' is neither a URL nor a readable file ({}): {err}",
                path.display()
            ))
        })?;
        let mime = mime_for_path(path).unwrap_or("image/png");
        Ok(Some(format!("data:{mime};base64,{}", BASE64.encode(bytes))))
    }

    /// Caller-supplied `extra` object, merged by the builders without
    /// overriding any field they set themselves.
    pub fn extra(&self) -> Result<Map<String, Value>, GenerationError> {
        match self.params.get("extra") {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(GenerationError::validation("'extra' must be an object")),
        }
    }
}

pub fn merge_extra(target: &mut Map<String, Value>, extra: Map<String, Value>) {
    for (key, value) in extra {
        if target.contains_key(&key) {
            continue;
        }
        target.insert(key, value);
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
