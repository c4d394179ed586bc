//! Engine-declared options and the values applied to them

use std::collections::HashMap;
use std::fmt::Display;

use crate::error::{EngineError, Result};

/// Kind of an engine option, shared between the UCI and XBoard dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Check,
    Spin,
    Combo,
    Button,
    Reset,
    Save,
    String,
    File,
    Path,
}

impl OptionType {
    pub(crate) fn from_token(token: &str) -> Option<Self> {
        let kind = match token {
            "check" => Self::Check,
            "spin" => Self::Spin,
            "combo" => Self::Combo,
            "button" => Self::Button,
            "reset" => Self::Reset,
            "save" => Self::Save,
            "string" => Self::String,
            "file" => Self::File,
            "path" => Self::Path,
            _ => return None,
        };
        Some(kind)
    }
}

/// A value assigned to an engine option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "true"),
            Value::Bool(false) => write!(f, "false"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// Immutable description of an option the engine declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOption {
    pub name: String,
    pub kind: OptionType,
    pub default: Option<Value>,
    /// Lower bound for spin options
    pub min: Option<i64>,
    /// Upper bound for spin options
    pub max: Option<i64>,
    /// Permissible alternatives for combo options
    pub var: Vec<String>,
}

impl EngineOption {
    /// Validates a raw value against the option description and returns the
    /// typed value to apply. Buttons (and reset/save) carry no value and
    /// always yield `None`. Parsing an already parsed value is a no-op.
    pub fn parse(&self, value: &Value) -> Result<Option<Value>> {
        match self.kind {
            OptionType::Check => {
                let value = match value {
                    Value::Bool(b) => *b,
                    Value::Int(n) => *n != 0,
                    Value::Str(s) => !s.is_empty() && s != "false",
                };
                Ok(Some(Value::Bool(value)))
            }
            OptionType::Spin => {
                let value = match value {
                    Value::Int(n) => *n,
                    Value::Str(s) => s.parse().map_err(|_| {
                        EngineError::protocol(format!(
                            "expected integer for spin option {:?}, got: {:?}",
                            self.name, s
                        ))
                    })?,
                    Value::Bool(_) => {
                        return Err(EngineError::protocol(format!(
                            "expected integer for spin option {:?}, got a boolean",
                            self.name
                        )))
                    }
                };
                if let Some(min) = self.min {
                    if value < min {
                        return Err(EngineError::protocol(format!(
                            "expected value for option {:?} to be at least {min}, got: {value}",
                            self.name
                        )));
                    }
                }
                if let Some(max) = self.max {
                    if value > max {
                        return Err(EngineError::protocol(format!(
                            "expected value for option {:?} to be at most {max}, got: {value}",
                            self.name
                        )));
                    }
                }
                Ok(Some(Value::Int(value)))
            }
            OptionType::Combo => {
                let value = value.to_string();
                if !self.var.iter().any(|var| *var == value) {
                    return Err(EngineError::protocol(format!(
                        "invalid value for combo option {:?}, got: {} (available: {})",
                        self.name,
                        value,
                        self.var.join(", ")
                    )));
                }
                Ok(Some(Value::Str(value)))
            }
            OptionType::Button | OptionType::Reset | OptionType::Save => Ok(None),
            OptionType::String | OptionType::File | OptionType::Path => {
                let value = value.to_string();
                if value.contains('\n') || value.contains('\r') {
                    return Err(EngineError::protocol(format!(
                        "invalid line-break in string option {:?}",
                        self.name
                    )));
                }
                Ok(Some(Value::Str(value)))
            }
        }
    }
}

/// Mapping from option name to `V`.
///
/// UCI matches option names case-insensitively while XBoard is
/// case-sensitive; both variants preserve the original casing of the last
/// insert for iteration.
#[derive(Debug, Clone)]
pub struct OptionMap<V> {
    store: HashMap<String, (String, V)>,
    fold_case: bool,
}

impl<V> OptionMap<V> {
    /// An empty map with case-insensitive keys (UCI)
    pub fn case_insensitive() -> Self {
        Self {
            store: HashMap::new(),
            fold_case: true,
        }
    }

    /// An empty map with case-sensitive keys (XBoard)
    pub fn case_sensitive() -> Self {
        Self {
            store: HashMap::new(),
            fold_case: false,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.fold_case {
            name.to_lowercase()
        } else {
            name.to_owned()
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();
        let key = self.key(&name);
        self.store.insert(key, (name, value));
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.store.get(&self.key(name)).map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.contains_key(&self.key(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.store.remove(&self.key(name)).map(|(_, value)| value)
    }

    /// Iterates entries with the casing the names were last inserted with
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.store.values().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.store.values().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl<V: PartialEq> PartialEq for OptionMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin(name: &str, default: i64, min: i64, max: i64) -> EngineOption {
        EngineOption {
            name: name.into(),
            kind: OptionType::Spin,
            default: Some(Value::Int(default)),
            min: Some(min),
            max: Some(max),
            var: vec![],
        }
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut map = OptionMap::case_insensitive();
        map.insert("Hash", 256);

        assert_eq!(map.get("hash"), Some(&256));
        assert_eq!(map.get("HASH"), Some(&256));
        assert!(map.contains("hAsH"));
        assert_eq!(map.get("Has"), None);
    }

    #[test]
    fn iteration_keeps_last_casing() {
        let mut map = OptionMap::case_insensitive();
        map.insert("Hash", 1);
        map.insert("HASH", 2);

        assert_eq!(map.len(), 1);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![("HASH", &2)]);

        let copy = map.clone();
        assert_eq!(copy.get("hash"), Some(&2));
        assert_eq!(copy.iter().collect::<Vec<_>>(), vec![("HASH", &2)]);
        assert_eq!(copy, map);
    }

    #[test]
    fn case_sensitive_lookup() {
        let mut map = OptionMap::case_sensitive();
        map.insert("memory", 16);

        assert_eq!(map.get("memory"), Some(&16));
        assert_eq!(map.get("Memory"), None);
    }

    #[test]
    fn check_parsing() {
        let option = EngineOption {
            name: "Ponder".into(),
            kind: OptionType::Check,
            default: Some(Value::Bool(false)),
            min: None,
            max: None,
            var: vec![],
        };

        assert_eq!(option.parse(&"true".into()), Ok(Some(Value::Bool(true))));
        assert_eq!(option.parse(&"false".into()), Ok(Some(Value::Bool(false))));
        // Any raw value other than "false" is truthy
        assert_eq!(option.parse(&"yes".into()), Ok(Some(Value::Bool(true))));
        assert_eq!(option.parse(&"".into()), Ok(Some(Value::Bool(false))));
        assert_eq!(option.parse(&true.into()), Ok(Some(Value::Bool(true))));
    }

    #[test]
    fn spin_parsing() {
        let option = spin("Hash", 16, 1, 1024);

        assert_eq!(option.parse(&128i64.into()), Ok(Some(Value::Int(128))));
        assert_eq!(option.parse(&"64".into()), Ok(Some(Value::Int(64))));
        assert!(option.parse(&0i64.into()).is_err());
        assert!(option.parse(&4096i64.into()).is_err());
        assert!(option.parse(&"many".into()).is_err());
    }

    #[test]
    fn combo_parsing() {
        let option = EngineOption {
            name: "Style".into(),
            kind: OptionType::Combo,
            default: Some(Value::Str("Normal".into())),
            min: None,
            max: None,
            var: vec!["Solid".into(), "Normal".into(), "Risky".into()],
        };

        assert_eq!(
            option.parse(&"Risky".into()),
            Ok(Some(Value::Str("Risky".into())))
        );
        assert!(option.parse(&"Wild".into()).is_err());
    }

    #[test]
    fn button_yields_nothing() {
        let option = EngineOption {
            name: "Clear Hash".into(),
            kind: OptionType::Button,
            default: None,
            min: None,
            max: None,
            var: vec![],
        };

        assert_eq!(option.parse(&"anything".into()), Ok(None));
    }

    #[test]
    fn string_rejects_line_breaks() {
        let option = EngineOption {
            name: "SyzygyPath".into(),
            kind: OptionType::Path,
            default: Some(Value::Str("".into())),
            min: None,
            max: None,
            var: vec![],
        };

        assert!(option.parse(&"/tables".into()).is_ok());
        assert!(option.parse(&"/tab\nles".into()).is_err());
    }

    #[test]
    fn parsing_is_idempotent() {
        let option = spin("Threads", 1, 1, 64);
        let parsed = option.parse(&"8".into()).unwrap().unwrap();
        assert_eq!(option.parse(&parsed), Ok(Some(parsed.clone())));
    }
}
