// Property File Parser
// Parses the `key = value` files used for engine configuration

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Errors produced while reading a property file
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("Property file not found: {0}")]
    FileNotFound(String),

    #[error("Line {line}: expected `key = value`, found `{text}`")]
    InvalidFormat { line: usize, text: String },

    #[error("Invalid value for {key}: `{value}`")]
    InvalidValue { key: String, value: String },

    #[error("I/O error reading property file: {0}")]
    Io(#[from] io::Error),
}

/// Parse property text, invoking `handler` for each key-value pair.
///
/// Blank lines and lines starting with `#` are skipped, a `#` after the value
/// starts a trailing comment, and whitespace around keys and values is
/// trimmed. Values may themselves contain `=`.
pub fn parse_propfile(
    data: &str,
    handler: &mut dyn FnMut(&str, &str),
) -> Result<(), PropertyError> {
    for (index, raw) in data.lines().enumerate() {
        let line = match raw.split_once('#') {
            Some((before, _)) => before,
            None => raw,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| PropertyError::InvalidFormat {
            line: index + 1,
            text: raw.trim().to_string(),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(PropertyError::InvalidFormat {
                line: index + 1,
                text: raw.trim().to_string(),
            });
        }

        handler(key, value.trim());
    }

    Ok(())
}

/// Property file containing key-value pairs
///
/// Keys are case-insensitive and kept sorted so that saved files are stable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyFile {
    properties: BTreeMap<String, String>,
}

impl PropertyFile {
    /// Load a property file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PropertyError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => PropertyError::FileNotFound(path.display().to_string()),
            _ => PropertyError::Io(err),
        })?;
        Self::parse(&content)
    }

    /// Parse property text
    pub fn parse(content: &str) -> Result<Self, PropertyError> {
        let mut file = PropertyFile::default();
        parse_propfile(content, &mut |key, value| file.set(key, value))?;
        Ok(file)
    }

    /// Get a property value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&key.to_uppercase())
            .map(String::as_str)
    }

    /// Get a property value with a default
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a property into any `FromStr` type.
    ///
    /// Missing keys yield `Ok(None)`; present but malformed values are an error.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, PropertyError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| PropertyError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    /// Get a boolean property (`true/false`, `yes/no`, `on/off`, `1/0`)
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, PropertyError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                _ => Err(PropertyError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
            },
        }
    }

    /// Set a property value
    pub fn set(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_uppercase(), value.to_string());
    }

    /// Remove a property
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.properties.remove(&key.to_uppercase())
    }

    /// Check if a property exists
    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(&key.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate over all properties in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Save the property file to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PropertyError> {
        let mut content = String::new();
        for (key, value) in self.iter() {
            content.push_str(key);
            content.push_str(" = ");
            content.push_str(value);
            content.push('\n');
        }

        fs::write(path, content)?;
        Ok(())
    }
}
