//! Localized strings.
//!
//! Dictionaries are nested TOML tables flattened to dotted keys
//! (`results.summary.confidence`). Values may contain `{{name}}` placeholders.
//! Lookups fall back to English, then to the key itself.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

const EN_SOURCE: &str = include_str!("../locales/en.toml");
const VI_SOURCE: &str = include_str!("../locales/vi.toml");

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Locale {
    #[default]
    En,
    Vi,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Vi];

    pub fn code(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Vi => "vi",
        }
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().to_lowercase();
        // Accept region-qualified tags such as vi-VN or en_US.
        let language = code.split(['-', '_']).next().unwrap_or("");
        match language {
            "en" => Ok(Locale::En),
            "vi" => Ok(Locale::Vi),
            _ => Err(Error::Config(format!(
                "unsupported locale '{}'; expected en or vi",
                s
            ))),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Flat key to message map for one locale.
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    messages: HashMap<String, String>,
}

impl Dictionary {
    pub fn parse(source: &str) -> Result<Self> {
        let table: toml::Table = source
            .parse()
            .map_err(|e: toml::de::Error| Error::Config(format!("invalid dictionary: {}", e)))?;
        let mut messages = HashMap::new();
        flatten("", &table, &mut messages)?;
        Ok(Self { messages })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.messages.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Add or replace entries from another dictionary.
    pub fn merge(&mut self, other: Dictionary) {
        self.messages.extend(other.messages);
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) -> Result<()> {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        match value {
            toml::Value::String(text) => {
                out.insert(key, text.clone());
            }
            toml::Value::Table(nested) => flatten(&key, nested, out)?,
            other => {
                return Err(Error::Config(format!(
                    "dictionary entry '{}' must be a string, got {}",
                    key,
                    other.type_str()
                )))
            }
        }
    }
    Ok(())
}

/// Runtime-switchable message catalog.
#[derive(Clone, Debug)]
pub struct Catalog {
    locale: Locale,
    dictionaries: HashMap<Locale, Dictionary>,
}

impl Catalog {
    /// Catalog with the embedded English and Vietnamese dictionaries.
    pub fn builtin(locale: Locale) -> Result<Self> {
        let mut dictionaries = HashMap::new();
        dictionaries.insert(Locale::En, Dictionary::parse(EN_SOURCE)?);
        dictionaries.insert(Locale::Vi, Dictionary::parse(VI_SOURCE)?);
        Ok(Self {
            locale,
            dictionaries,
        })
    }

    /// Catalog over caller-supplied dictionaries.
    pub fn with_dictionaries(locale: Locale, dictionaries: HashMap<Locale, Dictionary>) -> Self {
        Self {
            locale,
            dictionaries,
        }
    }

    /// Overlay extra entries onto a locale, e.g. from a user-provided file.
    pub fn extend(&mut self, locale: Locale, dictionary: Dictionary) {
        self.dictionaries.entry(locale).or_default().merge(dictionary);
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn set_locale(&mut self, locale: Locale) {
        self.locale = locale;
    }

    pub fn t(&self, key: &str) -> String {
        self.t_with(key, &[])
    }

    /// Look up a message and substitute `{{name}}` placeholders.
    pub fn t_with(&self, key: &str, args: &[(&str, &str)]) -> String {
        match self.lookup(key) {
            Some(template) => interpolate(template, args),
            None => {
                log::warn!("missing message '{}' for locale {}", key, self.locale);
                key.to_string()
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        self.dictionaries
            .get(&self.locale)
            .and_then(|d| d.get(key))
            .or_else(|| self.dictionaries.get(&Locale::En).and_then(|d| d.get(key)))
    }
}

/// Replace `{{name}}` placeholders. Unknown placeholders are left as written.
pub fn interpolate(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match args.iter().find(|(arg, _)| *arg == name) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
