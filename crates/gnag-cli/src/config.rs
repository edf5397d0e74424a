use anyhow::{bail, Context};
use gnag_atn::{ast::Ast, grammar::CompileOptions};
use serde::Deserialize;
use serde_json::Value;

/// Grammar as handed over by a front end.
#[derive(Deserialize)]
pub struct GrammarFile {
    /// Tokens declared without a lexer rule, defined before any rule.
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Deserialize)]
pub struct RuleEntry {
    #[serde(default)]
    pub fragment: bool,
    #[serde(default, rename = "leftRecursive")]
    pub left_recursive: bool,
    pub tree: Ast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryConfigValue {
    Disable,
    #[default]
    Enable,
}

impl From<BinaryConfigValue> for bool {
    fn from(value: BinaryConfigValue) -> Self {
        value == BinaryConfigValue::Enable
    }
}

pub struct Config {
    pub collapse_sets: bool,
    pub classify_left_recursion: bool,
}

impl Config {
    pub fn new(value: Option<Value>) -> anyhow::Result<Self> {
        let mut value = match value {
            Some(value) => value,
            None => Value::Object(Default::default()),
        };
        let Value::Object(fields) = &mut value else {
            bail!("options is not an object");
        };

        let collapse_sets: Option<BinaryConfigValue> = read_field(fields, "collapseSets")?;
        let classify_left_recursion: Option<BinaryConfigValue> =
            read_field(fields, "classifyLeftRecursion")?;
        for unknown in fields.keys() {
            log::warn!("Unknown option options.{unknown}");
        }

        Ok(Self {
            collapse_sets: collapse_sets.unwrap_or_default().into(),
            classify_left_recursion: classify_left_recursion.unwrap_or_default().into(),
        })
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            collapse_sets: self.collapse_sets,
            classify_left_recursion: self.classify_left_recursion,
        }
    }
}

fn read_field<T: for<'de> Deserialize<'de>>(
    fields: &mut serde_json::Map<String, Value>,
    name: &str,
) -> anyhow::Result<Option<T>> {
    let Some(field) = fields.remove(name) else {
        return Ok(None);
    };

    let typename = std::any::type_name::<T>();
    serde_json::from_value::<T>(field.clone())
        .map(Some)
        .with_context(|| format!("Expected type {typename} for options.{name}, got {field}"))
}
