//! Span fields and source locations.

use std::borrow::Cow;
use std::fmt::{self, Write};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::wire;

/// Shown when a span carries no usable location.
pub const UNKNOWN_LOCATION: &str = "<unknown location>";

/// Matches everything up to and including a cargo registry or git checkout
/// directory, e.g. `/home/u/.cargo/registry/src/index.crates.io-6f17d22bba15001f/`
/// or `/usr/local/cargo/git/checkouts/`.
static CARGO_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*/\.?cargo(/registry/src/[^/]*/|/git/checkouts/)").unwrap()
});

/// Replace a cargo dependency-cache prefix with `<cargo>/`.
#[must_use]
pub fn truncate_registry_path(path: &str) -> Cow<'_, str> {
    CARGO_PATH.replace(path, "<cargo>/")
}

/// Render a location as `path[:line[:column]]`.
///
/// The module path wins over the file path; only the file path is
/// registry-truncated. Line and column are appended even when zero.
#[must_use]
pub fn format_location(location: Option<&wire::Location>) -> String {
    let Some(loc) = location else {
        return UNKNOWN_LOCATION.to_string();
    };

    let mut out = match (loc.module_path.as_deref(), loc.file.as_deref()) {
        (Some(module), _) if !module.is_empty() => module.to_string(),
        (_, Some(file)) if !file.is_empty() => truncate_registry_path(file).into_owned(),
        _ => return UNKNOWN_LOCATION.to_string(),
    };

    if let Some(line) = loc.line {
        let _ = write!(out, ":{line}");
        if let Some(column) = loc.column {
            let _ = write!(out, ":{column}");
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Bool(bool),
    Str(String),
    U64(u64),
    I64(i64),
    Debug(String),
}

impl FieldValue {
    fn from_wire(value: &wire::FieldValue) -> Self {
        match value {
            wire::FieldValue::DebugVal(s) => Self::Debug(s.clone()),
            wire::FieldValue::StrVal(s) => Self::Str(s.clone()),
            wire::FieldValue::U64Val(v) => Self::U64(*v),
            wire::FieldValue::I64Val(v) => Self::I64(*v),
            wire::FieldValue::BoolVal(v) => Self::Bool(*v),
        }
    }

    fn is_empty_text(&self) -> bool {
        matches!(self, Self::Str(s) | Self::Debug(s) if s.is_empty())
    }

    fn truncate_registry_path(self) -> Self {
        match self {
            Self::Str(s) => Self::Str(truncate_registry_path(&s).into_owned()),
            Self::Debug(s) => Self::Debug(truncate_registry_path(&s).into_owned()),
            other => other,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(s) | Self::Debug(s) => f.write_str(s),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub const SPAWN_LOCATION: &'static str = "spawn.location";
    pub const KIND: &'static str = "kind";
    pub const NAME: &'static str = "task.name";
    pub const TASK_ID: &'static str = "task.id";

    #[must_use]
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Resolve a wire field against its span's metadata.
    ///
    /// Returns `None` when the name cannot be resolved (index out of range or
    /// pointing at different metadata), the value is missing, or a string
    /// value is empty.
    #[must_use]
    pub fn from_wire(field: &wire::Field, meta: &Metadata) -> Option<Self> {
        let name = match field.name.as_ref()? {
            wire::FieldName::StrName(name) => name.as_str(),
            wire::FieldName::NameIdx(index) => {
                if field.metadata_id != Some(meta.id) {
                    return None;
                }
                meta.field_name(*index)?
            }
        };
        if name.is_empty() {
            return None;
        }

        let mut value = FieldValue::from_wire(field.value.as_ref()?);
        if value.is_empty_text() {
            return None;
        }
        if name == Self::SPAWN_LOCATION {
            value = value.truncate_registry_path();
        }

        Some(Self::new(name, value))
    }
}

/// A resource or async-op attribute: a field plus an optional unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub field: Field,
    pub unit: Option<String>,
}

impl Attribute {
    /// Decode every resolvable attribute, dropping the rest.
    #[must_use]
    pub fn from_wire_list(attributes: &[wire::Attribute], meta: &Metadata) -> Vec<Self> {
        attributes
            .iter()
            .filter_map(|attr| {
                let field = Field::from_wire(attr.field.as_ref()?, meta)?;
                Some(Self {
                    field,
                    unit: attr.unit.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetaId;

    fn meta() -> Metadata {
        Metadata {
            id: MetaId(1),
            name: "runtime.spawn".into(),
            target: "tokio::task".into(),
            module_path: None,
            field_names: vec!["name".into(), Field::SPAWN_LOCATION.into()],
        }
    }

    fn loc(file: Option<&str>, module: Option<&str>, line: Option<u32>, column: Option<u32>) -> wire::Location {
        wire::Location {
            file: file.map(String::from),
            module_path: module.map(String::from),
            line,
            column,
        }
    }

    #[test]
    fn unknown_location_when_absent() {
        assert_eq!(format_location(None), UNKNOWN_LOCATION);
        assert_eq!(format_location(Some(&loc(None, None, None, None))), UNKNOWN_LOCATION);
        assert_eq!(format_location(Some(&loc(Some(""), None, Some(3), None))), UNKNOWN_LOCATION);
    }

    #[test]
    fn module_path_preferred_over_file() {
        let l = loc(Some("src/main.rs"), Some("module/path"), None, None);
        assert_eq!(format_location(Some(&l)), "module/path");
        let l = loc(Some("file/path"), None, None, None);
        assert_eq!(format_location(Some(&l)), "file/path");
    }

    #[test]
    fn line_and_column_appended_even_when_zero() {
        let l = loc(None, Some("module/path"), Some(10), Some(20));
        assert_eq!(format_location(Some(&l)), "module/path:10:20");
        let l = loc(None, Some("module/path"), Some(0), Some(0));
        assert_eq!(format_location(Some(&l)), "module/path:0:0");
        let l = loc(None, Some("module/path"), None, Some(4));
        assert_eq!(format_location(Some(&l)), "module/path");
    }

    #[test]
    fn registry_paths_are_truncated() {
        let l = loc(Some("some/path/cargo/registry/src/some-registry/"), None, None, None);
        assert_eq!(format_location(Some(&l)), "<cargo>/");
        let l = loc(Some("some/path/cargo/git/checkouts/some-checkout/"), None, None, None);
        assert_eq!(format_location(Some(&l)), "<cargo>/some-checkout/");
        assert_eq!(truncate_registry_path("src/lib.rs"), "src/lib.rs");
    }

    #[test]
    fn field_with_inline_name() {
        let wire_field = wire::Field {
            name: Some(wire::FieldName::StrName("name".into())),
            value: Some(wire::FieldValue::StrVal("test".into())),
            metadata_id: None,
        };
        let field = Field::from_wire(&wire_field, &meta()).unwrap();
        assert_eq!(field.name, "name");
        assert_eq!(field.value, FieldValue::Str("test".into()));
    }

    #[test]
    fn field_with_indexed_name_needs_matching_metadata() {
        let mut wire_field = wire::Field {
            name: Some(wire::FieldName::NameIdx(0)),
            value: Some(wire::FieldValue::U64Val(3)),
            metadata_id: Some(MetaId(1)),
        };
        assert_eq!(Field::from_wire(&wire_field, &meta()).unwrap().name, "name");

        wire_field.metadata_id = Some(MetaId(2));
        assert!(Field::from_wire(&wire_field, &meta()).is_none());

        wire_field.metadata_id = Some(MetaId(1));
        wire_field.name = Some(wire::FieldName::NameIdx(9));
        assert!(Field::from_wire(&wire_field, &meta()).is_none());
    }

    #[test]
    fn empty_text_values_are_dropped() {
        let wire_field = wire::Field {
            name: Some(wire::FieldName::StrName("name".into())),
            value: Some(wire::FieldValue::DebugVal(String::new())),
            metadata_id: None,
        };
        assert!(Field::from_wire(&wire_field, &meta()).is_none());
    }

    #[test]
    fn spawn_location_value_is_truncated() {
        let wire_field = wire::Field {
            name: Some(wire::FieldName::NameIdx(1)),
            value: Some(wire::FieldValue::StrVal(
                "/home/me/.cargo/registry/src/index-abc/tokio-1.0/src/task.rs:12:5".into(),
            )),
            metadata_id: Some(MetaId(1)),
        };
        let field = Field::from_wire(&wire_field, &meta()).unwrap();
        assert_eq!(field.value.to_string(), "<cargo>/tokio-1.0/src/task.rs:12:5");
    }

    #[test]
    fn attributes_skip_unresolvable_fields() {
        let attrs = vec![
            wire::Attribute {
                field: Some(wire::Field {
                    name: Some(wire::FieldName::StrName("permits".into())),
                    value: Some(wire::FieldValue::U64Val(4)),
                    metadata_id: None,
                }),
                unit: Some("permits".into()),
            },
            wire::Attribute {
                field: None,
                unit: None,
            },
        ];
        let decoded = Attribute::from_wire_list(&attrs, &meta());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].unit.as_deref(), Some("permits"));
        assert_eq!(decoded[0].field.value.to_string(), "4");
    }
}
