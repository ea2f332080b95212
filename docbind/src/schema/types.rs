use crate::error::{DocBindError, Result};
use crate::mapper::FieldMapper;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Top-level declaration file: process-wide defaults plus model types,
/// in registration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclarationFile {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub models: Vec<ModelDeclaration>,
}

/// Process-wide defaults consulted when a model omits a setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    /// Logical database name -> physical database name.
    pub databases: HashMap<String, String>,
    pub auto_index: bool,
    pub id_strategy: IdStrategy,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            host: Some("localhost".to_string()),
            port: Some(27017),
            database: None,
            databases: HashMap::new(),
            auto_index: true,
            id_strategy: IdStrategy::default(),
        }
    }
}

impl Defaults {
    pub const ENV_PREFIX: &'static str = "DOCBIND_";

    /// Overlay `DOCBIND_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(std::env::vars(), Self::ENV_PREFIX)
    }

    /// Overlay settings from `PREFIX_NAME=value` pairs. Pairs without the
    /// prefix and unknown names are ignored.
    pub fn apply_vars<I, K, V>(&mut self, vars: I, prefix: &str) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(prefix) else {
                continue;
            };
            let value = value.as_ref();
            match name.to_ascii_lowercase().as_str() {
                "host" => self.host = Some(value.to_string()),
                "port" => {
                    let port = value.parse::<u16>().map_err(|_| {
                        DocBindError::config("<defaults>", format!("invalid port '{value}'"))
                    })?;
                    self.port = Some(port);
                }
                "database" => self.database = Some(value.to_string()),
                "auto_index" => {
                    self.auto_index = match value.to_ascii_lowercase().as_str() {
                        "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => {
                            return Err(DocBindError::config(
                                "<defaults>",
                                format!("invalid auto_index '{value}'"),
                            ))
                        }
                    }
                }
                "id_strategy" => {
                    self.id_strategy = serde_yaml::from_str(value).map_err(|_| {
                        DocBindError::config("<defaults>", format!("invalid id_strategy '{value}'"))
                    })?;
                }
                other => log::debug!("Ignoring unknown setting {prefix}{other}"),
            }
        }
        Ok(())
    }

    /// Map a logical database name to its physical name.
    pub fn database_name(&self, logical: &str) -> String {
        self.databases
            .get(logical)
            .cloned()
            .unwrap_or_else(|| logical.to_string())
    }
}

/// Declaration of one model type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDeclaration {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub indices: Vec<IndexSpec>,
    #[serde(default)]
    pub references: Vec<ReferenceSpec>,
    /// Declares shape only; never bound to a live collection.
    #[serde(default)]
    pub interface: bool,
    #[serde(default)]
    pub auto_index: Option<bool>,
    #[serde(default)]
    pub id_strategy: Option<IdStrategy>,
    /// Earlier-declared type whose options fill in the unset ones here.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(skip)]
    pub field_map: Vec<FieldMapper>,
}

impl ModelDeclaration {
    pub fn new(name: &str) -> Self {
        ModelDeclaration {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indices.push(index);
        self
    }

    pub fn reference(mut self, field: &str, target: &str, on_delete: CascadePolicy) -> Self {
        self.references.push(ReferenceSpec::new(field, target, on_delete));
        self
    }

    pub fn field_mapper(mut self, mapper: FieldMapper) -> Self {
        self.field_map.push(mapper);
        self
    }

    pub fn interface(mut self) -> Self {
        self.interface = true;
        self
    }

    pub fn auto_index(mut self, enabled: bool) -> Self {
        self.auto_index = Some(enabled);
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = Some(strategy);
        self
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.extends = Some(parent.to_string());
        self
    }
}

/// Ordering of one index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

impl SortOrder {
    /// Store-level direction: 1 or -1.
    pub fn direction(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// One key of an index: a bare field name (ascending) or a field with order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexKey {
    Field(String),
    Ordered { field: String, order: SortOrder },
}

impl IndexKey {
    pub fn field(&self) -> &str {
        match self {
            IndexKey::Field(field) | IndexKey::Ordered { field, .. } => field,
        }
    }

    pub fn order(&self) -> SortOrder {
        match self {
            IndexKey::Field(_) => SortOrder::Ascending,
            IndexKey::Ordered { order, .. } => *order,
        }
    }
}

/// Index on one field or a tuple of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
    /// Unique check skips documents that lack every indexed field.
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new(field: &str) -> Self {
        IndexSpec {
            keys: vec![IndexKey::Field(field.to_string())],
            unique: false,
            sparse: false,
            name: None,
        }
    }

    pub fn compound(keys: &[(&str, SortOrder)]) -> Self {
        IndexSpec {
            keys: keys
                .iter()
                .map(|(field, order)| IndexKey::Ordered {
                    field: field.to_string(),
                    order: *order,
                })
                .collect(),
            unique: false,
            sparse: false,
            name: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Explicit name, or `<field>_<direction>` for each key joined by `_`.
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field(), k.order().direction()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.field())
    }

    /// Same keys in the same order with the same options.
    pub fn is_equivalent(&self, other: &IndexSpec) -> bool {
        let keys = |spec: &IndexSpec| {
            spec.keys
                .iter()
                .map(|k| (k.field().to_string(), k.order()))
                .collect::<Vec<_>>()
        };
        keys(self) == keys(other) && self.unique == other.unique && self.sparse == other.sparse
    }
}

/// What happens to referencing documents when the referenced one is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Unset the reference field on every referent and persist it.
    Nullify,
    /// Refuse the removal while referents exist.
    #[serde(alias = "error")]
    Deny,
    /// Delete every referent.
    Cascade,
    #[serde(alias = "ignore")]
    Nothing,
}

impl fmt::Display for CascadePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CascadePolicy::Nullify => "nullify",
            CascadePolicy::Deny => "deny",
            CascadePolicy::Cascade => "cascade",
            CascadePolicy::Nothing => "nothing",
        };
        f.write_str(name)
    }
}

/// Forward reference declared on the referencing type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    pub field: String,
    pub target: String,
    #[serde(default = "default_policy")]
    pub on_delete: CascadePolicy,
}

fn default_policy() -> CascadePolicy {
    CascadePolicy::Nothing
}

impl ReferenceSpec {
    pub fn new(field: &str, target: &str, on_delete: CascadePolicy) -> Self {
        ReferenceSpec {
            field: field.to_string(),
            target: target.to_string(),
            on_delete,
        }
    }
}

/// How identifiers are generated for documents that lack one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}
