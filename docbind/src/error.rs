use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocBindError {
    #[error("Model {model:?} improperly configured: {message}")]
    Configuration { model: String, message: String },

    #[error("Field mapper for {model}.{field} didn't change field type (still {kind})")]
    FieldMapper {
        model: String,
        field: String,
        kind: String,
    },

    #[error("Existing references: {count} document(s) in {referent}.{field} still point to this {model}")]
    ExistingReferences {
        model: String,
        referent: String,
        field: String,
        count: u64,
    },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: String },

    #[error("Document of model {model} has no _id")]
    MissingId { model: String },

    #[error("Model {0} is an interface and has no collection")]
    InterfaceModel(String),

    #[error("Document belongs to model {found}, not {expected}")]
    ModelMismatch { expected: String, found: String },

    #[error("Foreign reference: {0}")]
    ForeignReference(String),

    #[error("Duplicate key in {collection}: index {index}")]
    DuplicateKey { collection: String, index: String },

    #[error("Index conflict in {collection}: {index} already exists with different options")]
    IndexConflict { collection: String, index: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl DocBindError {
    pub(crate) fn config(model: &str, message: impl Into<String>) -> Self {
        DocBindError::Configuration {
            model: model.to_string(),
            message: message.into(),
        }
    }

    /// True for errors raised at declaration time rather than by the store.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DocBindError::Configuration { .. } | DocBindError::FieldMapper { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DocBindError>;
