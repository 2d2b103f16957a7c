use crate::store::EntityHandle;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrmErrorCode {
    Io,
    Decode,
    Validation,
    Configuration,
    BackendExecution,
    SchemaVersion,
    StructuralParse,
    ResourceLeak,
    MissingEntities,
    EntityNotFound,
    UnknownColumn,
    Cancelled,
}

impl OrmErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            OrmErrorCode::Io => "io",
            OrmErrorCode::Decode => "decode",
            OrmErrorCode::Validation => "validation",
            OrmErrorCode::Configuration => "configuration",
            OrmErrorCode::BackendExecution => "backend_execution",
            OrmErrorCode::SchemaVersion => "schema_version",
            OrmErrorCode::StructuralParse => "structural_parse",
            OrmErrorCode::ResourceLeak => "resource_leak",
            OrmErrorCode::MissingEntities => "missing_entities",
            OrmErrorCode::EntityNotFound => "entity_not_found",
            OrmErrorCode::UnknownColumn => "unknown_column",
            OrmErrorCode::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrmError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("backend execution failed: {message} (statement: {statement})")]
    BackendExecution { statement: String, message: String },
    #[error("document schema version {document} is newer than target version {target}")]
    SchemaVersion { document: String, target: String },
    #[error("unexpected document structure at '{path}': {message}")]
    StructuralParse { path: String, message: String },
    #[error("resource leak: {message}")]
    ResourceLeak { message: String },
    #[error("import incomplete, missing entities: {}", names.join(", "))]
    MissingEntities { names: Vec<String> },
    #[error("entity {handle} not found")]
    EntityNotFound { handle: EntityHandle },
    #[error("unknown column '{column}' on entity '{entity}'")]
    UnknownColumn { entity: String, column: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl OrmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        OrmError::Configuration {
            message: message.into(),
        }
    }

    pub fn backend(statement: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::BackendExecution {
            statement: statement.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> OrmErrorCode {
        match self {
            OrmError::Io(_) => OrmErrorCode::Io,
            OrmError::Decode(_) => OrmErrorCode::Decode,
            OrmError::Validation(_) => OrmErrorCode::Validation,
            OrmError::Configuration { .. } => OrmErrorCode::Configuration,
            OrmError::BackendExecution { .. } => OrmErrorCode::BackendExecution,
            OrmError::SchemaVersion { .. } => OrmErrorCode::SchemaVersion,
            OrmError::StructuralParse { .. } => OrmErrorCode::StructuralParse,
            OrmError::ResourceLeak { .. } => OrmErrorCode::ResourceLeak,
            OrmError::MissingEntities { .. } => OrmErrorCode::MissingEntities,
            OrmError::EntityNotFound { .. } => OrmErrorCode::EntityNotFound,
            OrmError::UnknownColumn { .. } => OrmErrorCode::UnknownColumn,
            OrmError::Cancelled => OrmErrorCode::Cancelled,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
