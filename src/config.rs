use crate::error::OrmError;

/// Runtime configuration for a `Workspace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub default_page_size: u64,
    pub max_page_size: u64,
    /// Default `KeepObjects` policy for newly created cursors.
    pub keep_objects: bool,
    pub procedure_prefix: String,
    /// Rows between two import progress signals.
    pub progress_interval: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            max_page_size: 10_000,
            keep_objects: false,
            procedure_prefix: "mr_page_".to_string(),
            progress_interval: 100,
        }
    }
}

impl RuntimeConfig {
    /// Profile for long-running imports: larger pages, sparser progress.
    pub fn bulk_import() -> Self {
        Self {
            default_page_size: 500,
            progress_interval: 1_000,
            ..Self::default()
        }
    }

    /// Profile for UI-driven browsing where pages are revisited.
    pub fn interactive() -> Self {
        Self {
            default_page_size: 50,
            keep_objects: true,
            ..Self::default()
        }
    }

    pub fn with_default_page_size(mut self, page_size: u64) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_keep_objects(mut self, keep_objects: bool) -> Self {
        self.keep_objects = keep_objects;
        self
    }

    pub fn with_procedure_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.procedure_prefix = prefix.into();
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), OrmError> {
        if self.default_page_size == 0 {
            return Err(OrmError::configuration("default_page_size must be > 0"));
        }
        if self.default_page_size > self.max_page_size {
            return Err(OrmError::configuration(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.progress_interval == 0 {
            return Err(OrmError::configuration("progress_interval must be > 0"));
        }
        let prefix_ok = !self.procedure_prefix.is_empty()
            && self
                .procedure_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !prefix_ok {
            return Err(OrmError::configuration(format!(
                "procedure_prefix '{}' must be non-empty [A-Za-z0-9_]",
                self.procedure_prefix
            )));
        }
        Ok(())
    }
}

/// Which database block of an import document is loaded, and the schema
/// version the loaded data must be compatible with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    pub database_alias: String,
    pub schema_version: String,
}

impl ImportTarget {
    pub fn new(database_alias: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            database_alias: database_alias.into(),
            schema_version: schema_version.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeConfig;
    use crate::error::OrmError;

    #[test]
    fn profiles_validate() {
        RuntimeConfig::default().validate().expect("default");
        RuntimeConfig::bulk_import().validate().expect("bulk");
        RuntimeConfig::interactive().validate().expect("interactive");
    }

    #[test]
    fn rejects_zero_page_size_and_bad_prefix() {
        let err = RuntimeConfig::default()
            .with_default_page_size(0)
            .validate()
            .expect_err("zero page size");
        assert!(matches!(err, OrmError::Configuration { .. }));

        let err = RuntimeConfig::default()
            .with_procedure_prefix("bad-prefix;")
            .validate()
            .expect_err("prefix");
        assert!(matches!(err, OrmError::Configuration { .. }));
    }
}
