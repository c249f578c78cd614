//! Configuration loading from files and environment variables.

use std::path::Path;

use config::{Config, Environment, File};
use tracing::debug;

use crate::error::ConfigError;

use super::ExtractionConfig;

/// Prefix for environment overrides, e.g. `FIGLINK__DIAGRAM__MIN_AREA=20000`.
const ENV_PREFIX: &str = "FIGLINK";

/// Load configuration from an optional `figlink.{toml,yaml,json}` in the
/// working directory, then environment overrides.
pub fn load_config() -> Result<ExtractionConfig, ConfigError> {
    build(
        File::with_name("figlink").required(false),
        environment(),
    )
}

/// Load configuration from an explicit file, then environment overrides.
pub fn load_config_from(path: &Path) -> Result<ExtractionConfig, ConfigError> {
    build(File::from(path).required(true), environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn build<S>(file: S, env: Environment) -> Result<ExtractionConfig, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let config: ExtractionConfig = Config::builder()
        .add_source(file)
        .add_source(env)
        .build()?
        .try_deserialize()?;

    config.validate()?;
    debug!(?config, "Extraction configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use std::io::Write;
    use tempfile::Builder;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        environment().source(Some(map))
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_file_values_override_defaults() {
        let file = toml_file(
            r#"
            [diagram]
            padding = 20

            [merge]
            conflict_policy = "keep_both"
            "#,
        );

        let config = build(File::from(file.path()), env_from(&[])).unwrap();

        assert_eq!(config.diagram.padding, 20);
        assert_eq!(config.diagram.min_area, 15_000);
        assert_eq!(config.merge.conflict_policy, ConflictPolicy::KeepBoth);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = toml_file("[table]\nmin_width = 180\n");

        let config = build(
            File::from(file.path()),
            env_from(&[
                ("FIGLINK__TABLE__MIN_WIDTH", "200"),
                ("FIGLINK__PIPELINE__MAX_CONCURRENT_PAGES", "2"),
            ]),
        )
        .unwrap();

        assert_eq!(config.table.min_width, 200);
        assert_eq!(config.pipeline.max_concurrent_pages, 2);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = toml_file("[merge]\noverlap_ratio = 1.5\n");

        let result = build(File::from(file.path()), env_from(&[]));

        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_missing_required_file_fails() {
        let result = load_config_from(Path::new("/nonexistent/figlink.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
