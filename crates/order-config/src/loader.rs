//! Loader for configuration split across several files.
//!
//! A file may pull in other files through an `include` directive, and
//! included files may include further files. Relative include paths are
//! resolved against the directory of the including file. Every top-level
//! section may be defined by exactly one file, and include cycles are
//! rejected.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration loader that handles multi-file configurations with includes.
pub struct ConfigLoader {
	/// Base path for resolving the root configuration file
	base_path: PathBuf,
	/// Canonical paths of the files currently being loaded, root first
	include_stack: Vec<PathBuf>,
	/// Which file defined each top-level section
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	/// Creates a new ConfigLoader with the given base path.
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			include_stack: Vec::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads a configuration file and all its includes.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = Self::resolve_path(&self.base_path, config_path)?;
		let combined = self.load_file(config_path).await?;

		let rendered = toml::to_string(&combined).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		rendered.parse()
	}

	/// Loads one file, then recursively merges the files it includes.
	async fn load_file(&mut self, path: PathBuf) -> Result<toml::Value, ConfigError> {
		let canonical_path = tokio::fs::canonicalize(&path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if self.include_stack.contains(&canonical_path) {
			let chain = self
				.include_stack
				.iter()
				.chain(std::iter::once(&canonical_path))
				.map(|p| p.display().to_string())
				.collect::<Vec<_>>()
				.join(" -> ");
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {}",
				chain
			)));
		}

		let content = tokio::fs::read_to_string(&canonical_path).await?;
		let resolved = resolve_env_vars(&content)?;
		let mut value: toml::Value = toml::from_str(&resolved)?;

		let includes = Self::extract_includes(&value)?;
		let table = value
			.as_table_mut()
			.ok_or_else(|| ConfigError::Validation("Configuration root must be a table".into()))?;
		table.remove("include");

		for key in table.keys() {
			self.claim_section(key, &canonical_path)?;
		}

		let include_dir = canonical_path
			.parent()
			.map(Path::to_path_buf)
			.unwrap_or_else(|| self.base_path.clone());

		self.include_stack.push(canonical_path);
		for include_path in includes {
			let resolved_path = Self::resolve_path(&include_dir, &include_path)?;
			let included = Box::pin(self.load_file(resolved_path)).await?;
			if let toml::Value::Table(included_table) = included {
				for (key, section) in included_table {
					table.insert(key, section);
				}
			}
		}
		self.include_stack.pop();

		Ok(value)
	}

	/// Records that `source` defines `section`, rejecting duplicates.
	fn claim_section(&mut self, section: &str, source: &Path) -> Result<(), ConfigError> {
		if let Some(existing_source) = self.section_sources.get(section) {
			return Err(ConfigError::Validation(format!(
				"Duplicate section '{}' found in {} and {}. \
				Each top-level section must be unique across all configuration files.",
				section,
				existing_source.display(),
				source.display()
			)));
		}
		self.section_sources
			.insert(section.to_string(), source.to_path_buf());
		Ok(())
	}

	/// Extracts include directives from the configuration.
	fn extract_includes(toml: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
		match toml.get("include") {
			None => Ok(Vec::new()),
			Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
			Some(toml::Value::Array(items)) => items
				.iter()
				.map(|item| {
					item.as_str().map(PathBuf::from).ok_or_else(|| {
						ConfigError::Validation("Include array must contain only strings".into())
					})
				})
				.collect(),
			Some(_) => Err(ConfigError::Validation(
				"Include must be a string or array of strings".into(),
			)),
		}
	}

	/// Resolves a path relative to `base`.
	fn resolve_path(base: &Path, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			base.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}

		Ok(resolved)
	}
}
