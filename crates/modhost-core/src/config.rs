use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{ModuleError, Result};

/// Where modules come from and how bare names are completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOptions {
    /// Directories searched in order for module names (default: ["."])
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,

    /// Extension appended to names without a recognized one (default: lua)
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

fn default_roots() -> Vec<String> {
    vec![".".to_string()]
}

fn default_extension() -> String {
    "lua".to_string()
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            default_extension: default_extension(),
        }
    }
}

/// Optional dialect compiler that runs inside its own Lua state.
///
/// The bootstrap resource is evaluated once; when it returns a value and
/// `global` is set, the value is bound under that name. `compile` is a chunk
/// receiving the dialect source as `...` and returning Lua source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialectSettings {
    pub extension: String,
    pub bootstrap: String,
    #[serde(default)]
    pub global: Option<String>,
    pub compile: String,
}

const TEAL_COMPILE: &str = r#"local source = ...
local output, result = tl.gen(source)
if output == nil then
  local err = result and result.syntax_errors and result.syntax_errors[1]
  if err then
    error(string.format("%s:%s: %s", err.y, err.x, err.msg), 0)
  end
  error("compilation failed", 0)
end
return output
"#;

impl DialectSettings {
    /// Teal (`.tl`) through its single-file compiler `tl.lua`
    pub fn teal() -> Self {
        Self {
            extension: "tl".to_string(),
            bootstrap: "tl.lua".to_string(),
            global: Some("tl".to_string()),
            compile: TEAL_COMPILE.to_string(),
        }
    }
}

impl Default for DialectSettings {
    fn default() -> Self {
        Self::teal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOptions {
    /// Handed to scripts through `__container:config()`
    #[serde(default = "default_deployment_config")]
    pub config: serde_json::Value,
}

fn default_deployment_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            config: default_deployment_config(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformOptions {
    /// Reported by `__platform:name()` (default: modhost)
    #[serde(default = "default_platform_name")]
    pub name: String,
}

fn default_platform_name() -> String {
    "modhost".to_string()
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            name: default_platform_name(),
        }
    }
}

/// Main host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default)]
    pub modules: ModuleOptions,

    #[serde(default)]
    pub dialect: Option<DialectSettings>,

    #[serde(default)]
    pub deployment: DeploymentOptions,

    #[serde(default)]
    pub platform: PlatformOptions,
}

/// Command-line values that take precedence over the configuration file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub roots: Option<Vec<String>>,
    pub default_extension: Option<String>,
    pub deployment_config: Option<serde_json::Value>,
}

impl HostConfig {
    /// Load configuration from a YAML file, or JSON when the path ends in `.json`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ModuleError::io(path.display().to_string(), &e))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ModuleError::Config(e.to_string()))
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| ModuleError::Config(e.to_string()))
    }

    /// Write the default configuration as YAML
    pub fn init_file(path: &Path) -> Result<()> {
        HostConfig::default().write_file(path)
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).map_err(|e| ModuleError::Config(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ModuleError::io(path.display().to_string(), &e))
    }

    /// Merge CLI overrides into this configuration
    pub fn merge(&mut self, overrides: &CliOverrides) {
        if let Some(roots) = &overrides.roots {
            self.modules.roots = roots.clone();
        }
        if let Some(extension) = &overrides.default_extension {
            self.modules.default_extension = extension.clone();
        }
        if let Some(config) = &overrides.deployment_config {
            self.deployment.config = config.clone();
        }
    }
}
