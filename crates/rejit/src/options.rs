use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rejit_opt::{OptLevel, PipelineConfig};
use serde::{Deserialize, Serialize};
use target_lexicon::Triple;

use crate::error::{Error, Result};

/// Which machine the specialized code is generated for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// The host, with every feature the running CPU reports.
    #[default]
    Native,
    /// The host triple with baseline features only.
    Host,
    /// An explicit target triple. Modules for foreign triples can be
    /// optimized and extracted but not executed.
    Triple(String),
}

impl Target {
    /// Whether code generated for this target can run in this process.
    pub fn is_executable(&self) -> bool {
        match self {
            Target::Native | Target::Host => true,
            Target::Triple(triple) => Triple::from_str(triple)
                .map(|t| t == Triple::host())
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Native => f.write_str("native"),
            Target::Host => f.write_str("host"),
            Target::Triple(triple) => f.write_str(triple),
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "native" => Ok(Target::Native),
            "host" => Ok(Target::Host),
            triple => {
                Triple::from_str(triple)
                    .map_err(|e| Error::Config(format!("invalid target `{triple}`: {e}")))?;
                Ok(Target::Triple(triple.to_owned()))
            }
        }
    }
}

impl TryFrom<String> for Target {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

/// Knobs for one specialization. Every field has a default, so a config file
/// or the environment only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    pub opt_level: OptLevel,
    pub target: Target,
    /// Overrides the level's inlining threshold.
    pub inline_threshold: Option<usize>,
    /// Verify IR before and after optimization, and enable the code
    /// generator's own verifier.
    pub verify: bool,
    /// Each optimized module is also written here in text form.
    pub dump_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Default,
            target: Target::Native,
            inline_threshold: None,
            verify: cfg!(debug_assertions),
            dump_dir: None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    rejit: Options,
}

impl Options {
    /// Reads the `[rejit]` table of a TOML document. Other tables are ignored.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| Error::Config(e.message().to_owned()))?;
        Ok(file.rejit)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Defaults overlaid with the `REJIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Overlays `REJIT_OPT_LEVEL`, `REJIT_TARGET`, `REJIT_VERIFY` and
    /// `REJIT_DUMP_DIR` onto `self`.
    pub fn with_env(self) -> Result<Self> {
        self.overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(level) = var("REJIT_OPT_LEVEL") {
            self.opt_level = level
                .parse()
                .map_err(|e: rejit_opt::ParseOptLevelError| Error::Config(e.to_string()))?;
        }
        if let Some(target) = var("REJIT_TARGET") {
            self.target = target.parse()?;
        }
        if let Some(verify) = var("REJIT_VERIFY") {
            self.verify = match verify.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::Config(format!(
                        "REJIT_VERIFY must be a boolean, got `{other}`"
                    )));
                }
            };
        }
        if let Some(dir) = var("REJIT_DUMP_DIR") {
            self.dump_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        Ok(self)
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = Some(threshold);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub(crate) fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            level: self.opt_level,
            inline_threshold: self.inline_threshold,
            verify: self.verify,
        }
    }
}
