use std::fmt;
use std::str::FromStr;

use rejit_ir::Module;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ConstFold, DeadCode, GlobalDeadCode, Inline, InlinePolicy, OptError, PassManager, SimplifyCfg,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptLevel {
    /// Mandatory inlining and dead function removal only.
    None,
    /// One round of local cleanups; no size-based inlining.
    Less,
    #[default]
    Default,
    Aggressive,
}

impl OptLevel {
    pub fn name(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Less => "less",
            OptLevel::Default => "default",
            OptLevel::Aggressive => "aggressive",
        }
    }

    fn inline_threshold(self) -> usize {
        match self {
            OptLevel::None | OptLevel::Less => 0,
            OptLevel::Default => 25,
            OptLevel::Aggressive => 100,
        }
    }

    fn max_rounds(self) -> usize {
        match self {
            OptLevel::None => 0,
            OptLevel::Less => 1,
            OptLevel::Default => 4,
            OptLevel::Aggressive => 8,
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown optimization level `{0}` (expected 0-3, none, less, default or aggressive)")]
pub struct ParseOptLevelError(String);

impl FromStr for OptLevel {
    type Err = ParseOptLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let level = trimmed.strip_prefix("-O").unwrap_or(trimmed);
        match level.to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(OptLevel::None),
            "1" | "less" => Ok(OptLevel::Less),
            "2" | "default" => Ok(OptLevel::Default),
            "3" | "aggressive" => Ok(OptLevel::Aggressive),
            _ => Err(ParseOptLevelError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    pub level: OptLevel,
    /// Overrides the level's size-based inlining threshold.
    pub inline_threshold: Option<usize>,
    pub verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub instrs_before: usize,
    pub instrs_after: usize,
    /// Rounds of the iterated cleanup group that ran.
    pub rounds: usize,
}

/// Runs the pass pipeline for `config.level` over `module`.
///
/// Mandatory inlining always runs first and dead function removal always
/// runs last. In between, inlining, constant folding, CFG simplification and
/// DCE are repeated until a round changes nothing or the level's round limit
/// is reached.
pub fn optimize(module: &mut Module, config: &PipelineConfig) -> Result<PipelineStats, OptError> {
    let instrs_before = module.instr_count();
    let _span = tracing::debug_span!("optimize", module = %module.name, opt_level = %config.level)
        .entered();

    let mut prologue = PassManager::new();
    prologue
        .set_verify(config.verify)
        .add_pass(Inline::new(InlinePolicy::mandatory_only()));
    prologue.run(module)?;

    let threshold = config
        .inline_threshold
        .unwrap_or_else(|| config.level.inline_threshold());
    let mut rounds = 0;
    if config.level.max_rounds() > 0 {
        let mut group = PassManager::new();
        group
            .set_verify(config.verify)
            .add_pass(Inline::new(InlinePolicy { threshold }))
            .add_pass(ConstFold)
            .add_pass(SimplifyCfg)
            .add_pass(DeadCode);
        rounds = group.run_to_fixpoint(module, config.level.max_rounds())?;
    }

    let mut epilogue = PassManager::new();
    epilogue.set_verify(config.verify).add_pass(GlobalDeadCode);
    epilogue.run(module)?;

    let stats = PipelineStats {
        instrs_before,
        instrs_after: module.instr_count(),
        rounds,
    };
    tracing::debug!(
        before = stats.instrs_before,
        after = stats.instrs_after,
        rounds,
        "optimization finished"
    );
    Ok(stats)
}
