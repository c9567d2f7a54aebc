//! The three-phase migration pipeline
//!
//! Build parses and generates constraints for every translation unit,
//! Solve closes the store to fixpoint, Rewrite splices checked spellings
//! back into the sources. Each phase runs only if the previous one
//! succeeded; a failed phase reports which phase failed and why, and no
//! output files are touched after a failure.

use crate::ast_bridge::AstBridge;
use crate::config::CheckifyConfig;
use crate::constraints::{ConstraintStore, SolvedStore, Solver};
use crate::error::CheckifyError;
use crate::generate::{ConstraintGenerator, GeneratedModule};
use crate::hir::CModule;
use crate::interfaces::{InterfacePolicy, InterfaceProfile};
use crate::rewrite::{emit, RewritePlanner};
use serde::Serialize;
use tracing::{error, info};

/// Pipeline phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Solve,
    Rewrite,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Build => write!(f, "build"),
            Phase::Solve => write!(f, "solve"),
            Phase::Rewrite => write!(f, "rewrite"),
        }
    }
}

/// Counts reported after a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub files: usize,
    pub variables: usize,
    pub constraints: usize,
    pub solver_iterations: usize,
    pub checked: usize,
    pub wild: usize,
}

/// The result of a run. A failure names the phase that stopped it.
#[derive(Debug)]
pub enum PipelineOutcome {
    Success(RunSummary),
    Failed { phase: Phase, reason: String },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success(_))
    }

    fn failed(phase: Phase, reason: impl ToString) -> Self {
        error!(%phase, reason = %reason.to_string(), "pipeline phase failed");
        PipelineOutcome::Failed {
            phase,
            reason: reason.to_string(),
        }
    }
}

struct BuildArtifacts {
    store: ConstraintStore,
    modules: Vec<(CModule, GeneratedModule)>,
}

pub struct Pipeline {
    config: CheckifyConfig,
}

impl Pipeline {
    /// Validates the configuration; invalid options never start a run.
    pub fn new(config: CheckifyConfig) -> Result<Self, CheckifyError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(self) -> PipelineOutcome {
        self.run_with(|_| Ok(()))
    }

    /// Run, invoking `after_solve` between the solve and rewrite phases so
    /// callers can emit reports from the solved store before any file is
    /// rewritten.
    pub fn run_with(
        self,
        after_solve: impl FnOnce(&SolvedStore) -> anyhow::Result<()>,
    ) -> PipelineOutcome {
        let artifacts = match self.build() {
            Ok(artifacts) => artifacts,
            Err(e) => return PipelineOutcome::failed(Phase::Build, e),
        };

        let files = artifacts.modules.len();
        let constraints = artifacts.store.constraints().len();
        if let Some(path) = &self.config.constraint_output {
            if let Err(e) = dump_constraints(path, &artifacts.store) {
                return PipelineOutcome::failed(Phase::Build, e);
            }
        }

        let solved = Solver::solve(artifacts.store);
        info!(
            vars = solved.len(),
            iterations = solved.iterations(),
            "solve phase complete"
        );
        if let Err(e) = after_solve(&solved) {
            return PipelineOutcome::failed(Phase::Solve, e);
        }

        if let Err(e) = self.rewrite(&solved, &artifacts.modules) {
            return PipelineOutcome::failed(Phase::Rewrite, e);
        }

        let (checked, wild) = solved.vars().fold((0, 0), |(c, w), var| {
            if solved.qualifier(var.id).is_checked() {
                (c + 1, w)
            } else {
                (c, w + 1)
            }
        });
        PipelineOutcome::Success(RunSummary {
            files,
            variables: solved.len(),
            constraints,
            solver_iterations: solved.iterations(),
            checked,
            wild,
        })
    }

    fn build(&self) -> anyhow::Result<BuildArtifacts> {
        let mut policy = InterfacePolicy::new(
            self.config.propagate_through_itypes,
            self.config.handle_varargs,
        );
        if let Some(path) = &self.config.interface_profile {
            policy = policy.with_profile(InterfaceProfile::from_path(path)?);
        }

        let bridge = AstBridge::new();
        let mut store = ConstraintStore::new();
        let mut generator = ConstraintGenerator::new(&mut store, &policy);
        let mut modules = Vec::with_capacity(self.config.files.len());
        for file in &self.config.files {
            // A file that does not parse fails the whole run; rewriting a
            // partially-understood unit could silently drop constraints.
            let module = bridge.lower_file(file)?;
            let generated = generator.generate(&module);
            modules.push((module, generated));
        }
        drop(generator);
        info!(files = modules.len(), vars = store.len(), "build phase complete");
        Ok(BuildArtifacts { store, modules })
    }

    fn rewrite(
        &self,
        solved: &SolvedStore,
        modules: &[(CModule, GeneratedModule)],
    ) -> anyhow::Result<()> {
        let planner = RewritePlanner::new(
            solved,
            self.config.all_levels,
            self.config.add_checked_regions,
        );
        for (module, generated) in modules {
            let text = planner.rewrite_module(module, generated);
            emit(&module.file, &text, &self.config.output)?;
        }
        info!(files = modules.len(), "rewrite phase complete");
        Ok(())
    }
}

#[derive(Serialize)]
struct ConstraintDump<'a> {
    variables: Vec<&'a crate::constraints::ConstraintVariable>,
    constraints: &'a [crate::constraints::Constraint],
}

fn dump_constraints(path: &std::path::Path, store: &ConstraintStore) -> anyhow::Result<()> {
    let dump = ConstraintDump {
        variables: store.vars().collect(),
        constraints: store.constraints(),
    };
    let json = serde_json::to_string_pretty(&dump)?;
    std::fs::write(path, json).map_err(|source| CheckifyError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
