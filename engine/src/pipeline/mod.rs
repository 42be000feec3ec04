//! Step pipeline runner.
//!
//! ```text
//!        Idle ──run()──▶ Running(0) ──▶ Running(1) ──▶ ... ──▶ Idle
//!                            │              │
//!                            ▼              ▼
//!                      01_<label>      02_<label>      (if write_intermediate)
//! ```
//!
//! Steps run synchronously in registration order, each consuming the output
//! of its predecessor. The runner checks the data levels of the whole chain
//! before the first step starts.

mod driver;

pub use driver::{discover_variables, run_pipeline, PipelineOutcome, RunOptions};

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dataset::{DataLevel, Dataset};
use crate::error::{PipelineError, PipelineResult, StepError};
use crate::output::ArtifactWriter;
use crate::registry::TypeRegistry;
use crate::steps::{PipelineStep, StepContext, StepDefinition};

/// Execution state of a [`PipelineRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerState {
    #[default]
    Idle,
    /// Index of the step currently executing.
    Running { step_index: usize },
}

/// Ordered list of steps, built once and run against one dataset.
#[derive(Default)]
pub struct PipelineRunner {
    steps: Vec<Box<dyn PipelineStep>>,
    state: RunnerState,
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every step listed in the config, in order.
    pub fn from_definitions(definitions: &[StepDefinition], config: &PipelineConfig) -> Self {
        let mut runner = Self::new();
        for definition in definitions {
            runner.add_step(definition.build(config));
        }
        runner
    }

    pub fn add_step(&mut self, step: Box<dyn PipelineStep>) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Check that every step receives the data level it requires.
    pub fn validate_order(&self, initial: DataLevel) -> PipelineResult<()> {
        let mut level = initial;
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(expected) = step.input_level() {
                if expected != level {
                    return Err(PipelineError::Ordering {
                        index,
                        label: step.label().to_string(),
                        expected: expected.to_string(),
                        actual: level.to_string(),
                    });
                }
            }
            level = step.output_level(level);
        }
        Ok(())
    }

    /// Run all steps over `dataset`.
    ///
    /// With `write_intermediate`, every step output is persisted under the
    /// next snapshot counter. A failing step aborts the run; its zero-based
    /// position and label are reported with the cause.
    pub fn run(
        &mut self,
        dataset: Dataset,
        registry: &mut TypeRegistry,
        artifacts: &mut ArtifactWriter,
        write_intermediate: bool,
    ) -> PipelineResult<Dataset> {
        self.validate_order(dataset.level())?;
        let result = self.run_steps(dataset, registry, artifacts, write_intermediate);
        self.state = RunnerState::Idle;
        result
    }

    fn run_steps(
        &mut self,
        mut dataset: Dataset,
        registry: &mut TypeRegistry,
        artifacts: &mut ArtifactWriter,
        write_intermediate: bool,
    ) -> PipelineResult<Dataset> {
        for (index, step) in self.steps.iter().enumerate() {
            self.state = RunnerState::Running { step_index: index };
            let label = step.label();
            info!(step = index, label, rows = dataset.row_count(), "running step");

            let mut ctx = StepContext {
                registry: &mut *registry,
                artifacts: &mut *artifacts,
                write_intermediate,
            };
            let fail = |source: StepError| PipelineError::Step {
                index,
                label: label.to_string(),
                source,
            };

            dataset = step.run(dataset, &mut ctx).map_err(fail)?;
            if write_intermediate {
                let path = artifacts
                    .write_intermediate(label, &dataset)
                    .map_err(|e| fail(e.into()))?;
                debug!(path = %path.display(), "wrote step snapshot");
            }
        }
        Ok(dataset)
    }
}
