//! Minimal sequential stage composition.
//!
//! A pipeline is an ordered list of stage functions over one accumulated
//! state. Fatal stages abort the run on failure; best-effort stages hand
//! their error to the state and let the run continue.

use crate::Result;
use futures_util::future::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePolicy {
    /// Abort the whole run when this stage fails.
    Fatal,
    /// Record the failure into the state and keep going.
    BestEffort,
}

/// Implemented by pipeline states so the driver can hand best-effort
/// failures back without knowing the state's layout.
pub trait StageState {
    fn record_stage_error(&mut self, stage: &'static str, message: String);
}

/// A stage body: borrows the state, returns a boxed future so stages of
/// different shapes fit one list.
pub type StageFn<S> = Box<dyn for<'s> Fn(&'s mut S) -> BoxFuture<'s, Result<()>> + Send + Sync>;

pub struct Stage<S> {
    name: &'static str,
    policy: StagePolicy,
    run: StageFn<S>,
}

impl<S> Stage<S> {
    pub fn fatal(name: &'static str, run: StageFn<S>) -> Self {
        Self {
            name,
            policy: StagePolicy::Fatal,
            run,
        }
    }

    pub fn best_effort(name: &'static str, run: StageFn<S>) -> Self {
        Self {
            name,
            policy: StagePolicy::BestEffort,
            run,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> StagePolicy {
        self.policy
    }
}

pub struct StageSequence<S> {
    stages: Vec<Stage<S>>,
}

impl<S: StageState + Send> StageSequence<S> {
    pub fn from(stages: Vec<Stage<S>>) -> Self {
        Self { stages }
    }

    /// Run every stage in order over `state`. Returns the first fatal
    /// error; best-effort failures are recorded and never abort.
    pub async fn run(&self, state: &mut S) -> Result<()> {
        for stage in &self.stages {
            match (stage.run)(state).await {
                Ok(()) => {}
                Err(err) if stage.policy == StagePolicy::Fatal => return Err(err),
                Err(err) => state.record_stage_error(stage.name, err.to_string()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[derive(Default)]
    struct ToyState {
        log: Vec<&'static str>,
        errors: Vec<(&'static str, String)>,
    }

    impl StageState for ToyState {
        fn record_stage_error(&mut self, stage: &'static str, message: String) {
            self.errors.push((stage, message));
        }
    }

    fn push_stage(name: &'static str) -> Stage<ToyState> {
        Stage::fatal(
            name,
            Box::new(move |s: &mut ToyState| {
                Box::pin(async move {
                    s.log.push(name);
                    Ok(())
                })
            }),
        )
    }

    #[test]
    fn stages_expose_their_name_and_policy() {
        let stage = push_stage("probe");
        assert_eq!(stage.name(), "probe");
        assert_eq!(stage.policy(), StagePolicy::Fatal);
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let seq = StageSequence::from(vec![push_stage("one"), push_stage("two")]);
        let mut state = ToyState::default();
        seq.run(&mut state).await.unwrap();
        assert_eq!(state.log, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn fatal_failure_aborts_and_skips_the_rest() {
        let seq = StageSequence::from(vec![
            Stage::fatal(
                "boom",
                Box::new(|_s: &mut ToyState| {
                    Box::pin(async move { Err(Error::Search("down".into())) })
                }),
            ),
            push_stage("never"),
        ]);
        let mut state = ToyState::default();
        let err = seq.run(&mut state).await.unwrap_err();
        assert!(matches!(err, Error::Search(_)));
        assert!(state.log.is_empty());
    }

    #[tokio::test]
    async fn best_effort_failure_is_recorded_and_the_run_continues() {
        let seq = StageSequence::from(vec![
            Stage::best_effort(
                "flaky",
                Box::new(|_s: &mut ToyState| {
                    Box::pin(async move { Err(Error::Agent("upstream 500".into())) })
                }),
            ),
            push_stage("after"),
        ]);
        let mut state = ToyState::default();
        seq.run(&mut state).await.unwrap();
        assert_eq!(state.log, vec!["after"]);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].0, "flaky");
        assert!(state.errors[0].1.contains("upstream 500"));
    }
}
