use super::params::ParamStore;
use crate::core::models::trajectory::Trajectory;
use std::time::Duration;
use thiserror::Error;

/// Why the engine could not produce a trajectory. Every variant is recoverable: the move that
/// led to it is rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationFailure {
    #[error("Engine crashed: {0}")]
    Crashed(String),
    #[error("Engine timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Engine call was cancelled")]
    Cancelled,
    #[error("Simulation did not converge: {0}")]
    NotConverged(String),
    #[error("Numeric anomaly: {0}")]
    NumericAnomaly(String),
}

/// Produces a trajectory for a parameter state.
///
/// This is the controller's only suspension point; implementations own timeouts and
/// cancellation and report them as [`EvaluationFailure`]s.
pub trait SimulationEngine {
    fn evaluate(&mut self, params: &ParamStore) -> Result<Trajectory, EvaluationFailure>;
}

impl<F> SimulationEngine for F
where
    F: FnMut(&ParamStore) -> Result<Trajectory, EvaluationFailure>,
{
    fn evaluate(&mut self, params: &ParamStore) -> Result<Trajectory, EvaluationFailure> {
        self(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::params::ParamGroup;
    use crate::engine::params::ParamRecord;
    use nalgebra::Point3;

    #[test]
    fn closures_act_as_engines() {
        let mut calls = 0;
        let mut engine = |params: &ParamStore| {
            calls += 1;
            let x = params.values()[0];
            Trajectory::new(vec![vec![Point3::new(x, 0.0, 0.0)]])
                .map_err(|e| EvaluationFailure::Crashed(e.to_string()))
        };
        let store =
            ParamStore::new(vec![ParamRecord::new(ParamGroup::Sigma, "A", 2.5)]).unwrap();
        let traj = engine.evaluate(&store).unwrap();
        assert_eq!(traj.frame(0).unwrap()[0].x, 2.5);
        drop(engine);
        assert_eq!(calls, 1);
    }

    #[test]
    fn failures_describe_their_cause() {
        let failure = EvaluationFailure::TimedOut(Duration::from_secs(3));
        assert_eq!(failure.to_string(), "Engine timed out after 3s");
    }
}
