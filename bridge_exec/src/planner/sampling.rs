//! # Sampling Planner
//!
//! Predictive sampling over a point-mass push model.
//!
//! The actor is a damped point mass driven by a force command in `[-1, 1]` per axis. The object
//! is quasi-static: it only moves while the actor is within the contact radius and closing on it,
//! in which case it is carried along the approach direction at the closing speed. The object's
//! orientation is held.
//!
//! Each optimisation rolls out the previous best plan (shifted one step) plus a set of perturbed
//! plans on the worker pool and keeps the cheapest.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::Vector3;
use ordered_float::NotNan;
use serde::Deserialize;

use super::{
    Planner, PlannerError, PlannerState, PushWeights, RegisteredResidual, RolloutPoint, Trajectory,
    WorkerPool, DIM_STATE, NQ, NU, NV, QPOS_ACTOR_POS, QPOS_OBJECT_POS, QVEL_ACTOR_VEL,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Bases of the Halton sequence used for each action dimension.
const HALTON_BASES: [u64; NU] = [2, 3, 5];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the sampling planner and its model.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingParams {
    /// Model timestep.
    ///
    /// Units: seconds
    pub timestep_s: f64,

    /// Number of candidate plans per optimisation, including the nominal plan
    pub num_samples: usize,

    /// Magnitude of the perturbation applied to the nominal plan, in command units
    pub noise_scale: f64,

    /// Units: kilograms
    pub actor_mass_kg: f64,

    /// Force produced by a unit command.
    ///
    /// Units: newtons
    pub force_scale_n: f64,

    /// Linear velocity damping on the actor.
    ///
    /// Units: 1/seconds
    pub damping: f64,

    /// Distance between actor and object centres below which they are in contact.
    ///
    /// Units: meters
    pub contact_radius_m: f64,

    /// Weights of the default push residual
    #[serde(default)]
    pub weights: PushWeights,
}

/// Predictive sampling planner.
pub struct SamplingPlanner {
    params: SamplingParams,

    residual: Option<RegisteredResidual>,

    state: PlannerState,

    /// Best plan from the last optimisation, one command per point
    nominal: Vec<[f64; NU]>,

    best: Option<Trajectory>,
    best_cost: Option<f64>,

    /// Number of optimisations run, used to advance the perturbation sequence
    num_opts: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SamplingPlanner {
    pub fn new(params: SamplingParams) -> Self {
        Self {
            params,
            residual: None,
            state: PlannerState::default(),
            nominal: Vec::new(),
            best: None,
            best_cost: None,
            num_opts: 0,
        }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Register the residual the planner minimises, replacing any previous one.
    pub fn register_residual(&mut self, residual: RegisteredResidual) {
        self.residual = Some(residual);
    }

    /// The nominal plan for this optimisation: the last best plan shifted one point, or the
    /// state's action held over the horizon.
    fn nominal_plan(&self, horizon: usize) -> Vec<[f64; NU]> {
        let mut plan: Vec<[f64; NU]> = self.nominal.iter().skip(1).copied().collect();

        let fill = match plan.last() {
            Some(a) => *a,
            None => clamp_ctrl(&self.state.action),
        };

        plan.resize(horizon, fill);
        plan
    }

    /// The nominal plan plus `num_samples - 1` perturbed copies.
    fn candidates(&self, nominal: Vec<[f64; NU]>) -> Vec<Vec<[f64; NU]>> {
        let num_samples = self.params.num_samples.max(1);
        let mut candidates = Vec::with_capacity(num_samples);

        for i in 1..num_samples {
            let seq_idx = self.num_opts * num_samples as u64 + i as u64;
            let mut offset = [0.0; NU];
            for (d, o) in offset.iter_mut().enumerate() {
                *o = self.params.noise_scale * (2.0 * halton(seq_idx, HALTON_BASES[d]) - 1.0);
            }

            candidates.push(
                nominal
                    .iter()
                    .map(|a| {
                        let mut p = [0.0; NU];
                        for d in 0..NU {
                            p[d] = a[d] + offset[d];
                        }
                        clamp_ctrl(&p)
                    })
                    .collect(),
            );
        }

        candidates.insert(0, nominal);
        candidates
    }
}

impl Planner for SamplingPlanner {
    fn set_state(&mut self, state: &PlannerState) {
        self.state = *state;
    }

    fn optimize_policy(&mut self, horizon: usize, pool: &WorkerPool) -> Result<(), PlannerError> {
        if horizon < 2 {
            return Err(PlannerError::EmptyHorizon(horizon));
        }
        let dt = self.params.timestep_s;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PlannerError::InvalidTimestep(dt));
        }

        let residual = self.residual.as_ref().ok_or(PlannerError::NoResidual)?;
        let candidates = self.candidates(self.nominal_plan(horizon));

        let params = &self.params;
        let start = &self.state;
        let rollouts = pool.map(&candidates, |plan| rollout(params, residual, start, plan));

        let (best_idx, best_cost) = rollouts
            .iter()
            .enumerate()
            .filter(|(_, (_, c))| c.is_finite())
            .filter_map(|(i, (_, c))| NotNan::new(*c).ok().map(|c| (i, c)))
            .min_by_key(|(_, c)| *c)
            .ok_or(PlannerError::NonFiniteCost)?;

        trace!(
            "Sampling planner: best candidate {} of {}, cost {:.6}",
            best_idx,
            candidates.len(),
            best_cost
        );

        let (traj, _) = rollouts
            .into_iter()
            .nth(best_idx)
            .ok_or(PlannerError::NonFiniteCost)?;

        self.nominal = candidates
            .into_iter()
            .nth(best_idx)
            .unwrap_or_default();
        self.best = Some(traj);
        self.best_cost = Some(best_cost.into_inner());
        self.num_opts += 1;

        Ok(())
    }

    fn best_trajectory(&self) -> Option<&Trajectory> {
        self.best.as_ref()
    }

    fn best_cost(&self) -> Option<f64> {
        self.best_cost
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Roll a plan out from `start`, returning the trajectory and its total cost.
fn rollout(
    params: &SamplingParams,
    residual: &RegisteredResidual,
    start: &PlannerState,
    plan: &[[f64; NU]],
) -> (Trajectory, f64) {
    let horizon = plan.len();
    let mut traj = Trajectory::zeroed(horizon, DIM_STATE, NU);
    let mut scratch = vec![0.0; residual.num_residuals()];
    let mut cost = 0.0;

    let mut qpos = start.qpos;
    let mut qvel = start.qvel;

    for (k, action) in plan.iter().enumerate() {
        if k > 0 {
            integrate(params, &mut qpos, &mut qvel, &plan[k - 1]);
        }

        traj.times[k] = start.time + k as f64 * params.timestep_s;
        traj.state_mut(k)[..NQ].copy_from_slice(&qpos);
        traj.state_mut(k)[NQ..].copy_from_slice(&qvel);
        traj.action_mut(k).copy_from_slice(action);

        cost += residual.cost(
            &RolloutPoint {
                qpos: &qpos,
                action,
                start,
            },
            &mut scratch,
        );
    }

    (traj, cost)
}

/// Advance the push model by one timestep under the command `ctrl`.
pub(crate) fn integrate(
    params: &SamplingParams,
    qpos: &mut [f64; NQ],
    qvel: &mut [f64; NV],
    ctrl: &[f64; NU],
) {
    let dt = params.timestep_s;
    let ctrl = Vector3::from(clamp_ctrl(ctrl));

    let mut actor_pos = Vector3::from_column_slice(&qpos[QPOS_ACTOR_POS..QPOS_ACTOR_POS + 3]);
    let mut actor_vel = Vector3::from_column_slice(&qvel[QVEL_ACTOR_VEL..QVEL_ACTOR_VEL + 3]);
    let mut obj_pos = Vector3::from_column_slice(&qpos[QPOS_OBJECT_POS..QPOS_OBJECT_POS + 3]);

    // Semi-implicit Euler on the actor
    let accel = ctrl * (params.force_scale_n / params.actor_mass_kg) - actor_vel * params.damping;
    actor_vel += accel * dt;
    actor_pos += actor_vel * dt;

    // Push the object if in contact and closing
    let sep = obj_pos - actor_pos;
    let dist = sep.norm();
    let mut obj_vel = Vector3::zeros();
    if dist < params.contact_radius_m && dist > f64::EPSILON {
        let normal = sep / dist;
        let closing = actor_vel.dot(&normal);
        if closing > 0.0 {
            obj_vel = normal * closing;
        }
    }
    obj_pos += obj_vel * dt;

    qpos[QPOS_ACTOR_POS..QPOS_ACTOR_POS + 3].copy_from_slice(actor_pos.as_slice());
    qpos[QPOS_OBJECT_POS..QPOS_OBJECT_POS + 3].copy_from_slice(obj_pos.as_slice());
    qvel[QVEL_ACTOR_VEL..QVEL_ACTOR_VEL + 3].copy_from_slice(actor_vel.as_slice());
    qvel[0..3].copy_from_slice(obj_vel.as_slice());
    for w in qvel[3..6].iter_mut() {
        *w = 0.0;
    }
}

fn clamp_ctrl(a: &[f64; NU]) -> [f64; NU] {
    let mut out = [0.0; NU];
    for (o, v) in out.iter_mut().zip(a.iter()) {
        *o = v.max(-1.0).min(1.0);
    }
    out
}

/// Element `index` of the Halton sequence in the given base, in `[0, 1)`.
fn halton(mut index: u64, base: u64) -> f64 {
    let mut f = 1.0;
    let mut r = 0.0;
    while index > 0 {
        f /= base as f64;
        r += f * (index % base) as f64;
        index /= base;
    }
    r
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{push_residual, QPOS_OBJECT_QUAT};

    fn params() -> SamplingParams {
        SamplingParams {
            timestep_s: 0.01,
            num_samples: 16,
            noise_scale: 0.5,
            actor_mass_kg: 1.0,
            force_scale_n: 1.5,
            damping: 0.0,
            contact_radius_m: 0.05,
            weights: PushWeights::default(),
        }
    }

    fn planner() -> SamplingPlanner {
        let mut p = SamplingPlanner::new(params());
        p.register_residual(push_residual(&p.params().weights));
        p
    }

    fn start_state() -> PlannerState {
        let mut s = PlannerState::default();
        s.qpos[QPOS_OBJECT_POS..QPOS_OBJECT_POS + 3].copy_from_slice(&[1.0, 0.0, 0.0]);
        s.mocap_pos[..3].copy_from_slice(&[1.0, 0.0, 0.0]);
        s.mocap_pos[6..9].copy_from_slice(&[0.2, 0.0, 0.0]);
        s.time = 3.0;
        s
    }

    #[test]
    fn test_halton() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_requires_residual() {
        let mut p = SamplingPlanner::new(params());
        p.set_state(&start_state());
        assert!(matches!(
            p.optimize_policy(10, &WorkerPool::new(2)),
            Err(PlannerError::NoResidual)
        ));
        assert!(p.best_trajectory().is_none());
    }

    #[test]
    fn test_rejects_short_horizon() {
        let mut p = planner();
        assert!(matches!(
            p.optimize_policy(1, &WorkerPool::new(1)),
            Err(PlannerError::EmptyHorizon(1))
        ));
    }

    #[test]
    fn test_rejects_infinite_cost() {
        let mut p = SamplingPlanner::new(params());
        p.register_residual(RegisteredResidual {
            func: Box::new(|_: &RolloutPoint<'_>, out: &mut [f64]| out[0] = f64::INFINITY),
            weights: vec![1.0],
        });
        p.set_state(&start_state());

        assert!(matches!(
            p.optimize_policy(10, &WorkerPool::new(2)),
            Err(PlannerError::NonFiniteCost)
        ));
        assert!(p.best_trajectory().is_none());
    }

    #[test]
    fn test_trajectory_shape() {
        let mut p = planner();
        let start = start_state();
        p.set_state(&start);
        p.optimize_policy(11, &WorkerPool::new(4)).unwrap();

        let traj = p.best_trajectory().unwrap();
        assert!(traj.is_consistent());
        assert_eq!(traj.horizon, 11);
        assert_eq!(traj.dim_state, DIM_STATE);
        assert_eq!(traj.dim_action, NU);
        assert_eq!(traj.times[0], 3.0);
        assert!((traj.times[10] - 3.1).abs() < 1e-12);

        // The first point is the start state verbatim
        assert_eq!(traj.state(0)[..NQ], start.qpos);
        assert_eq!(traj.state(0)[NQ..], start.qvel);

        // Commands stay in range and the held orientation never changes
        assert!(traj.actions.iter().all(|a| a.abs() <= 1.0));
        for k in 0..traj.horizon {
            assert_eq!(
                traj.state(k)[QPOS_OBJECT_QUAT..QPOS_OBJECT_QUAT + 4],
                [1.0, 0.0, 0.0, 0.0]
            );
        }
        assert!(p.best_cost().unwrap().is_finite());
    }

    #[test]
    fn test_drives_actor_toward_goal() {
        let mut p = planner();
        p.set_state(&start_state());

        for _ in 0..3 {
            p.optimize_policy(20, &WorkerPool::new(2)).unwrap();
        }

        let traj = p.best_trajectory().unwrap();
        assert!(traj.action(0)[0] > 0.0);
        assert!(traj.state(19)[QPOS_ACTOR_POS] > 0.0);
    }

    #[test]
    fn test_same_result_for_any_pool_size() {
        let mut a = planner();
        let mut b = planner();
        a.set_state(&start_state());
        b.set_state(&start_state());

        a.optimize_policy(15, &WorkerPool::new(1)).unwrap();
        b.optimize_policy(15, &WorkerPool::new(5)).unwrap();

        assert_eq!(a.best_trajectory(), b.best_trajectory());
    }

    #[test]
    fn test_push_moves_object() {
        let params = params();
        let mut qpos = [0.0; NQ];
        let mut qvel = [0.0; NV];

        // Actor just behind the object, moving into it
        qpos[QPOS_OBJECT_POS] = 0.02;
        qvel[QVEL_ACTOR_VEL] = 0.5;

        integrate(&params, &mut qpos, &mut qvel, &[1.0, 0.0, 0.0]);

        assert!(qpos[QPOS_OBJECT_POS] > 0.02);
        assert!(qvel[0] > 0.0);

        // Out of contact nothing moves the object
        let mut qpos = [0.0; NQ];
        let mut qvel = [0.0; NV];
        qpos[QPOS_OBJECT_POS] = 1.0;
        integrate(&params, &mut qpos, &mut qvel, &[1.0, 0.0, 0.0]);
        assert_eq!(qpos[QPOS_OBJECT_POS], 1.0);
        assert!(qpos[QPOS_ACTOR_POS] > 0.0);
    }
}
