//! Main bridge executable entry point.
//!
//! # Architecture
//!
//! The bridge connects a state estimator to a trajectory tracker through a sampling based MPC
//! planner:
//!
//!     - Initialise session, logging, parameters and the network
//!     - Main loop (see `driver::ControlLoop`):
//!         - Pump pending estimator messages into the state snapshot
//!         - Await the first state, then every cycle:
//!             - Assemble the planner state from the snapshot
//!             - Optimise over the horizon
//!             - Pack and publish the actor and object trajectories
//!
//! Any error in the main loop is fatal and ends the execution.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use std::sync::Arc;
use structopt::StructOpt;

// Internal
use bridge_lib::{
    driver::ControlLoop,
    gateway::{MessageGateway, ZmqTransport},
    params::BridgeExecParams,
    plan_ctrl::PlanCtrl,
    planner::{push_residual, SamplingPlanner, WorkerPool},
    snapshot::StateSnapshot,
};
use comms_if::net::{zmq, NetParams};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// MPC bridge between the C3 state estimator and the trajectory tracker.
#[derive(Debug, StructOpt)]
#[structopt(name = "bridge_exec")]
struct Opts {
    /// Executable parameter file, relative to `$MPC_BRIDGE_ROOT/params`
    #[structopt(long = "params", default_value = "bridge_exec.toml")]
    params: String,

    /// Network parameter file, relative to `$MPC_BRIDGE_ROOT/params`
    #[structopt(long = "net-params", default_value = "net.toml")]
    net_params: String,

    /// Minimum log level, at least `info`
    #[structopt(long = "log-level", default_value = "debug")]
    log_level: LevelFilter,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session =
        Session::new("bridge_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(opts.log_level, &session).wrap_err("Failed to initialise logging")?;

    info!("MPC Bridge Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load(&opts.net_params).wrap_err("Could not load net params")?;

    let params: BridgeExecParams =
        util::params::load(&opts.params).wrap_err("Could not load exec params")?;

    params.validate().wrap_err("Invalid exec params")?;

    info!("Exec parameters loaded");
    info!("    Horizon: {} s", params.planner.horizon_s);
    info!("    Timestep: {} s", params.planner.timestep_s);
    info!("    Threads: {}", params.planner.num_threads);
    info!("    Action gain: {}", params.planner.action_gain);
    info!("    Samples: {}\n", params.sampling.num_samples);

    // ---- INITIALISE PLANNER ----

    let mut planner = SamplingPlanner::new(params.sampling.clone());
    planner.register_residual(push_residual(&params.sampling.weights));

    let pool = WorkerPool::new(params.planner.num_threads);
    let plan_ctrl = PlanCtrl::new(planner, pool, &params.planner);

    info!(
        "Planner initialised ({} points over {} threads)",
        plan_ctrl.horizon(),
        pool.num_threads()
    );

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let transport = ZmqTransport::new(&zmq_ctx, &net_params, &params.channels)
        .wrap_err("Failed to initialise the network transport")?;
    info!(
        "Subscribed to {} (state: {}, target: {}, final target: {})",
        net_params.estimator_endpoint,
        params.channels.state,
        params.channels.target,
        params.channels.final_target
    );
    info!(
        "Publishing on {} (actor: {}, object: {})\n",
        net_params.trajectory_endpoint, params.channels.actor_traj, params.channels.object_traj
    );

    let gateway = MessageGateway::new(
        transport,
        params.channels.clone(),
        Arc::new(StateSnapshot::new()),
    );

    // ---- MAIN LOOP ----

    let mut control_loop =
        ControlLoop::new(gateway, plan_ctrl, params.defaults, params.loop_ctrl.clone());

    control_loop
        .run()
        .wrap_err("Control loop stopped on a fatal error")?;

    info!("End of execution");

    Ok(())
}
