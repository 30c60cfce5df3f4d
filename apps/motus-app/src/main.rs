//! Motus human-motion estimation CLI.
//!
//! Provides two modes of operation:
//! - `run`: Drive the estimators with a synthetic sensor sweep and print
//!   joint/torque summaries
//! - `info`: Print workspace crate versions

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use nalgebra::{UnitQuaternion, Vector3};

use motus_core::config::EstimatorConfig;
use motus_core::error::MotusError;
use motus_core::time::Timestep;
use motus_core::types::Wrench;
use motus_id::DynamicsEstimator;
use motus_ik::KinematicsSolver;
use motus_model::Model;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Motus human motion estimation stack.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the estimation loop on synthetic sensor data.
    Run {
        /// Estimator configuration file (TOML).
        #[arg(short, long)]
        config: String,

        /// Articulated model description (TOML).
        #[arg(short, long)]
        model: String,

        /// Number of estimation cycles.
        #[arg(short = 'n', long, default_value_t = 500)]
        cycles: u32,

        /// Timestep in seconds.
        #[arg(long, default_value_t = 0.01)]
        dt: f64,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run(config_path: &str, model_path: &str, cycles: u32, dt: f64) -> Result<(), MotusError> {
    let config = EstimatorConfig::from_path(config_path)?;
    let mut model = Model::from_path(model_path)?;

    let mut solver = KinematicsSolver::initialize(&config, &model)?;
    solver.set_dt(Timestep::from_secs(dt));

    let mut dynamics = match config.external_wrenches {
        Some(_) => Some(DynamicsEstimator::initialize(&config, &model)?),
        None => None,
    };

    let orientation_nodes = solver.orientation_nodes();
    let gravity_nodes = solver.gravity_nodes();
    let contact_nodes = solver.contact_nodes();
    tracing::info!(
        joints = model.ndof(),
        orientation = orientation_nodes.len(),
        gravity = gravity_nodes.len(),
        contact = contact_nodes.len(),
        "estimation loop starting"
    );

    let identity = UnitQuaternion::identity();
    let mut q = vec![0.0; solver.ndof()];
    for cycle in 0..cycles {
        let elapsed = f64::from(cycle) * dt;

        // slow pitch sway plus an on/off contact pattern
        let sway = UnitQuaternion::from_axis_angle(
            &Vector3::y_axis(),
            0.3 * (std::f64::consts::TAU * 0.25 * elapsed).sin(),
        );
        let loaded = (std::f64::consts::TAU * 0.25 * elapsed).cos() > 0.0;

        for &node in &orientation_nodes {
            solver.update_orientation_task(node, &sway, &Vector3::zeros())?;
        }
        for &node in &gravity_nodes {
            solver.update_gravity_task(node, &identity)?;
        }
        for &node in &contact_nodes {
            solver.update_floor_contact_task(node, if loaded { 100.0 } else { 0.0 })?;
        }

        if let Err(e) = solver.advance(&mut model) {
            tracing::warn!(cycle, error = %e, "kinematics cycle skipped");
            continue;
        }

        if let Some(est) = dynamics.as_mut() {
            est.sync_state(&model)?;
            let share = 9.81 * est.model().total_mass() / est.source_names().len().max(1) as f64;
            let raw: HashMap<String, Wrench> = est
                .source_names()
                .iter()
                .map(|&name| {
                    let force = if loaded { share } else { 0.0 };
                    (
                        name.to_string(),
                        Wrench::new(Vector3::new(0.0, 0.0, force), Vector3::zeros()),
                    )
                })
                .collect();
            est.update_measurements(&raw)?;
            if let Err(e) = est.solve() {
                tracing::warn!(cycle, error = %e, "dynamics cycle skipped");
            }
        }

        if cycle % 50 == 0 {
            solver.joint_positions_into(&mut q)?;
            let torque_norm = dynamics
                .as_ref()
                .map_or(0.0, |est| est.joint_torques().norm());
            let q_norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
            tracing::info!(cycle, q_norm, torque_norm, "cycle summary");
        }
    }

    solver.joint_positions_into(&mut q)?;
    println!("final joint positions: {q:.4?}");
    if let Some(est) = dynamics.as_ref() {
        for (name, wrench) in est.source_names().iter().zip(est.estimated_ext_wrenches()) {
            println!(
                "{name}: force=({:.2}, {:.2}, {:.2}) N",
                wrench.force.x, wrench.force.y, wrench.force.z
            );
        }
        println!("joint torques: {:.3?}", est.joint_torques().as_slice());
    }
    Ok(())
}

fn run_info() {
    println!("motus v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  motus-core   {}", env!("CARGO_PKG_VERSION"));
    println!("  motus-model  {}", env!("CARGO_PKG_VERSION"));
    println!("  motus-ik     {}", env!("CARGO_PKG_VERSION"));
    println!("  motus-id     {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("edition: 2021");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            model,
            cycles,
            dt,
        } => {
            if let Err(e) = run(&config, &model, cycles, dt) {
                tracing::error!(error = %e, "estimation run failed");
                std::process::exit(1);
            }
        }
        Commands::Info => run_info(),
    }
}
