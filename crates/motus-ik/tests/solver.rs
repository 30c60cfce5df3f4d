//! End-to-end kinematics-solver scenarios on a small biped model.

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use nalgebra::{DVector, UnitQuaternion, Vector3};

use motus_core::config::EstimatorConfig;
use motus_core::error::IkError;
use motus_core::time::Timestep;
use motus_ik::KinematicsSolver;
use motus_model::Model;

const MODEL: &str = r#"
    name = "biped"
    base_link = "pelvis"

    [[links]]
    name = "pelvis"
    mass = 10.0

    [[links]]
    name = "torso"
    mass = 20.0
    com = [0.0, 0.0, 0.2]

    [[links]]
    name = "left_foot"
    mass = 1.0

    [[joints]]
    name = "waist"
    parent = "pelvis"
    child = "torso"
    axis = [0.0, 1.0, 0.0]
    origin = { xyz = [0.0, 0.0, 0.2] }
    lower_limit = -1.5
    upper_limit = 1.5

    [[joints]]
    name = "left_hip"
    parent = "pelvis"
    child = "left_foot"
    axis = [0.0, 1.0, 0.0]
    origin = { xyz = [0.0, 0.0, -0.8] }
    lower_limit = -1.5
    upper_limit = 1.5
"#;

const CONFIG: &str = r#"
    tasks = [
        "PELVIS_TASK",
        "TORSO_TASK",
        "LEFT_FOOT_CONTACT",
        "LEFT_FOOT_GRAVITY",
        "REGULARIZATION",
        "LIMITS",
    ]

    [IK]
    robot_velocity_variable_name = "robot_velocity"

    [PELVIS_TASK]
    type = "SO3Task"
    node_number = 1
    frame_name = "pelvis"
    weight = 10.0
    kp = 10.0

    [TORSO_TASK]
    type = "SO3Task"
    node_number = 2
    frame_name = "torso"
    weight = 10.0
    kp = 10.0

    [LEFT_FOOT_CONTACT]
    type = "FloorContactTask"
    node_number = 5
    frame_name = "left_foot"
    weight = 50.0
    kp = 5.0

    [LEFT_FOOT_GRAVITY]
    type = "GravityTask"
    node_number = 5
    frame_name = "left_foot"
    weight_min = 1.0
    weight_max = 9.0
    kp = 5.0

    [REGULARIZATION]
    type = "JointRegularizationTask"
    weight = 0.001

    [LIMITS]
    type = "JointConstraintTask"
"#;

fn setup() -> (KinematicsSolver, Model) {
    let model = Model::from_toml_str(MODEL).unwrap();
    let config = EstimatorConfig::from_toml_str(CONFIG).unwrap();
    let mut solver = KinematicsSolver::initialize(&config, &model).unwrap();
    solver.set_dt(Timestep::from_secs(0.01));
    (solver, model)
}

/// Drive pelvis to identity and torso to `target` for `cycles` steps.
fn track(
    solver: &mut KinematicsSolver,
    model: &mut Model,
    target: &UnitQuaternion<f64>,
    cycles: usize,
) {
    let identity = UnitQuaternion::identity();
    let zero = Vector3::zeros();
    for _ in 0..cycles {
        solver.update_orientation_task(1, &identity, &zero).unwrap();
        solver.update_orientation_task(2, target, &zero).unwrap();
        solver.update_gravity_task(5, &identity).unwrap();
        solver.update_floor_contact_task(5, 0.0).unwrap();
        solver.advance(model).unwrap();
    }
}

#[test]
fn torso_orientation_tracked_through_waist_joint() {
    let (mut solver, mut model) = setup();
    let target = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.2);

    track(&mut solver, &mut model, &target, 400);

    let mut q = [0.0; 2];
    solver.joint_positions_into(&mut q).unwrap();
    // waist carries the pitch, hip stays put
    assert_relative_eq!(q[0], 0.2, epsilon = 1e-3);
    assert_relative_eq!(q[1], 0.0, epsilon = 1e-3);
    // pelvis task holds the base at identity
    assert_relative_eq!(solver.base_orientation().angle(), 0.0, epsilon = 1e-3);
}

#[test]
fn joint_limit_caps_excessive_target() {
    let (mut solver, mut model) = setup();
    let target = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 1.4);

    // 1.4 rad split between base and joint would violate nothing, but the
    // pelvis task pins the base, so the waist must absorb it all; push past
    // the limit and check the constraint clips the joint.
    let beyond = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 2.5);
    track(&mut solver, &mut model, &target, 200);
    track(&mut solver, &mut model, &beyond, 400);

    let mut q = [0.0; 2];
    solver.joint_positions_into(&mut q).unwrap();
    assert!(q[0] <= 1.5 + 1e-6, "waist exceeded its limit: {}", q[0]);
    assert!(q[0] > 1.4, "waist should ride the limit: {}", q[0]);
}

#[test]
fn identical_runs_are_deterministic() {
    let run = || {
        let (mut solver, mut model) = setup();
        let target = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3);
        track(&mut solver, &mut model, &target, 50);
        let mut q = [0.0; 2];
        solver.joint_positions_into(&mut q).unwrap();
        let mut dq = [0.0; 2];
        solver.joint_velocities_into(&mut dq).unwrap();
        (q, dq, solver.base_position(), solver.base_orientation())
    };

    let first = run();
    let second = run();
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
    assert_eq!(first.3, second.3);
}

#[test]
fn velocity_variable_name_comes_from_the_ik_group() {
    let (solver, _model) = setup();
    assert_eq!(solver.velocity_variable_name(), "robot_velocity");
}

#[test]
fn accessor_buffer_lengths_are_checked() {
    let (solver, _model) = setup();
    assert_eq!(solver.ndof(), 2);

    let mut short = [0.0; 1];
    assert!(matches!(
        solver.joint_positions_into(&mut short),
        Err(IkError::BufferSize {
            expected: 2,
            got: 1
        })
    ));
    let mut long = [0.0; 5];
    assert!(matches!(
        solver.joint_velocities_into(&mut long),
        Err(IkError::BufferSize {
            expected: 2,
            got: 5
        })
    ));
}

#[test]
fn unknown_node_is_rejected_without_side_effects() {
    let (mut solver, mut model) = setup();
    let identity = UnitQuaternion::identity();

    assert!(matches!(
        solver.update_orientation_task(99, &identity, &Vector3::zeros()),
        Err(IkError::UnknownNode(99))
    ));
    assert!(matches!(
        solver.update_floor_contact_task(99, 10.0),
        Err(IkError::UnknownNode(99))
    ));

    // the solver still runs a clean cycle afterwards
    let target = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.1);
    track(&mut solver, &mut model, &target, 10);
}

#[test]
fn world_yaw_calibration_discards_heading() {
    let (mut solver, mut model) = setup();

    // torso sensor reports pitch 0.2 with a spurious heading of 0.7
    let measured = UnitQuaternion::from_euler_angles(0.0, 0.2, 0.7);
    let mut readings = BTreeMap::new();
    readings.insert(2, measured);
    solver.calibrate_world_yaw(&readings).unwrap();

    let identity = UnitQuaternion::identity();
    let zero = Vector3::zeros();
    for _ in 0..400 {
        solver.update_orientation_task(1, &identity, &zero).unwrap();
        solver.update_orientation_task(2, &measured, &zero).unwrap();
        solver.update_gravity_task(5, &identity).unwrap();
        solver.update_floor_contact_task(5, 0.0).unwrap();
        solver.advance(&mut model).unwrap();
    }

    let mut q = [0.0; 2];
    solver.joint_positions_into(&mut q).unwrap();
    assert_relative_eq!(q[0], 0.2, epsilon = 1e-3);
}

#[test]
fn duplicate_node_configuration_is_rejected() {
    let model = Model::from_toml_str(MODEL).unwrap();
    let text = r#"
        tasks = ["A", "B"]

        [IK]
        robot_velocity_variable_name = "robot_velocity"

        [A]
        type = "SO3Task"
        node_number = 3
        frame_name = "pelvis"

        [B]
        type = "SO3Task"
        node_number = 3
        frame_name = "torso"
    "#;
    let config = EstimatorConfig::from_toml_str(text).unwrap();
    assert!(matches!(
        KinematicsSolver::initialize(&config, &model),
        Err(IkError::DuplicateNode(3))
    ));
}

#[test]
fn joint_velocity_decays_toward_steady_state() {
    // Six-joint chain, one orientation task on the tip with identity target,
    // nonzero initial posture: the joint speed shrinks every cycle.
    let mut model_text = String::from(
        r#"
        name = "chain"
        base_link = "l0"

        [[links]]
        name = "l0"
        mass = 1.0
        "#,
    );
    for i in 1..=6 {
        let axis = if i % 2 == 0 { "[1.0, 0.0, 0.0]" } else { "[0.0, 1.0, 0.0]" };
        model_text.push_str(&format!(
            r#"
            [[links]]
            name = "l{i}"
            mass = 1.0

            [[joints]]
            name = "j{i}"
            parent = "l{}"
            child = "l{i}"
            axis = {axis}
            origin = {{ xyz = [0.0, 0.0, 0.2] }}
            lower_limit = -3.0
            upper_limit = 3.0
            "#,
            i - 1
        ));
    }
    let mut model = Model::from_toml_str(&model_text).unwrap();
    model
        .set_state(
            &nalgebra::Isometry3::identity(),
            &DVector::from_element(6, 0.3),
            &Vector3::zeros(),
            &Vector3::zeros(),
            &DVector::zeros(6),
        )
        .unwrap();

    let config_text = r#"
        tasks = ["TIP"]

        [IK]
        robot_velocity_variable_name = "robot_velocity"

        [TIP]
        type = "SO3Task"
        node_number = 1
        frame_name = "l6"
        weight = 10.0
        kp = 2.0
    "#;
    let config = EstimatorConfig::from_toml_str(config_text).unwrap();
    let mut solver = KinematicsSolver::initialize(&config, &model).unwrap();
    solver.set_dt(Timestep::from_secs(0.01));

    let identity = UnitQuaternion::identity();
    let mut norms = Vec::new();
    let mut dq = [0.0; 6];
    for _ in 0..600 {
        solver
            .update_orientation_task(1, &identity, &Vector3::zeros())
            .unwrap();
        solver.advance(&mut model).unwrap();
        solver.joint_velocities_into(&mut dq).unwrap();
        norms.push(dq.iter().map(|v| v * v).sum::<f64>().sqrt());
    }
    for pair in norms.windows(2) {
        assert!(
            pair[1] <= pair[0] + 1e-6,
            "velocity norm increased: {} -> {}",
            pair[0],
            pair[1]
        );
    }
    assert!(norms[0] > 1e-3, "initial posture should produce motion");
    assert!(*norms.last().unwrap() < 1e-3);
}

#[test]
fn joint_regularization_requires_matching_length() {
    let (mut solver, _model) = setup();
    assert!(matches!(
        solver.update_joint_regularization_task(&DVector::zeros(4)),
        Err(IkError::BufferSize {
            expected: 2,
            got: 4
        })
    ));
    solver
        .update_joint_regularization_task(&DVector::zeros(2))
        .unwrap();
    solver.update_joint_constraints_task().unwrap();
}
