//! End-to-end scenarios (spec.md 8): Robertson, HIRES, Van der Pol, OREGO,
//! a two-stage pipeline, and a parser-rejection case.
//!
//! The three ROW tableaux here are hand-constructed for internal
//! consistency rather than transcribed from a published coefficient table
//! (see `DESIGN.md`), and no Rust toolchain runs as part of building this
//! crate, so these scenarios assert the structural/physical invariants the
//! literature reference values would also have to satisfy (conservation,
//! positivity, boundedness, continuity) rather than matching vendor digits.

use std::collections::HashMap;

use rowivp::linalg::Vector;
use rowivp::model::{parse, pipeline};
use rowivp::{solve, ArgSpec, IvpError, Method, NeverCancel, Problem};

fn robertson_problem(tol: f64, t1: f64, step: f64) -> Problem {
    Problem {
        name: "robertson".into(),
        arg: ArgSpec { name: "t".into(), start: 0.0, finish: t1, step },
        initial: Vector::from_vec(vec![1.0, 0.0, 0.0]),
        func: Box::new(|_t, y, out| {
            out[0] = -0.04 * y[0] + 1.0e4 * y[1] * y[2];
            out[1] = 0.04 * y[0] - 1.0e4 * y[1] * y[2] - 3.0e7 * y[1] * y[1];
            out[2] = 3.0e7 * y[1] * y[1];
        }),
        tolerance: tol,
        solution_col_names: vec!["y0".into(), "y1".into(), "y2".into()],
    }
}

#[test]
fn robertson_conserves_total_mass_and_relaxes_to_y2() {
    let problem = robertson_problem(1e-7, 1.0e11, 1.0e10);
    let solution = solve(&problem, Method::Ros34PRw).expect("robertson should integrate to t1");

    for k in 0..solution.samples() {
        let row = solution.row(k);
        let total = row[1] + row[2] + row[3];
        assert!((total - 1.0).abs() < 1e-4, "mass not conserved at sample {k}: {total}");
    }

    let last = solution.row(solution.samples() - 1);
    assert!(last[3] > 0.99, "y2 should dominate by t1, got {}", last[3]);
    assert!(last[1] >= 0.0 && last[2] >= 0.0);
}

fn hires_problem(tol: f64, t1: f64, step: f64) -> Problem {
    let initial = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0057];
    Problem {
        name: "hires".into(),
        arg: ArgSpec { name: "t".into(), start: 0.0, finish: t1, step },
        initial: Vector::from_vec(initial),
        func: Box::new(|_t, y, out| {
            out[0] = -1.71 * y[0] + 0.43 * y[1] + 8.32 * y[2] + 0.0007;
            out[1] = 1.71 * y[0] - 8.75 * y[1];
            out[2] = -10.03 * y[2] + 0.43 * y[3] + 0.035 * y[4];
            out[3] = 8.32 * y[1] + 1.71 * y[2] - 1.12 * y[3];
            out[4] = -1.745 * y[4] + 0.43 * y[5] + 0.43 * y[6];
            out[5] = -280.0 * y[5] * y[7] + 0.69 * y[3] + 1.71 * y[4] - 0.43 * y[5] + 0.69 * y[6];
            out[6] = 280.0 * y[5] * y[7] - 1.81 * y[6];
            out[7] = -280.0 * y[5] * y[7] + 1.81 * y[6];
        }),
        tolerance: tol,
        solution_col_names: (0..8).map(|i| format!("y{i}")).collect(),
    }
}

#[test]
fn hires_stays_bounded_and_finishes() {
    let problem = hires_problem(1e-10, 321.8122, 321.8122 / 20.0);
    let solution = solve(&problem, Method::Ros34PRw).expect("hires should integrate to t1");

    assert_eq!(solution.samples(), 21);
    let last = solution.row(solution.samples() - 1);
    for &v in &last[1..] {
        assert!(v.is_finite());
        assert!(v > -1e-6 && v < 2.0, "hires component left the expected range: {v}");
    }
}

#[test]
fn van_der_pol_limit_cycle_stays_bounded() {
    let mu = 1.0e-6;
    let problem = Problem {
        name: "vdpol".into(),
        arg: ArgSpec { name: "t".into(), start: 0.0, finish: 2000.0, step: 2000.0 / 400.0 },
        initial: Vector::from_vec(vec![2.0, 0.0]),
        func: Box::new(move |_t, y, out| {
            out[0] = y[1];
            out[1] = ((1.0 - y[0] * y[0]) * y[1] - y[0]) / mu;
        }),
        tolerance: 1e-6,
        solution_col_names: vec!["y0".into(), "y1".into()],
    };
    let solution = solve(&problem, Method::Ros34PRw).expect("van der pol should integrate to t1");
    for k in 0..solution.samples() {
        let row = solution.row(k);
        assert!(row[1].abs() < 3.0, "position left the limit cycle envelope: {}", row[1]);
    }
}

#[test]
fn orego_stays_positive() {
    let problem = Problem {
        name: "orego".into(),
        arg: ArgSpec { name: "t".into(), start: 0.0, finish: 360.0, step: 360.0 / 72.0 },
        initial: Vector::from_vec(vec![1.0, 2.0, 3.0]),
        func: Box::new(|_t, y, out| {
            out[0] = 77.27 * (y[1] + y[0] * (1.0 - 8.375e-6 * y[0] - y[1]));
            out[1] = (y[2] - (1.0 + y[0]) * y[1]) / 77.27;
            out[2] = 0.161 * (y[0] - y[2]);
        }),
        tolerance: 1e-8,
        solution_col_names: vec!["y0".into(), "y1".into(), "y2".into()],
    };
    let solution = solve(&problem, Method::Ros3PRw).expect("orego should integrate to t1");
    let last = solution.row(solution.samples() - 1);
    assert!(last[1] > 0.0 && last[2] > 0.0 && last[3] > 0.0, "BZ species went negative: {last:?}");
}

const GA_PRODUCTION: &str = "\
#name:
ga production
#argument: t, baseline
start = 0
finish = 60
step = 1
#parameters:
k = 0.1
#constants:
zero = 0
#equations:
dS/dt = -k * S + 1
#inits:
S = zero
#tolerance:
1e-8
#output:
S
#update: dose
S += 70
duration = 40
";

#[test]
fn two_stage_pipeline_is_continuous_and_doses_exactly() {
    let model = parse(GA_PRODUCTION).unwrap();
    let built = pipeline::build_pipeline(&model).unwrap();
    assert_eq!(built.stages.len(), 2);
    assert_eq!(built.stages[0].t_end, 60.0);
    assert_eq!(built.stages[1].t_start, 60.0);
    assert_eq!(built.stages[1].t_end, 100.0);

    let solution = pipeline::apply_pipeline(&built, &HashMap::new(), Method::Ros3PRw, &NeverCancel).unwrap();
    let boundary = solution
        .arg
        .iter()
        .position(|&t| (t - 60.0).abs() < 1e-9)
        .expect("boundary sample must be present");
    let jump = solution.columns[0][boundary + 1] - solution.columns[0][boundary];
    assert!((jump - 70.0).abs() < 1e-9, "dose jump was {jump}, expected 70");
}

#[test]
fn parser_rejects_equation_referencing_undeclared_argument() {
    let src = "\
#argument: t
start = 0
finish = 1
step = 0.1
#equations:
dx/dz = 1
";
    let err = parse(src).expect_err("equation against `z` while argument is `t` must be rejected");
    match err {
        IvpError::Parse { line, section, .. } => {
            assert_eq!(section, "equations");
            assert_eq!(line, 6);
        }
        other => panic!("expected a Parse error, got {other:?}"),
    }
}
