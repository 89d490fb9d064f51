//! Pipeline builder (component G): lowers a [`ParsedModel`] into a
//! sequence of integrator stages and drives them end to end, applying
//! each `#update` block's assignments between stages (spec.md 4.G).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::control::StepControlConfig;
use crate::driver::{self, Method};
use crate::error::{IvpError, Result};
use crate::linalg::Vector;
use crate::model::ParsedModel;
use crate::problem::{ArgSpec, Cancellation, Problem, Rhs, Solution, Stats};

/// One segment of the pipeline: an argument range, output step, and the
/// label carried into error messages raised while integrating it.
#[derive(Debug, Clone)]
pub struct Stage {
    pub label: String,
    pub t_start: f64,
    pub t_end: f64,
    pub h_out: f64,
    /// Index into `model.updates` applied on entry to this stage, or
    /// `None` for a cycle's first (un-updated) stage.
    update_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub model: ParsedModel,
    pub stages: Vec<Stage>,
}

/// Evaluates `duration`/`step` overrides in an update block against
/// `_t0`, `_t1`, `_h`, `overall`, `_count`, and the model's
/// parameters/constants -- spec.md 4.G's named availability list. State
/// and expression values are deliberately absent: stage boundaries are
/// structural and must not depend on the trajectory.
fn stage_fold_workspace(model: &ParsedModel, prev: &Stage, count: u32) -> Vec<f64> {
    let mut ws = base_workspace(model);
    if let Some(idx) = model.binding.get("_t0") {
        ws[idx] = prev.t_start;
    }
    if let Some(idx) = model.binding.get("_t1") {
        ws[idx] = prev.t_end;
    }
    if let Some(idx) = model.binding.get("_h") {
        ws[idx] = prev.h_out;
    }
    if let Some(idx) = model.binding.get("overall") {
        ws[idx] = model.argument.finish - model.argument.start;
    }
    if let Some(idx) = model.binding.get("_count") {
        ws[idx] = f64::from(count);
    }
    ws
}

/// A workspace seeded with every parameter's default and every
/// constant's folded value; the starting point for both stage-boundary
/// folding and a stage's runtime `func` snapshot.
fn base_workspace(model: &ParsedModel) -> Vec<f64> {
    let mut ws = vec![0.0f64; model.binding.len()];
    for p in &model.parameters {
        if let Some(idx) = model.binding.get(&p.name) {
            ws[idx] = p.default;
        }
    }
    for c in &model.constants {
        if let Some(idx) = model.binding.get(&c.name) {
            ws[idx] = c.value;
        }
    }
    ws
}

/// Builds the stage sequence, unrolling `#loop: N` at build time
/// (spec.md 9: "cyclic models are unrolled at build time using
/// `_count`; there is no runtime graph traversal").
pub fn build_pipeline(model: &ParsedModel) -> Result<Pipeline> {
    if model.argument.step <= 0.0 {
        return Err(IvpError::config("model's base argument step must be > 0"));
    }
    let cycles = model.loop_count.unwrap_or(1).max(1);
    let mut stages: Vec<Stage> = Vec::new();

    for count in 0..cycles {
        let base = stages.last().cloned();
        let (t_start, t_end, h_out) = match &base {
            Some(prev) => (prev.t_end, prev.t_end + (model.argument.finish - model.argument.start), model.argument.step),
            None => (model.argument.start, model.argument.finish, model.argument.step),
        };
        stages.push(Stage {
            label: if model.argument.label.is_empty() {
                model.name.clone()
            } else {
                model.argument.label.clone()
            },
            t_start,
            t_end,
            h_out,
            update_index: None,
        });

        for (u_idx, update) in model.updates.iter().enumerate() {
            let prev = stages.last().unwrap().clone();
            let fold_ws = stage_fold_workspace(model, &prev, count);

            let duration = update
                .assignments
                .iter()
                .find(|a| a.target == "duration")
                .map(|a| a.expr.eval_once(&fold_ws))
                .unwrap_or(prev.t_end - prev.t_start);
            let h_out = update
                .assignments
                .iter()
                .find(|a| a.target == "step")
                .map(|a| a.expr.eval_once(&fold_ws))
                .unwrap_or(prev.h_out);
            if duration <= 0.0 {
                return Err(IvpError::config(format!(
                    "update block `{}` produced a non-positive stage duration ({duration})",
                    update.label
                )));
            }
            if h_out <= 0.0 {
                return Err(IvpError::config(format!("update block `{}` set step <= 0", update.label)));
            }

            let t_start = prev.t_end;
            stages.push(Stage {
                label: update.label.clone(),
                t_start,
                t_end: t_start + duration,
                h_out,
                update_index: Some(u_idx),
            });
        }
    }

    Ok(Pipeline { model: model.clone(), stages })
}

/// Builds `func(t, y, out)` for one stage over the **full** state
/// vector (spec.md 4.F): copies `t`/`y` into a shared workspace seeded
/// with this stage's parameter/constant snapshot, evaluates
/// `#expressions` top-to-bottom, then each equation's right-hand side
/// into `out`. The workspace and evaluation scratch stack are allocated
/// once per stage and reused for every call the driver makes.
fn make_rhs(model: &ParsedModel, seed: Vec<f64>) -> Rhs {
    let t_idx = model.binding.get(&model.argument.name).expect("argument name is always bound");
    let state_idxs: Vec<usize> = model
        .equations
        .iter()
        .map(|e| model.binding.get(&e.state).expect("state names are always bound"))
        .collect();
    let expr_idxs: Vec<usize> = model
        .expressions
        .iter()
        .map(|e| model.binding.get(&e.name).expect("expression names are always bound"))
        .collect();
    let expressions = model.expressions.clone();
    let equations = model.equations.clone();

    let ws_cell = Rc::new(RefCell::new(seed));
    let stack_cell = Rc::new(RefCell::new(Vec::<f64>::new()));

    Box::new(move |t: f64, y: &Vector, out: &mut Vector| {
        let mut ws = ws_cell.borrow_mut();
        ws[t_idx] = t;
        for (i, &idx) in state_idxs.iter().enumerate() {
            ws[idx] = y[i];
        }
        let mut stack = stack_cell.borrow_mut();
        for (expr, &idx) in expressions.iter().zip(&expr_idxs) {
            let v = expr.expr.eval(&ws[..], &mut stack);
            ws[idx] = v;
        }
        for (i, eq) in equations.iter().enumerate() {
            out[i] = eq.expr.eval(&ws[..], &mut stack);
        }
    })
}

/// Evaluates every declared `#output` name (state or expression) at
/// each sample of a stage's full-state solution, using that stage's
/// parameter/constant snapshot. Expressions are not part of the
/// integrated state, so their output columns are recomputed here
/// rather than carried through the solver.
fn project_outputs(model: &ParsedModel, seed: &[f64], t_idx: usize, state_idxs: &[usize], arg: &[f64], state_columns: &[Vec<f64>], output_names: &[String]) -> Vec<Vec<f64>> {
    let mut out: Vec<Vec<f64>> = vec![Vec::with_capacity(arg.len()); output_names.len()];
    let mut ws = seed.to_vec();
    let mut stack = Vec::new();
    for (k, &t) in arg.iter().enumerate() {
        ws[t_idx] = t;
        for (i, &idx) in state_idxs.iter().enumerate() {
            ws[idx] = state_columns[i][k];
        }
        for e in &model.expressions {
            let idx = model.binding.get(&e.name).expect("expression names are always bound");
            ws[idx] = e.expr.eval(&ws[..], &mut stack);
        }
        for (col, name) in out.iter_mut().zip(output_names) {
            if let Some(state_pos) = model.equations.iter().position(|e| &e.state == name) {
                col.push(state_columns[state_pos][k]);
            } else if let Some(idx) = model.binding.get(name) {
                col.push(ws[idx]);
            } else {
                col.push(f64::NAN);
            }
        }
    }
    out
}

/// Applies one `#update` block's assignments to the workspace (which
/// holds the current state and parameter/constant values), honouring
/// `=, +=, -=, *=, /=` against any bound name except the structural
/// `duration`/`step` keys, which [`build_pipeline`] already consumed.
fn apply_update(model: &ParsedModel, ws: &mut [f64], y: &mut Vector, state_idxs: &[usize], update_idx: usize) -> Result<()> {
    let update = &model.updates[update_idx];
    for a in &update.assignments {
        if a.target == "duration" || a.target == "step" {
            continue;
        }
        let idx = model
            .binding
            .get(&a.target)
            .ok_or_else(|| IvpError::Name { name: a.target.clone() })?;
        let rhs = a.expr.eval_once(ws);
        let current = ws[idx];
        ws[idx] = a.op.apply(current, rhs);
        if let Some(pos) = state_idxs.iter().position(|&s| s == idx) {
            y[pos] = ws[idx];
        }
    }
    Ok(())
}

/// `apply_pipeline(pipeline, input_vector) -> solution` (spec.md 6).
/// `input` overrides parameter/constant defaults by name; `method`
/// selects the tableau used for every stage.
pub fn apply_pipeline(pipeline: &Pipeline, input: &HashMap<String, f64>, method: Method, cancel: &dyn Cancellation) -> Result<Solution> {
    let model = &pipeline.model;
    let n = model.n_states();
    let tolerance = model
        .tolerance
        .ok_or_else(|| IvpError::config("model has no #tolerance section"))?;

    let mut ws = base_workspace(model);
    for (key, value) in input {
        let idx = model.binding.get(key).ok_or_else(|| IvpError::Name { name: key.clone() })?;
        ws[idx] = *value;
    }

    let t_idx = model.binding.get(&model.argument.name).expect("argument name is always bound");
    let state_idxs: Vec<usize> = model
        .equations
        .iter()
        .map(|e| model.binding.get(&e.state).expect("state names are always bound"))
        .collect();
    let state_names: Vec<String> = model.equations.iter().map(|e| e.state.clone()).collect();

    let mut y = Vector::zeros(n);
    for (i, eq) in model.equations.iter().enumerate() {
        if let Some(init) = model.inits.iter().find(|it| it.name == eq.state) {
            y[i] = init.expr.eval_once(&ws);
        }
        ws[state_idxs[i]] = y[i];
    }

    let output_names = model.output_names();
    let mut arg_all: Vec<f64> = Vec::new();
    let mut columns_all: Vec<Vec<f64>> = vec![Vec::new(); output_names.len()];
    let mut stats = Stats::default();

    for stage in &pipeline.stages {
        tracing::debug!(stage = stage.label.as_str(), t_start = stage.t_start, t_end = stage.t_end, "pipeline stage transition");
        if let Some(u_idx) = stage.update_index {
            apply_update(model, &mut ws, &mut y, &state_idxs, u_idx)?;
        }

        let stage_seed = ws.clone();
        let problem = Problem {
            name: format!("{}::{}", model.name, stage.label),
            arg: ArgSpec {
                name: model.argument.name.clone(),
                start: stage.t_start,
                finish: stage.t_end,
                step: stage.h_out,
            },
            initial: y.clone(),
            func: make_rhs(model, stage_seed.clone()),
            tolerance,
            solution_col_names: state_names.clone(),
        };

        let solution = driver::integrate(&problem, &method.tableau(), &StepControlConfig::default(), cancel, &stage.label)?;

        let projected = project_outputs(model, &stage_seed, t_idx, &state_idxs, &solution.arg, &solution.columns, &output_names);

        // Every stage's first sample sits at its own t_start, which equals
        // the previous stage's t_end whenever stages are chained. That
        // sample is kept even when it duplicates the previous stage's last
        // one: when `stage.update_index` fires between them it's the
        // post-update row, distinct from the pre-update row already in
        // `arg_all`, and both must survive for the jump to be observable.
        arg_all.extend_from_slice(&solution.arg);
        for (col, values) in columns_all.iter_mut().zip(&projected) {
            col.extend_from_slice(values);
        }
        stats.accepted_steps += solution.stats.accepted_steps;
        stats.rejected_steps += solution.stats.rejected_steps;
        stats.jacobian_refreshes += solution.stats.jacobian_refreshes;
        stats.rhs_evals += solution.stats.rhs_evals;

        for (i, col) in solution.columns.iter().enumerate() {
            y[i] = *col.last().unwrap();
            ws[state_idxs[i]] = y[i];
        }
    }

    Ok(Solution {
        arg: arg_all,
        columns: columns_all,
        names: output_names,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parser::parse;
    use crate::problem::NeverCancel;

    const TWO_STAGE: &str = "\
#name:
production
#argument: t, infusion
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
#update: bolus
S += 70
";

    #[test]
    fn builds_two_stages_with_continuity() {
        let model = parse(TWO_STAGE).unwrap();
        let pipeline = build_pipeline(&model).unwrap();
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].t_end, 60.0);
        assert_eq!(pipeline.stages[1].t_start, 60.0);
        assert_eq!(pipeline.stages[1].t_end, 120.0);

        let solution = apply_pipeline(&pipeline, &HashMap::new(), Method::Ros3PRw, &NeverCancel).unwrap();
        let boundary = pipeline.stages[0].t_end;
        let k = solution.arg.iter().position(|&t| (t - boundary).abs() < 1e-9).unwrap();
        let jump = solution.columns[0][k + 1] - solution.columns[0][k];
        assert!((jump - 70.0).abs() < 1e-9);
    }

    #[test]
    fn unrolls_loop_count() {
        let src = "\
#loop: 3
#argument: t
start = 0
finish = 10
step = 1
#equations:
dx/dt = 1
#inits:
x = 0
#tolerance:
1e-6
";
        let model = parse(src).unwrap();
        let pipeline = build_pipeline(&model).unwrap();
        assert_eq!(pipeline.stages.len(), 3);
        assert_eq!(pipeline.stages[2].t_end, 30.0);
    }
}
