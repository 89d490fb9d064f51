//! Code emitter (component H): renders a [`ParsedModel`] back out as
//! model source text (spec.md 4.H, 6: `emit(parsed_model) ->
//! source_text`). Purely a serialisation -- it has no runtime effect of
//! its own, and re-parsing its output reproduces the same structure
//! (spec.md 8, invariant 5).

use crate::model::ParsedModel;
use std::fmt::Write as _;

fn push_annotated(out: &mut String, lhs: &str, op: &str, text: &str, meta: Option<&str>, desc: Option<&str>) {
    let _ = write!(out, "{lhs} {op} {text}");
    if let Some(m) = meta {
        let _ = write!(out, " {{{m}}}");
    }
    if let Some(d) = desc {
        let _ = write!(out, " [{d}]");
    }
    out.push('\n');
}

pub fn emit(model: &ParsedModel) -> String {
    let mut out = String::new();

    if !model.name.is_empty() {
        out.push_str("#name:\n");
        out.push_str(&model.name);
        out.push('\n');
    }

    if !model.tags.is_empty() {
        out.push_str("#tags:\n");
        out.push_str(&model.tags.join(", "));
        out.push('\n');
    }

    if !model.description.is_empty() {
        out.push_str("#description:\n");
        out.push_str(&model.description);
        out.push('\n');
    }

    out.push_str("#argument: ");
    out.push_str(&model.argument.name);
    if !model.argument.label.is_empty() {
        out.push_str(", ");
        out.push_str(&model.argument.label);
    }
    out.push('\n');
    let _ = writeln!(out, "start = {}", model.argument.start);
    let _ = writeln!(out, "finish = {}", model.argument.finish);
    let _ = writeln!(out, "step = {}", model.argument.step);

    if !model.parameters.is_empty() {
        out.push_str("#parameters:\n");
        for p in &model.parameters {
            push_annotated(&mut out, &p.name, "=", &p.text, p.meta.as_deref(), p.description.as_deref());
        }
    }

    if !model.constants.is_empty() {
        out.push_str("#constants:\n");
        for c in &model.constants {
            let _ = writeln!(out, "{} = {}", c.name, c.text);
        }
    }

    if !model.expressions.is_empty() {
        out.push_str("#expressions:\n");
        for e in &model.expressions {
            let _ = writeln!(out, "{} = {}", e.name, e.text);
        }
    }

    out.push_str("#equations:\n");
    for eq in &model.equations {
        let _ = writeln!(out, "d{}/d{} = {}", eq.state, model.argument.name, eq.text);
    }

    if !model.inits.is_empty() {
        out.push_str("#inits:\n");
        for i in &model.inits {
            let _ = writeln!(out, "{} = {}", i.name, i.text);
        }
    }

    if let Some(tol) = model.tolerance {
        out.push_str("#tolerance:\n");
        let _ = writeln!(out, "{tol}");
    }

    if !model.outputs.is_empty() {
        out.push_str("#output:\n");
        out.push_str(&model.outputs.join(", "));
        out.push('\n');
    }

    for update in &model.updates {
        let _ = writeln!(out, "#update: {}", update.label);
        for a in &update.assignments {
            let _ = writeln!(out, "{} {} {}", a.target, a.op.as_str(), a.text);
        }
    }

    if let Some(n) = model.loop_count {
        let _ = writeln!(out, "#loop: {n}");
    }

    if !model.meta.is_empty() {
        out.push_str("#meta:\n");
        for m in &model.meta {
            out.push_str(m);
            out.push('\n');
        }
    }

    out
}
