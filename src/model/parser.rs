//! Model parser (component E): a line-oriented scanner over `#section`
//! blocks (spec.md 4.E), feeding the expression compiler (component F)
//! once every name in the model is known.

use crate::error::{IvpError, Result};
use crate::model::expr::{self, ExprError};
use crate::model::{
    ArgumentDecl, AssignOp, Assignment, Binding, Constant, Equation, Expression, Init, Parameter,
    ParsedModel, UpdateBlock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Name,
    Tags,
    Description,
    Equations,
    Expressions,
    Argument,
    Inits,
    Parameters,
    Constants,
    Update,
    Output,
    Tolerance,
    Comment,
    Meta,
}

fn section_of(name: &str) -> Option<Section> {
    Some(match name {
        "name" => Section::Name,
        "tags" => Section::Tags,
        "description" => Section::Description,
        "equations" => Section::Equations,
        "expressions" => Section::Expressions,
        "argument" => Section::Argument,
        "inits" => Section::Inits,
        "parameters" => Section::Parameters,
        "constants" => Section::Constants,
        "update" => Section::Update,
        "output" => Section::Output,
        "tolerance" => Section::Tolerance,
        "comment" => Section::Comment,
        "meta" => Section::Meta,
        _ => return None,
    })
}

fn section_name(s: Section) -> &'static str {
    match s {
        Section::Name => "name",
        Section::Tags => "tags",
        Section::Description => "description",
        Section::Equations => "equations",
        Section::Expressions => "expressions",
        Section::Argument => "argument",
        Section::Inits => "inits",
        Section::Parameters => "parameters",
        Section::Constants => "constants",
        Section::Update => "update",
        Section::Output => "output",
        Section::Tolerance => "tolerance",
        Section::Comment => "comment",
        Section::Meta => "meta",
    }
}

/// Strips an inline `// ...` comment, respecting nothing fancier than
/// "first occurrence wins" -- model expressions never contain `//`.
fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Peels a trailing `{...}` (UI metadata) and/or `[...]` (description)
/// off the end of a line, in either order, returning the remainder.
fn strip_trailing_annotations(mut s: &str) -> (&str, Option<String>, Option<String>) {
    let mut meta = None;
    let mut desc = None;
    loop {
        let t = s.trim_end();
        if let Some(stripped) = t.strip_suffix(']') {
            if let Some(open) = stripped.rfind('[') {
                desc.get_or_insert_with(|| stripped[open + 1..].to_string());
                s = &stripped[..open];
                continue;
            }
        }
        if let Some(stripped) = t.strip_suffix('}') {
            if let Some(open) = stripped.rfind('{') {
                meta.get_or_insert_with(|| stripped[open + 1..].to_string());
                s = &stripped[..open];
                continue;
            }
        }
        s = t;
        break;
    }
    (s, meta, desc)
}

fn split_once_colon(s: &str) -> (&str, &str) {
    match s.find(':') {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, ""),
    }
}

/// Splits `<name> <op> <expr>` where `op` is one of `= += -= *= /=`,
/// after peeling trailing `{meta}`/`[description]` annotations.
fn split_assignment(line: &str, line_no: usize, section: &str) -> Result<(String, AssignOp, String, Option<String>, Option<String>)> {
    let (body, meta, desc) = strip_trailing_annotations(line);
    let bytes = body.as_bytes();
    let eq_pos = body
        .find('=')
        .ok_or_else(|| IvpError::parse(line_no, section, format!("missing `=` in `{line}`")))?;
    let (op, lhs_end) = if eq_pos > 0 && matches!(bytes[eq_pos - 1], b'+' | b'-' | b'*' | b'/') {
        let op = match bytes[eq_pos - 1] {
            b'+' => AssignOp::Add,
            b'-' => AssignOp::Sub,
            b'*' => AssignOp::Mul,
            b'/' => AssignOp::Div,
            _ => unreachable!(),
        };
        (op, eq_pos - 1)
    } else {
        (AssignOp::Set, eq_pos)
    };
    let lhs = body[..lhs_end].trim().to_string();
    let rhs = body[eq_pos + 1..].trim().to_string();
    if lhs.is_empty() {
        return Err(IvpError::parse(line_no, section, format!("missing left-hand side in `{line}`")));
    }
    if rhs.is_empty() {
        return Err(IvpError::parse(line_no, section, format!("missing right-hand side in `{line}`")));
    }
    Ok((lhs, op, rhs, meta, desc))
}

fn parse_equation_lhs(lhs: &str, line_no: usize) -> Result<(String, String)> {
    let rest = lhs
        .strip_prefix('d')
        .ok_or_else(|| IvpError::parse(line_no, "equations", format!("equation left-hand side must be `d<state>/d<arg>`, got `{lhs}`")))?;
    let slash = rest
        .find("/d")
        .ok_or_else(|| IvpError::parse(line_no, "equations", format!("equation left-hand side must be `d<state>/d<arg>`, got `{lhs}`")))?;
    let state = rest[..slash].trim().to_string();
    let arg = rest[slash + 2..].trim().to_string();
    if state.is_empty() || arg.is_empty() {
        return Err(IvpError::parse(line_no, "equations", format!("malformed equation left-hand side `{lhs}`")));
    }
    Ok((state, arg))
}

fn to_ivp_err(e: ExprError, line: usize, section: &str) -> IvpError {
    match e {
        ExprError::Syntax(message) => IvpError::Parse {
            line,
            section: section.to_string(),
            message,
        },
        ExprError::UnknownIdent(name) => IvpError::Name { name },
    }
}

struct RawEq {
    line: usize,
    state: String,
    text: String,
}

struct RawNamed {
    line: usize,
    name: String,
    text: String,
    meta: Option<String>,
    desc: Option<String>,
}

struct RawUpdate {
    label: String,
    assignments: Vec<(usize, String, AssignOp, String)>,
}

/// Parses `source` into a [`ParsedModel`] (spec.md 6: `parse(model_text)
/// -> parsed_model | ParseError`).
pub fn parse(source: &str) -> Result<ParsedModel> {
    let mut current: Option<Section> = None;
    let mut current_label = String::new();

    let mut name_line: Option<String> = None;
    let mut tags: Vec<String> = Vec::new();
    let mut description_lines: Vec<String> = Vec::new();
    let mut meta_lines: Vec<String> = Vec::new();
    let mut loop_count: Option<u32> = None;

    let mut argument_name: Option<String> = None;
    let mut argument_label = String::new();
    let mut argument_fields: Vec<(usize, String, String)> = Vec::new();

    let mut raw_equations: Vec<RawEq> = Vec::new();
    let mut raw_expressions: Vec<RawNamed> = Vec::new();
    let mut raw_parameters: Vec<RawNamed> = Vec::new();
    let mut raw_constants: Vec<RawNamed> = Vec::new();
    let mut raw_inits: Vec<RawNamed> = Vec::new();
    let mut raw_updates: Vec<RawUpdate> = Vec::new();
    let mut raw_outputs: Vec<String> = Vec::new();
    let mut raw_tolerance: Option<(usize, String)> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let stripped = strip_comment(raw_line);
        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('#') {
            let (head, tail) = split_once_colon(rest);
            let head = head.trim();
            if head.eq_ignore_ascii_case("loop") {
                let count_text = tail.trim();
                let n: u32 = count_text
                    .parse()
                    .map_err(|_| IvpError::parse(line_no, "meta", format!("malformed `#loop` count `{count_text}`")))?;
                loop_count = Some(n);
                current = None;
                continue;
            }
            let section = section_of(head).ok_or_else(|| IvpError::parse(line_no, "header", format!("unknown section `#{head}`")))?;
            if section == Section::Argument {
                let mut parts = tail.splitn(2, ',');
                let name = parts.next().unwrap_or("").trim();
                let label = parts.next().unwrap_or("").trim();
                if !name.is_empty() {
                    argument_name = Some(name.to_string());
                }
                argument_label = label.to_string();
                current_label = argument_label.clone();
            } else {
                current_label = tail.trim().to_string();
                if section == Section::Update {
                    raw_updates.push(RawUpdate {
                        label: current_label.clone(),
                        assignments: Vec::new(),
                    });
                }
            }
            tracing::trace!(line = line_no, section = section_name(section), label = %current_label, "entering section");
            current = Some(section);
            continue;
        }

        let section = current.ok_or_else(|| IvpError::parse(line_no, "body", "content before any `#section` header"))?;
        let section_str = section_name(section);

        match section {
            Section::Name => {
                name_line.get_or_insert_with(|| trimmed.to_string());
            }
            Section::Tags => {
                for t in trimmed.split(',') {
                    let t = t.trim();
                    if !t.is_empty() {
                        tags.push(t.to_string());
                    }
                }
            }
            Section::Description => description_lines.push(trimmed.to_string()),
            Section::Meta => meta_lines.push(trimmed.to_string()),
            Section::Comment => {}
            Section::Equations => {
                let (lhs, op, rhs, _, _) = split_assignment(trimmed, line_no, section_str)?;
                if op != AssignOp::Set {
                    return Err(IvpError::parse(line_no, section_str, "equations only support `=`"));
                }
                let (state, arg) = parse_equation_lhs(&lhs, line_no)?;
                if let Some(declared) = &argument_name {
                    if declared != &arg {
                        return Err(IvpError::parse(
                            line_no,
                            section_str,
                            format!("equation references undeclared argument `{arg}`, expected `{declared}`"),
                        ));
                    }
                }
                if raw_equations.iter().any(|e| e.state == state) {
                    return Err(IvpError::parse(line_no, section_str, format!("duplicate state `{state}`")));
                }
                raw_equations.push(RawEq { line: line_no, state, text: rhs });
            }
            Section::Expressions => {
                let (lhs, op, rhs, _, _) = split_assignment(trimmed, line_no, section_str)?;
                if op != AssignOp::Set {
                    return Err(IvpError::parse(line_no, section_str, "expressions only support `=`"));
                }
                raw_expressions.push(RawNamed { line: line_no, name: lhs, text: rhs, meta: None, desc: None });
            }
            Section::Argument => {
                let (lhs, op, rhs, _, _) = split_assignment(trimmed, line_no, section_str)?;
                if op != AssignOp::Set {
                    return Err(IvpError::parse(line_no, section_str, "argument fields only support `=`"));
                }
                argument_fields.push((line_no, lhs, rhs));
            }
            Section::Inits => {
                let (lhs, op, rhs, _, _) = split_assignment(trimmed, line_no, section_str)?;
                if op != AssignOp::Set {
                    return Err(IvpError::parse(line_no, section_str, "inits only support `=`"));
                }
                raw_inits.push(RawNamed { line: line_no, name: lhs, text: rhs, meta: None, desc: None });
            }
            Section::Parameters => {
                let (lhs, op, rhs, meta, desc) = split_assignment(trimmed, line_no, section_str)?;
                if op != AssignOp::Set {
                    return Err(IvpError::parse(line_no, section_str, "parameters only support `=`"));
                }
                raw_parameters.push(RawNamed { line: line_no, name: lhs, text: rhs, meta, desc });
            }
            Section::Constants => {
                let (lhs, op, rhs, _, _) = split_assignment(trimmed, line_no, section_str)?;
                if op != AssignOp::Set {
                    return Err(IvpError::parse(line_no, section_str, "constants only support `=`"));
                }
                raw_constants.push(RawNamed { line: line_no, name: lhs, text: rhs, meta: None, desc: None });
            }
            Section::Update => {
                let (lhs, op, rhs, _, _) = split_assignment(trimmed, line_no, section_str)?;
                raw_updates
                    .last_mut()
                    .expect("`#update` header always pushes a block before its body lines")
                    .assignments
                    .push((line_no, lhs, op, rhs));
            }
            Section::Output => {
                for name in trimmed.split(',') {
                    let name = name.trim();
                    if !name.is_empty() {
                        raw_outputs.push(name.to_string());
                    }
                }
            }
            Section::Tolerance => {
                let text = if let Some(eq) = trimmed.find('=') {
                    trimmed[eq + 1..].trim().to_string()
                } else {
                    trimmed.to_string()
                };
                raw_tolerance = Some((line_no, text));
            }
        }
    }

    let argument_name = argument_name.unwrap_or_else(|| "t".to_string());

    // Bind every known identifier once, states and expressions adjacent
    // (spec.md 3), before compiling any expression text.
    let mut binding = Binding::new();
    binding.bind(&argument_name);
    for eq in &raw_equations {
        binding.bind(&eq.state);
    }
    for e in &raw_expressions {
        binding.bind(&e.name);
    }
    for p in &raw_parameters {
        binding.bind(&p.name);
    }
    for c in &raw_constants {
        binding.bind(&c.name);
    }
    binding.bind("_t0");
    binding.bind("_t1");
    binding.bind("_h");
    binding.bind("_count");
    binding.bind("overall");

    for init in &raw_inits {
        if binding.get(&init.name).is_none() || !raw_equations.iter().any(|e| e.state == init.name) {
            return Err(IvpError::parse(init.line, "inits", format!("init for non-state name `{}`", init.name)));
        }
    }

    let mut equations = Vec::with_capacity(raw_equations.len());
    for eq in &raw_equations {
        let expr = expr::compile(&eq.text, &binding).map_err(|e| to_ivp_err(e, eq.line, "equations"))?;
        equations.push(Equation { state: eq.state.clone(), text: eq.text.clone(), expr });
    }

    let mut expressions = Vec::with_capacity(raw_expressions.len());
    for e in &raw_expressions {
        let expr = expr::compile(&e.text, &binding).map_err(|err| to_ivp_err(err, e.line, "expressions"))?;
        expressions.push(Expression { name: e.name.clone(), text: e.text.clone(), expr });
    }

    // Static fold workspace for parameters/constants/argument-fields/inits:
    // these are resolved once at parse time, in declaration order, each
    // writing its value into its own bound index so later items (and the
    // runtime) can read it by index like any other name.
    let mut fold_ws = vec![0.0f64; binding.len()];

    let mut parameters = Vec::with_capacity(raw_parameters.len());
    for p in &raw_parameters {
        let expr = expr::compile(&p.text, &binding).map_err(|e| to_ivp_err(e, p.line, "parameters"))?;
        let default = expr.eval_once(&fold_ws);
        if let Some(idx) = binding.get(&p.name) {
            fold_ws[idx] = default;
        }
        parameters.push(Parameter {
            name: p.name.clone(),
            text: p.text.clone(),
            expr,
            default,
            meta: p.meta.clone(),
            description: p.desc.clone(),
        });
    }

    let mut constants = Vec::with_capacity(raw_constants.len());
    for c in &raw_constants {
        let expr = expr::compile(&c.text, &binding).map_err(|e| to_ivp_err(e, c.line, "constants"))?;
        let value = expr.eval_once(&fold_ws);
        if let Some(idx) = binding.get(&c.name) {
            fold_ws[idx] = value;
        }
        constants.push(Constant { name: c.name.clone(), text: c.text.clone(), expr, value });
    }

    let mut argument = ArgumentDecl {
        name: argument_name.clone(),
        label: argument_label,
        start: 0.0,
        finish: 0.0,
        step: 0.0,
    };
    for (line, key, text) in &argument_fields {
        let expr = expr::compile(text, &binding).map_err(|e| to_ivp_err(e, *line, "argument"))?;
        let value = expr.eval_once(&fold_ws);
        match key.as_str() {
            "start" => argument.start = value,
            "finish" => argument.finish = value,
            "step" => {
                if value <= 0.0 {
                    return Err(IvpError::parse(*line, "argument", format!("step must be > 0, got {value}")));
                }
                argument.step = value;
            }
            other => return Err(IvpError::parse(*line, "argument", format!("unknown argument field `{other}`"))),
        }
    }

    let mut inits = Vec::with_capacity(raw_inits.len());
    for i in &raw_inits {
        let expr = expr::compile(&i.text, &binding).map_err(|e| to_ivp_err(e, i.line, "inits"))?;
        let _ = expr.eval_once(&fold_ws);
        inits.push(Init { name: i.name.clone(), text: i.text.clone(), expr });
    }

    let mut updates = Vec::with_capacity(raw_updates.len());
    for u in &raw_updates {
        let mut assignments = Vec::with_capacity(u.assignments.len());
        for (line, target, op, text) in &u.assignments {
            let expr = expr::compile(text, &binding).map_err(|e| to_ivp_err(e, *line, "update"))?;
            if target == "step" {
                let probe = expr.eval_once(&fold_ws);
                if *op == AssignOp::Set && probe <= 0.0 {
                    return Err(IvpError::parse(*line, "update", format!("step must be > 0, got {probe}")));
                }
            }
            assignments.push(Assignment {
                target: target.clone(),
                op: *op,
                text: text.clone(),
                expr,
            });
        }
        updates.push(UpdateBlock { label: u.label.clone(), assignments });
    }

    for name in &raw_outputs {
        let known = equations.iter().any(|e| e.state == *name) || expressions.iter().any(|e| e.name == *name);
        if !known {
            return Err(IvpError::parse(0, "output", format!("output references unknown name `{name}`")));
        }
    }

    let tolerance = match raw_tolerance {
        Some((line, text)) => {
            let expr = expr::compile(&text, &binding).map_err(|e| to_ivp_err(e, line, "tolerance"))?;
            Some(expr.eval_once(&fold_ws))
        }
        None => None,
    };

    Ok(ParsedModel {
        name: name_line.unwrap_or_default(),
        tags,
        description: description_lines.join("\n"),
        argument,
        equations,
        expressions,
        parameters,
        constants,
        inits,
        updates,
        outputs: raw_outputs,
        tolerance,
        loop_count,
        meta: meta_lines,
        binding,
    })
}
