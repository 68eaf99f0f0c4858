//! AST printer
//!
//! Renders a parsed tree back to source. Printing a program and
//! re-parsing it yields an equal tree modulo spans, which is how the
//! parser round-trip tests pin the grammar down.

use crate::ast::{AssignTarget, BinaryOp, CompareOp, Expr, LogicalOp, Program, Stmt, UnaryOp, UsePath};

/// Render a whole program.
pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for stmt in &program.statements {
        print_stmt(stmt, 0, &mut out);
    }
    out
}

fn indent(level: usize, out: &mut String) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn print_body(body: &[Stmt], level: usize, out: &mut String) {
    out.push_str("{\n");
    for stmt in body {
        print_stmt(stmt, level + 1, out);
    }
    indent(level, out);
    out.push('}');
}

fn print_stmt(stmt: &Stmt, level: usize, out: &mut String) {
    indent(level, out);
    match stmt {
        Stmt::Let {
            name,
            is_const,
            declared_type,
            value,
            ..
        } => {
            out.push_str(if *is_const { "const " } else { "let " });
            out.push_str(name);
            if let Some(ty) = declared_type {
                out.push_str(": ");
                out.push_str(&ty.to_string());
            }
            out.push_str(" = ");
            print_expr(value, out);
        }
        Stmt::Assign { target, value, .. } => {
            match target {
                AssignTarget::Name(name) => out.push_str(name),
                AssignTarget::Index { target, index } => {
                    print_expr(target, out);
                    out.push('[');
                    print_expr(index, out);
                    out.push(']');
                }
                AssignTarget::Member { target, field } => {
                    print_expr(target, out);
                    out.push('.');
                    out.push_str(field);
                }
            }
            out.push_str(" = ");
            print_expr(value, out);
        }
        Stmt::Block { statements, .. } => {
            print_body(statements, level, out);
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            out.push_str("if ");
            print_expr(cond, out);
            out.push(' ');
            print_body(then_block, level, out);
            if let Some(else_block) = else_block {
                out.push_str(" else ");
                // An else-if chain is stored as a single nested If.
                if let [Stmt::If { .. }] = else_block.as_slice() {
                    let mut nested = String::new();
                    print_stmt(&else_block[0], 0, &mut nested);
                    out.push_str(nested.trim_end());
                } else {
                    print_body(else_block, level, out);
                }
            }
        }
        Stmt::While { cond, body, .. } => {
            out.push_str("while ");
            print_expr(cond, out);
            out.push(' ');
            print_body(body, level, out);
        }
        Stmt::For {
            var, iterable, body, ..
        } => {
            out.push_str("for ");
            out.push_str(var);
            out.push_str(" in ");
            print_expr(iterable, out);
            out.push(' ');
            print_body(body, level, out);
        }
        Stmt::Break { .. } => out.push_str("break"),
        Stmt::Continue { .. } => out.push_str("continue"),
        Stmt::Return { value, .. } => {
            out.push_str("return");
            if let Some(value) = value {
                out.push(' ');
                print_expr(value, out);
            }
        }
        Stmt::Function(decl) => {
            out.push_str("function ");
            out.push_str(&decl.name);
            if !decl.type_params.is_empty() {
                out.push('<');
                out.push_str(&decl.type_params.join(", "));
                out.push('>');
            }
            out.push('(');
            let params: Vec<String> = decl
                .params
                .iter()
                .map(|p| format!("{}: {}", p.name, p.ty))
                .collect();
            out.push_str(&params.join(", "));
            out.push(')');
            if decl.explicit_return {
                out.push_str(" -> ");
                out.push_str(&decl.return_type.to_string());
            }
            out.push(' ');
            print_body(&decl.body, level, out);
        }
        Stmt::Struct(decl) => {
            out.push_str("struct ");
            out.push_str(&decl.name);
            if !decl.type_params.is_empty() {
                out.push('<');
                out.push_str(&decl.type_params.join(", "));
                out.push('>');
            }
            out.push_str(" {\n");
            for field in &decl.fields {
                indent(level + 1, out);
                if field.weak {
                    out.push_str("weak ");
                }
                out.push_str(&field.name);
                out.push_str(": ");
                out.push_str(&field.ty.to_string());
                out.push('\n');
            }
            indent(level, out);
            out.push('}');
        }
        Stmt::Enum(decl) => {
            out.push_str("enum ");
            out.push_str(&decl.name);
            out.push_str(" {\n");
            for variant in &decl.variants {
                indent(level + 1, out);
                out.push_str(variant);
                out.push('\n');
            }
            indent(level, out);
            out.push('}');
        }
        Stmt::Use { path, alias, .. } => {
            out.push_str("use ");
            match path {
                UsePath::Module(segments) => out.push_str(&segments.join(".")),
                UsePath::Block { id, version_req } => {
                    out.push_str(id);
                    if let Some(req) = version_req {
                        out.push(' ');
                        out.push_str(req);
                    }
                }
            }
            if let Some(alias) = alias {
                out.push_str(" as ");
                out.push_str(alias);
            }
        }
        Stmt::Import { path, alias, .. } => {
            out.push_str("import ");
            out.push_str(&path.join("."));
            if let Some(alias) = alias {
                out.push_str(" as ");
                out.push_str(alias);
            }
        }
        Stmt::Export { inner, .. } => {
            out.push_str("export ");
            let mut rendered = String::new();
            print_stmt(inner, 0, &mut rendered);
            out.push_str(rendered.trim_start().trim_end());
        }
        Stmt::Main { body, .. } => {
            out.push_str("main ");
            print_body(body, level, out);
        }
        Stmt::Try {
            try_block,
            catch_name,
            catch_block,
            finally_block,
            ..
        } => {
            out.push_str("try ");
            print_body(try_block, level, out);
            out.push_str(" catch ");
            if let Some(name) = catch_name {
                out.push_str(name);
                out.push(' ');
            }
            print_body(catch_block, level, out);
            if let Some(finally_block) = finally_block {
                out.push_str(" finally ");
                print_body(finally_block, level, out);
            }
        }
        Stmt::Throw { value, .. } => {
            out.push_str("throw ");
            print_expr(value, out);
        }
        Stmt::Expr { expr, .. } => print_expr(expr, out),
    }
    out.push('\n');
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn print_expr(expr: &Expr, out: &mut String) {
    match expr {
        Expr::IntLit { value, .. } => out.push_str(&value.to_string()),
        Expr::FloatLit { value, .. } => {
            let rendered = value.to_string();
            out.push_str(&rendered);
            // Keep the literal a float on reparse.
            if !rendered.contains('.') && !rendered.contains('e') {
                out.push_str(".0");
            }
        }
        Expr::StrLit { value, .. } => out.push_str(&escape_string(value)),
        Expr::BoolLit { value, .. } => out.push_str(if *value { "true" } else { "false" }),
        Expr::NullLit { .. } => out.push_str("null"),
        Expr::ArrayLit { elements, .. } => {
            out.push('[');
            for (i, elem) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(elem, out);
            }
            out.push(']');
        }
        Expr::DictLit { entries, .. } => {
            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&escape_string(key));
                out.push_str(": ");
                print_expr(value, out);
            }
            out.push('}');
        }
        Expr::Ident { name, .. } => out.push_str(name),
        Expr::Unary { op, operand, .. } => {
            out.push(match op {
                UnaryOp::Neg => '-',
                UnaryOp::Not => '!',
            });
            print_grouped(operand, out);
        }
        Expr::Binary { op, left, right, .. } => {
            print_grouped(left, out);
            out.push_str(match op {
                BinaryOp::Add => " + ",
                BinaryOp::Sub => " - ",
                BinaryOp::Mul => " * ",
                BinaryOp::Div => " / ",
                BinaryOp::Mod => " % ",
            });
            print_grouped(right, out);
        }
        Expr::Compare { op, left, right, .. } => {
            print_grouped(left, out);
            out.push_str(match op {
                CompareOp::Eq => " == ",
                CompareOp::NotEq => " != ",
                CompareOp::Lt => " < ",
                CompareOp::LtEq => " <= ",
                CompareOp::Gt => " > ",
                CompareOp::GtEq => " >= ",
            });
            print_grouped(right, out);
        }
        Expr::Logical { op, left, right, .. } => {
            print_grouped(left, out);
            out.push_str(match op {
                LogicalOp::And => " && ",
                LogicalOp::Or => " || ",
            });
            print_grouped(right, out);
        }
        Expr::Call {
            callee,
            type_args,
            args,
            ..
        } => {
            print_grouped(callee, out);
            if !type_args.is_empty() {
                out.push('<');
                let rendered: Vec<String> = type_args.iter().map(|t| t.to_string()).collect();
                out.push_str(&rendered.join(", "));
                out.push('>');
            }
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(arg, out);
            }
            out.push(')');
        }
        Expr::Member { target, field, .. } => {
            print_grouped(target, out);
            out.push('.');
            out.push_str(field);
        }
        Expr::Index { target, index, .. } => {
            print_grouped(target, out);
            out.push('[');
            print_expr(index, out);
            out.push(']');
        }
        Expr::StructLit {
            name,
            type_args,
            fields,
            ..
        } => {
            out.push_str("new ");
            out.push_str(name);
            if !type_args.is_empty() {
                out.push('<');
                let rendered: Vec<String> = type_args.iter().map(|t| t.to_string()).collect();
                out.push_str(&rendered.join(", "));
                out.push('>');
            }
            out.push_str(" { ");
            for (i, (field, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(field);
                out.push_str(": ");
                print_expr(value, out);
            }
            out.push_str(" }");
        }
        Expr::IfExpr {
            cond,
            then_value,
            else_value,
            ..
        } => {
            print_grouped(cond, out);
            out.push_str(" ? ");
            print_grouped(then_value, out);
            out.push_str(" : ");
            print_grouped(else_value, out);
        }
        Expr::Lambda { decl, .. } => {
            out.push_str("fn(");
            let params: Vec<String> = decl
                .params
                .iter()
                .map(|p| format!("{}: {}", p.name, p.ty))
                .collect();
            out.push_str(&params.join(", "));
            out.push(')');
            if decl.explicit_return {
                out.push_str(" -> ");
                out.push_str(&decl.return_type.to_string());
            }
            out.push(' ');
            let mut body = String::new();
            print_body(&decl.body, 0, &mut body);
            out.push_str(&body);
        }
        Expr::Pipeline { value, stage, .. } => {
            print_grouped(value, out);
            out.push_str(" |> ");
            print_grouped(stage, out);
        }
        Expr::Polyglot { literal, .. } => {
            out.push_str("<<");
            out.push_str(&literal.language);
            if !literal.bindings.is_empty() {
                out.push('[');
                out.push_str(&literal.bindings.join(", "));
                out.push(']');
            }
            out.push('\n');
            out.push_str(&literal.body);
            if !literal.body.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(">>");
        }
        Expr::BlockUse { id, .. } => out.push_str(id),
    }
}

/// Parenthesize compound subexpressions so precedence survives the
/// round trip without tracking binding powers here.
fn print_grouped(expr: &Expr, out: &mut String) {
    let atomic = matches!(
        expr,
        Expr::IntLit { .. }
            | Expr::FloatLit { .. }
            | Expr::StrLit { .. }
            | Expr::BoolLit { .. }
            | Expr::NullLit { .. }
            | Expr::Ident { .. }
            | Expr::ArrayLit { .. }
            | Expr::DictLit { .. }
            | Expr::Call { .. }
            | Expr::Member { .. }
            | Expr::Index { .. }
            | Expr::BlockUse { .. }
            | Expr::StructLit { .. }
    );
    if atomic {
        print_expr(expr, out);
    } else {
        out.push('(');
        print_expr(expr, out);
        out.push(')');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    /// Strip spans so reparsed trees compare equal.
    fn normalize(program: &Program) -> String {
        // Spans differ between the original and the printed source, so
        // compare the printed forms instead: print → parse → print must
        // be a fixed point.
        print_program(program)
    }

    fn round_trips(source: &str) {
        let first = parse(lex(source).unwrap()).unwrap();
        let printed = print_program(&first);
        let second = parse(lex(&printed).unwrap())
            .unwrap_or_else(|e| panic!("printed source failed to reparse: {}\n{}", e, printed));
        assert_eq!(
            normalize(&first),
            normalize(&second),
            "print → parse → print is not a fixed point for:\n{}",
            source
        );
    }

    #[test]
    fn test_round_trip_basics() {
        round_trips("main {\n  let a = 10\n  let b = a + 2 * 3\n  print(b)\n}\n");
    }

    #[test]
    fn test_round_trip_functions_and_structs() {
        round_trips(
            "struct Pair<T, U> {\n  first: T\n  second: U\n}\nfunction first<T>(xs: list<T>) -> T {\n  return xs[0]\n}\nmain {\n  let p = new Pair<int, string> { first: 1, second: \"a\" }\n}\n",
        );
    }

    #[test]
    fn test_round_trip_control_flow() {
        round_trips(
            "main {\n  let i = 0\n  while i < 10 {\n    if i % 2 == 0 {\n      print(i)\n    } else {\n      continue\n    }\n    i = i + 1\n  }\n}\n",
        );
    }

    #[test]
    fn test_round_trip_polyglot() {
        round_trips("main {\n  let s = <<python[a, b]\na + b\n>>\n  print(s)\n}\n");
    }

    #[test]
    fn test_round_trip_try_and_use() {
        round_trips(
            "use string as str\nmain {\n  try {\n    throw \"x\"\n  } catch e {\n    print(e)\n  } finally {\n    print(\"f\")\n  }\n}\n",
        );
    }
}
