//! Textual C++ re-emitter (out-of-scope collaborator per spec.md §9; a thin
//! AST visitor, not a focus of fidelity). Used by the `pasvm` CLI to turn a
//! parsed program back into readable C++ for inspection/porting — it does
//! not go through the bytecode layer at all.

use std::fmt::Write as _;

use crate::ast::*;

pub fn emit_program(program: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// generated from Pascal source {:?}", program.name);
    out.push_str("#include <cstdio>\n#include <string>\n#include <cmath>\n\n");
    for decl in &program.decls {
        emit_decl(&mut out, decl, 0);
    }
    out.push_str("\nint main() {\n");
    for stmt in &program.body {
        emit_stmt(&mut out, stmt, 1);
    }
    out.push_str("    return 0;\n}\n");
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn emit_decl(out: &mut String, decl: &Decl, depth: usize) {
    match decl {
        Decl::Const { name, value } => {
            indent(out, depth);
            let _ = writeln!(out, "const auto {name} = {};", emit_expr(value));
        }
        Decl::TypeDef { name, ty } => {
            indent(out, depth);
            let _ = writeln!(out, "// type {name} = {};", emit_type(ty));
        }
        Decl::Var(v) | Decl::ExternalVar(v) => {
            indent(out, depth);
            let extern_kw = if matches!(decl, Decl::ExternalVar(_)) { "extern " } else { "" };
            let _ = writeln!(out, "{extern_kw}{} {};", emit_type(&v.ty), v.names.join(", "));
        }
        Decl::Proc(p) => emit_proc(out, p, depth),
    }
}

fn emit_proc(out: &mut String, p: &ProcDef, depth: usize) {
    let ret = p.return_type.as_ref().map(emit_type).unwrap_or_else(|| "void".to_string());
    let qualified = match &p.class_name {
        Some(c) => format!("{c}::{}", p.name),
        None => p.name.clone(),
    };
    let args = p
        .args
        .iter()
        .map(|a| {
            let ty = emit_type(&a.ty);
            if a.by_ref { format!("{ty}& {}", a.name) } else { format!("{ty} {}", a.name) }
        })
        .collect::<Vec<_>>()
        .join(", ");
    indent(out, depth);
    match &p.body {
        Some(body) => {
            let _ = writeln!(out, "{ret} {qualified}({args}) {{");
            for stmt in body {
                emit_stmt(out, stmt, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        None => {
            let suffix = if p.is_external { " /* external */" } else { " /* forward */" };
            let _ = writeln!(out, "{ret} {qualified}({args});{suffix}");
        }
    }
}

fn emit_type(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Simple(name) => simple_cpp_name(name),
        TypeExpr::Array { low, high, element } => {
            format!("/* array[{}..{}] of */ std::vector<{}>", emit_expr(low), emit_expr(high), emit_type(element))
        }
        TypeExpr::Pointer(inner) => format!("{}*", emit_type(inner)),
        TypeExpr::Class { parent, fields, methods } => {
            let base = parent.as_deref().map(|p| format!(" : public {p}")).unwrap_or_default();
            let mut body = format!("struct /* anonymous */{base} {{\n");
            for (names, ty) in fields {
                let _ = writeln!(body, "    {} {};", emit_type(ty), names.join(", "));
            }
            for m in methods {
                let ret = m.return_type.as_ref().map(emit_type).unwrap_or_else(|| "void".to_string());
                let args = m.args.iter().map(|a| emit_type(&a.ty)).collect::<Vec<_>>().join(", ");
                let _ = writeln!(body, "    {ret} {}({args});", m.name);
            }
            body.push('}');
            body
        }
    }
}

fn simple_cpp_name(name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "integer" | "int" => "int32_t".to_string(),
        "boolean" | "bool" => "bool".to_string(),
        "single" | "float" | "float32" => "float".to_string(),
        "double" | "real" | "float64" => "double".to_string(),
        "string" => "std::string".to_string(),
        "byte" | "uint8" => "uint8_t".to_string(),
        "word" | "uint16" => "uint16_t".to_string(),
        "cardinal" | "uint32" => "uint32_t".to_string(),
        "int64" | "longint" => "int64_t".to_string(),
        "uint64" | "qword" => "uint64_t".to_string(),
        other => other.to_string(),
    }
}

fn emit_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match stmt {
        Stmt::Compound(block) => {
            indent(out, depth);
            out.push_str("{\n");
            for s in block {
                emit_stmt(out, s, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::Assignment { target, value, .. } => {
            indent(out, depth);
            let _ = writeln!(out, "{} = {};", emit_expr(target), emit_expr(value));
        }
        Stmt::ProcCall(expr) => {
            indent(out, depth);
            let _ = writeln!(out, "{};", emit_expr(expr));
        }
        Stmt::If { cond, then_branch, else_branch, .. } => {
            indent(out, depth);
            let _ = writeln!(out, "if ({}) {{", emit_expr(cond));
            emit_stmt(out, then_branch, depth + 1);
            indent(out, depth);
            match else_branch {
                Some(e) => {
                    out.push_str("} else {\n");
                    emit_stmt(out, e, depth + 1);
                    indent(out, depth);
                    out.push_str("}\n");
                }
                None => out.push_str("}\n"),
            }
        }
        Stmt::For { var, from, to, downto, body, .. } => {
            indent(out, depth);
            let cmp = if *downto { ">=" } else { "<=" };
            let step = if *downto { "--" } else { "++" };
            let _ = writeln!(out, "for ({var} = {}; {var} {cmp} {}; {var}{step}) {{", emit_expr(from), emit_expr(to));
            emit_stmt(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::While { cond, body, .. } => {
            indent(out, depth);
            let _ = writeln!(out, "while ({}) {{", emit_expr(cond));
            emit_stmt(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::Repeat { body, cond, .. } => {
            indent(out, depth);
            out.push_str("do {\n");
            for s in body {
                emit_stmt(out, s, depth + 1);
            }
            indent(out, depth);
            let _ = writeln!(out, "}} while (!({}));", emit_expr(cond));
        }
        Stmt::Case { value, branches, else_branch, .. } => {
            indent(out, depth);
            let _ = writeln!(out, "switch ({}) {{", emit_expr(value));
            for (labels, body) in branches {
                indent(out, depth + 1);
                for l in labels {
                    let _ = write!(out, "case {}: ", emit_expr(l));
                }
                out.push('\n');
                emit_stmt(out, body, depth + 2);
                indent(out, depth + 2);
                out.push_str("break;\n");
            }
            if let Some(e) = else_branch {
                indent(out, depth + 1);
                out.push_str("default:\n");
                emit_stmt(out, e, depth + 2);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::With { target, body, .. } => {
            indent(out, depth);
            let _ = writeln!(out, "/* with {} do */ {{", emit_expr(target));
            emit_stmt(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Stmt::Write { items, newline, .. } => {
            indent(out, depth);
            out.push_str("std::printf(");
            let fmt = items.iter().map(|_| "%s").collect::<Vec<_>>().join("");
            let _ = write!(out, "\"{fmt}{}\"", if *newline { "\\n" } else { "" });
            for item in items {
                let _ = write!(out, ", {}", emit_expr(&item.expr));
            }
            out.push_str(");\n");
        }
        Stmt::Break(_) => {
            indent(out, depth);
            out.push_str("break;\n");
        }
        Stmt::Continue(_) => {
            indent(out, depth);
            out.push_str("continue;\n");
        }
        Stmt::Goto(label, _) => {
            indent(out, depth);
            let _ = writeln!(out, "goto {label};");
        }
        Stmt::Label(label, inner) => {
            indent(out, depth);
            let _ = writeln!(out, "{label}:");
            emit_stmt(out, inner, depth);
        }
        Stmt::Try { body, except_body, finally_body, .. } => {
            indent(out, depth);
            out.push_str("try {\n");
            for s in body {
                emit_stmt(out, s, depth + 1);
            }
            indent(out, depth);
            out.push_str("} catch (...) {\n");
            if let Some(except) = except_body {
                for s in except {
                    indent(out, depth + 1);
                    out.push_str("// ");
                    emit_stmt(out, s, 0);
                }
            }
            indent(out, depth);
            out.push_str("}\n");
            if let Some(finally) = finally_body {
                indent(out, depth);
                out.push_str("/* finally */ {\n");
                for s in finally {
                    emit_stmt(out, s, depth + 1);
                }
                indent(out, depth);
                out.push_str("}\n");
            }
        }
        Stmt::Empty => {}
    }
}

fn emit_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(lit, _) => match lit {
            Literal::Bool(b) => b.to_string(),
            Literal::Int(n) => n.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Str(s) => format!("{s:?}"),
        },
        Expr::Primary(p) => emit_primary(p),
        Expr::Unary { op, expr, .. } => {
            let sym = match op {
                UnOp::Plus => "+",
                UnOp::Minus => "-",
                UnOp::Not => "!",
                UnOp::Invert => "~",
            };
            format!("({sym}{})", emit_expr(expr))
        }
        Expr::Binary { op, left, right, .. } => {
            format!("({} {} {})", emit_expr(left), binop_cpp(*op), emit_expr(right))
        }
        Expr::SetLiteral(items, _) => {
            let inner = items.iter().map(emit_expr).collect::<Vec<_>>().join(", ");
            format!("/* set */ {{{inner}}}")
        }
    }
}

fn emit_primary(p: &Primary) -> String {
    let mut s = p.ident.clone();
    for acc in &p.accessors {
        match acc {
            Accessor::Field(name) => {
                s.push('.');
                s.push_str(name);
            }
            Accessor::Index(idx) => {
                for e in idx {
                    let _ = write!(s, "[{}]", emit_expr(e));
                }
            }
            Accessor::Deref => s.push('*'),
            Accessor::AddressOf => s = format!("&{s}"),
            Accessor::Call(args) => {
                let inner = args.iter().map(|a| emit_expr(&a.value)).collect::<Vec<_>>().join(", ");
                let _ = write!(s, "({inner})");
            }
        }
    }
    s
}

fn binop_cpp(op: BinOp) -> &'static str {
    match op {
        BinOp::Plus => "+",
        BinOp::Minus => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::DivR => "/",
        BinOp::Mod => "%",
        BinOp::AndBin => "&",
        BinOp::OrBin => "|",
        BinOp::XorBin => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::Xor => "!=",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_program, ParserOptions};

    #[test]
    fn emits_main_with_assignment() {
        let p = parse_program("program P; var a: integer; begin a := 1 + 2; end.", ParserOptions::NONE).unwrap();
        let cpp = emit_program(&p);
        assert!(cpp.contains("int main()"));
        assert!(cpp.contains("a = (1 + 2);"));
    }

    #[test]
    fn try_maps_to_try_catch_with_except_commented() {
        let p = parse_program("program P; begin try writeln(1); except writeln(2); end; end.", ParserOptions::NONE).unwrap();
        let cpp = emit_program(&p);
        assert!(cpp.contains("try {"));
        assert!(cpp.contains("} catch (...) {"));
    }
}
