//! Conditional-compilation preprocessor (spec §6): strips
//! `{$IFDEF X}`/`{$IFNDEF X}`/`{$ELSE}`/`{$ENDIF}`/`{$IFEND}` directives and
//! the lines they gate out, and drops the `0x1A` (SUB) sentinel byte some
//! Pascal editors append to source files.

/// Runs the preprocessor over raw source text against a caller-supplied
/// define set. Directive lines are always removed from the output, even
/// when their branch is kept — only the text *between* directives is
/// conditionally emitted.
pub fn preprocess(source: &str, defines: &std::collections::HashSet<String>) -> String {
    let source = source.replace('\u{1A}', "");
    let mut out = String::with_capacity(source.len());
    // Stack of (branch_taken, else_seen) for nested {$IFDEF}/{$IFNDEF}.
    let mut stack: Vec<(bool, bool)> = Vec::new();

    for line in source.lines() {
        if let Some(directive) = parse_directive(line) {
            match directive {
                Directive::IfDef(name) => stack.push((defines.contains(&name), false)),
                Directive::IfNDef(name) => stack.push((!defines.contains(&name), false)),
                Directive::Else => {
                    if let Some(top) = stack.last_mut() {
                        top.0 = !top.0;
                        top.1 = true;
                    }
                }
                Directive::EndIf => {
                    stack.pop();
                }
            }
            continue;
        }
        if stack.iter().all(|(taken, _)| *taken) {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

enum Directive {
    IfDef(String),
    IfNDef(String),
    Else,
    EndIf,
}

fn parse_directive(line: &str) -> Option<Directive> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}'))?.trim();
    let inner = inner.strip_prefix('$')?;
    if let Some(name) = inner.strip_prefix("IFDEF") {
        return Some(Directive::IfDef(name.trim().to_string()));
    }
    if let Some(name) = inner.strip_prefix("IFNDEF") {
        return Some(Directive::IfNDef(name.trim().to_string()));
    }
    if inner.eq_ignore_ascii_case("ELSE") {
        return Some(Directive::Else);
    }
    if inner.eq_ignore_ascii_case("ENDIF") || inner.eq_ignore_ascii_case("IFEND") {
        return Some(Directive::EndIf);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn defines(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_defined_branch() {
        let src = "a\n{$IFDEF DEBUG}\nb\n{$ELSE}\nc\n{$ENDIF}\nd\n";
        let out = preprocess(src, &defines(&["DEBUG"]));
        assert_eq!(out, "a\nb\nd\n");
    }

    #[test]
    fn keeps_else_branch_when_undefined() {
        let src = "a\n{$IFDEF DEBUG}\nb\n{$ELSE}\nc\n{$ENDIF}\nd\n";
        let out = preprocess(src, &defines(&[]));
        assert_eq!(out, "a\nc\nd\n");
    }

    #[test]
    fn ifndef_inverts_sense() {
        let src = "{$IFNDEF RELEASE}\nb\n{$IFEND}\n";
        assert_eq!(preprocess(src, &defines(&[])), "b\n");
        assert_eq!(preprocess(src, &defines(&["RELEASE"])), "");
    }

    #[test]
    fn strips_sub_byte() {
        let src = "a\u{1A}\n";
        assert_eq!(preprocess(src, &defines(&[])), "a\n");
    }

    #[test]
    fn nested_directives() {
        let src = "{$IFDEF A}\nx\n{$IFDEF B}\ny\n{$ENDIF}\nz\n{$ENDIF}\n";
        assert_eq!(preprocess(src, &defines(&["A"])), "x\nz\n");
        assert_eq!(preprocess(src, &defines(&["A", "B"])), "x\ny\nz\n");
    }
}
