mod common;

use common::run_ok;

/// `break` cuts a `while` nested inside a `for` short after two iterations,
/// then a second `for` loop's `continue` skips exactly one iteration.
#[test]
fn nested_break_then_sibling_continue() {
    let src = "program Loops; \
               var i, j, k: integer; \
               begin \
               for k := 1 to 1 do \
               begin \
               j := 0; \
               while true do \
               begin \
               j := j + 1; \
               if j > 2 then break; \
               writeln('i=', j); \
               end; \
               end; \
               for i := 1 to 5 do \
               begin \
               if i = 3 then continue; \
               writeln('i=', i); \
               end; \
               end.";

    let out = run_ok(src);
    assert_eq!(out, "i=1\ni=2\ni=1\ni=2\ni=4\ni=5\n");
}
