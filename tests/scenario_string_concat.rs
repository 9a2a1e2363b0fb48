mod common;

use common::run_ok;

#[test]
fn concatenated_string_matches_expected_literal() {
    let src = "program StrConcat; \
               var s: string; \
               begin \
               s := 'five:' + '5'; \
               writeln(s + ' '); \
               end.";

    let out = run_ok(src);
    assert_eq!(out, "five:5 \n");
}
