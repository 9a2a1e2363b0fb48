mod common;

use common::run_ok;

/// Fields assigned and read directly off an instance, a method called
/// through `with`, and a method called directly as `obj.Method()` with no
/// `with` and no self-fallback in sight.
#[test]
fn field_access_and_direct_method_calls_update_and_read_state() {
    let src = "program ClassDemo; \
               type TDemo = class \
               a, b, c: integer; \
               x: double; \
               function GetA: integer; \
               function Half: double; \
               end; \
               function TDemo.GetA: integer; \
               begin Result := a; end; \
               function TDemo.Half: double; \
               begin Result := x / 2; end; \
               var d: TDemo; \
               begin \
               d.a := 5; \
               d.b := 45; \
               d.c := 646; \
               writeln(d.a, d.b, d.c); \
               d.x := 111.111; \
               writeln(d.x); \
               writeln(0); \
               writeln(123); \
               writeln(456); \
               d.x := 3; \
               writeln(d.Half()); \
               d.a := 123; \
               writeln(d.GetA()); \
               end.";

    let out = run_ok(src);
    assert_eq!(out, "545646\n111.111\n0\n123\n456\n1.5\n123\n");
}
