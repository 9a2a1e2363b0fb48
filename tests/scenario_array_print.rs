mod common;

use std::collections::HashSet;

use common::SharedSink;
use pasvm::frontend::{CompilerFrontend, FrontendOptions};
use pasvm::value::ValueCell;
use pasvm::vm::RunOptions;

/// Fills a bound `external array` by indexing it directly from the script,
/// via a scalar `InitSequence` callback, then prints it via `OutputSequence`
/// — exercises `REFEXT`+`IDX` reading and writing individual elements of an
/// external array rather than just its first cell.
#[test]
fn external_array_elements_are_individually_addressable() {
    let src = "program ArrayPrint; \
               var external arr: array[0..9] of integer; \
               function InitSequence(i: integer): integer; external; \
               procedure OutputSequence(v: integer); external; \
               var i: integer; \
               begin \
               for i := 0 to 9 do arr[i] := InitSequence(i); \
               for i := 0 to 9 do begin \
               if i > 0 then write(', '); \
               OutputSequence(arr[i]); \
               end; \
               end.";

    let sink = SharedSink::default();
    let mut fe = CompilerFrontend::new(FrontendOptions::default());
    fe.vm_mut().set_output_sink(Box::new(sink.clone()));
    fe.compile(src, &HashSet::new()).expect("compile");

    fe.vm_mut().bind_external_fn(
        "InitSequence",
        Box::new(|results: &mut [ValueCell], args: &mut [ValueCell]| {
            let i = args[0].get_i64()?;
            results[0] = ValueCell::from_i64(700 + i);
            Ok(())
        }),
    );

    let buf = sink.0.clone();
    fe.vm_mut().bind_external_fn(
        "OutputSequence",
        Box::new(move |_results: &mut [ValueCell], args: &mut [ValueCell]| {
            let v = args[0].get_i64()?;
            buf.borrow_mut().push_str(&v.to_string());
            Ok(())
        }),
    );

    fe.run(&RunOptions::default()).expect("run");

    let out = sink.0.borrow().clone();
    assert_eq!(out, "700, 701, 702, 703, 704, 705, 706, 707, 708, 709");
}
