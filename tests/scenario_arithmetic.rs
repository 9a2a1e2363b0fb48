mod common;

use std::collections::HashSet;

use pasvm::frontend::{CompilerFrontend, FrontendOptions};
use pasvm::value::ValueCell;
use pasvm::vm::RunOptions;

#[test]
fn externals_combine_to_expected_value() {
    let src = "program Arith; \
               var external a: double; \
               var external b: double; \
               var external c: double; \
               begin a := b * c + c * 1 + 0.25; end.";

    let mut fe = CompilerFrontend::new(FrontendOptions::default());
    fe.compile(src, &HashSet::new()).expect("compile");
    fe.vm_mut().bind_external_var("a", ValueCell::from_f64(0.0));
    fe.vm_mut().bind_external_var("b", ValueCell::from_f64(0.5));
    fe.vm_mut().bind_external_var("c", ValueCell::from_f64(4.5));

    fe.run(&RunOptions::default()).expect("run");

    let a = fe.vm().external_var("a").unwrap().get_f64().unwrap();
    assert!((a - 5.0).abs() < 1e-12, "expected 5.0, got {a}");
}
