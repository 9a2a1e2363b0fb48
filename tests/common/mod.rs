//! Shared test-only output sink: `BufferSink` (in `vm::mod`) can't be read
//! back after `set_output_sink` hands it to the VM, so integration tests
//! share a `Rc<RefCell<String>>` instead.

use std::cell::RefCell;
use std::rc::Rc;

use pasvm::vm::OutputSink;

#[derive(Clone, Default)]
pub struct SharedSink(pub Rc<RefCell<String>>);

impl OutputSink for SharedSink {
    fn write_str(&mut self, s: &str) {
        self.0.borrow_mut().push_str(s);
    }
}

pub fn run_ok(src: &str) -> String {
    use pasvm::frontend::{CompilerFrontend, FrontendOptions};
    use pasvm::vm::RunOptions;
    use std::collections::HashSet;

    let sink = SharedSink::default();
    let mut fe = CompilerFrontend::new(FrontendOptions::default());
    fe.vm_mut().set_output_sink(Box::new(sink.clone()));
    fe.compile(src, &HashSet::new()).expect("compile");
    fe.run(&RunOptions::default()).expect("run");
    let out = sink.0.borrow().clone();
    out
}
