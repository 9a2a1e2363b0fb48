//! Script-visible standard library (spec §6): a fixed table of named
//! callbacks bound into a [`VirtualMachine`] the same way a host binds its
//! own external functions — `stdlib` just happens to be the set this crate
//! supplies out of the box. Names are matched case-insensitively by
//! `CodeGen`'s lowercasing of identifiers, so every binding key here is
//! already lowercase.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::tracer::VmTracer;
use crate::value::ValueCell;
use crate::vm::{ExternalFn, RunResult, RuntimeError, VirtualMachine};

fn arg(args: &[ValueCell], i: usize) -> RunResult<&ValueCell> {
    args.get(i).ok_or(RuntimeError::StackUnderflow)
}

fn ret1(results: &mut [ValueCell]) -> RunResult<&mut ValueCell> {
    results.first_mut().ok_or(RuntimeError::StackUnderflow)
}

/// Holds the ambient byte buffer `readint`/`readfloat` decode from. The
/// spec names these with a bit-range and endianness flag but no buffer
/// argument, so the buffer is host-supplied state rather than a call
/// argument — set it with [`Stdlib::set_buffer`] before the script reads
/// from it.
#[derive(Clone, Default)]
pub struct Stdlib {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl Stdlib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buffer(&self, bytes: Vec<u8>) {
        *self.buffer.borrow_mut() = bytes;
    }

    /// Binds every stdlib name the loaded program actually references.
    /// `bind_external_fn` is a no-op for names the program never calls, so
    /// it's safe to always offer the whole table.
    pub fn install<Tr: VmTracer>(&self, vm: &mut VirtualMachine<Tr>) {
        bind_unary(vm, "sin", f64::sin);
        bind_unary(vm, "cos", f64::cos);
        bind_unary(vm, "tan", f64::tan);
        bind_unary(vm, "asin", f64::asin);
        bind_unary(vm, "asn", f64::asin);
        bind_unary(vm, "acos", f64::acos);
        bind_unary(vm, "acs", f64::acos);
        bind_unary(vm, "atan", f64::atan);
        bind_unary(vm, "atn", f64::atan);
        bind_unary(vm, "sqrt", f64::sqrt);
        bind_unary(vm, "sqr", |x| x * x);
        bind_unary(vm, "abs", f64::abs);
        bind_unary(vm, "ln", f64::ln);
        bind_unary(vm, "log", f64::log10);
        bind_unary(vm, "exp", f64::exp);
        bind_unary(vm, "deg", f64::to_degrees);
        bind_unary(vm, "rad", f64::to_radians);

        bind_binary_f64(vm, "atan2", f64::atan2);
        bind_binary_f64(vm, "pow", f64::powf);
        bind_binary_f64(vm, "expt", f64::powf);
        bind_binary_f64(vm, "xpy", f64::powf);

        bind_binary_i64(vm, "div", |a, b| if b == 0 { 0 } else { a / b });
        bind_binary_i64(vm, "mod", |a, b| if b == 0 { 0 } else { a % b });
        bind_binary_i64(vm, "sub", |a, b| a.wrapping_sub(b));
        bind_binary_i64(vm, "shl", |a, b| a << (b & 63));
        bind_binary_i64(vm, "shr", |a, b| a >> (b & 63));
        bind_binary_i64(vm, "rol", |a, b| (a as i64).rotate_left((b & 63) as u32));
        bind_binary_i64(vm, "ror", |a, b| (a as i64).rotate_right((b & 63) as u32));

        bind_unary_i64(vm, "neg", |a| -a);

        vm.bind_external_fn(
            "trunc",
            Box::new(|results, args| {
                let v = arg(args, 0)?.get_f64()? as i64;
                ret1(results)?.set_i64(v, None);
                Ok(())
            }),
        );

        vm.bind_external_fn(
            "len",
            Box::new(|results, args| {
                let s = arg(args, 0)?.get_string()?;
                ret1(results)?.set_i64(s.chars().count() as i64, None);
                Ok(())
            }),
        );

        vm.bind_external_fn(
            "sel",
            Box::new(|results, args| {
                // sel(c, a, b) = c ? b : a
                let c = arg(args, 0)?.get_i64()?;
                let picked = if c != 0 { arg(args, 2)? } else { arg(args, 1)? }.clone();
                *ret1(results)? = picked;
                Ok(())
            }),
        );

        vm.bind_external_fn(
            "limit",
            Box::new(|results, args| {
                let mn = arg(args, 0)?.get_f64()?;
                let x = arg(args, 1)?.get_f64()?;
                let mx = arg(args, 2)?.get_f64()?;
                ret1(results)?.set_f64(x.clamp(mn.min(mx), mn.max(mx)), None);
                Ok(())
            }),
        );

        // `move` is a value-in/value-out copy, not the classic memory-block
        // `Move` procedure: external callbacks only ever see resolved value
        // cells, never the VM's container space, so a byte-range aliasing
        // copy can't be expressed at this layer. Block moves inside scripts
        // go through MOVS in codegen instead.
        vm.bind_external_fn(
            "move",
            Box::new(|results, args| {
                let v = arg(args, 0)?.clone();
                if let Ok(slot) = ret1(results) {
                    *slot = v;
                }
                Ok(())
            }),
        );

        vm.bind_external_fn(
            "now",
            Box::new(|results, _args| {
                let micros = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as i64).unwrap_or(0);
                ret1(results)?.set_i64(micros, None);
                Ok(())
            }),
        );

        vm.bind_external_fn(
            "secondsbetween",
            Box::new(|results, args| {
                let a = arg(args, 0)?.get_f64()?;
                let b = arg(args, 1)?.get_f64()?;
                ret1(results)?.set_f64((b - a).abs(), None);
                Ok(())
            }),
        );

        let buf = self.buffer.clone();
        vm.bind_external_fn(
            "readint",
            Box::new(move |results, args| {
                let lo = arg(args, 0)?.get_i64()? as usize;
                let hi = arg(args, 1)?.get_i64()? as usize;
                let be = arg(args, 2)?.get_bool()?;
                let v = read_bit_range(&buf.borrow(), lo, hi, be) as i64;
                ret1(results)?.set_i64(v, None);
                Ok(())
            }),
        );

        let buf = self.buffer.clone();
        vm.bind_external_fn(
            "readfloat",
            Box::new(move |results, args| {
                let lo = arg(args, 0)?.get_i64()? as usize;
                let hi = arg(args, 1)?.get_i64()? as usize;
                let be = arg(args, 2)?.get_bool()?;
                let bits = read_bit_range(&buf.borrow(), lo, hi, be);
                ret1(results)?.set_f64(bits as f64, None);
                Ok(())
            }),
        );
    }
}

/// Reads the inclusive bit range `[lo, hi]` out of `buf` as an unsigned
/// integer, treating the buffer as one big-endian or little-endian bit
/// string depending on `be`. Out-of-range bits read as zero.
fn read_bit_range(buf: &[u8], lo: usize, hi: usize, be: bool) -> u64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let mut value: u64 = 0;
    for bit in lo..=hi {
        let byte_idx = bit / 8;
        let Some(byte) = buf.get(byte_idx) else { continue };
        let bit_in_byte = if be { 7 - (bit % 8) } else { bit % 8 };
        let b = (byte >> bit_in_byte) & 1;
        value = (value << 1) | u64::from(b);
    }
    value
}

fn bind_unary<Tr: VmTracer>(vm: &mut VirtualMachine<Tr>, name: &str, f: impl Fn(f64) -> f64 + 'static) {
    let cb: ExternalFn = Box::new(move |results, args| {
        let x = arg(args, 0)?.get_f64()?;
        ret1(results)?.set_f64(f(x), None);
        Ok(())
    });
    vm.bind_external_fn(name, cb);
}

fn bind_unary_i64<Tr: VmTracer>(vm: &mut VirtualMachine<Tr>, name: &str, f: impl Fn(i64) -> i64 + 'static) {
    let cb: ExternalFn = Box::new(move |results, args| {
        let x = arg(args, 0)?.get_i64()?;
        ret1(results)?.set_i64(f(x), None);
        Ok(())
    });
    vm.bind_external_fn(name, cb);
}

fn bind_binary_f64<Tr: VmTracer>(vm: &mut VirtualMachine<Tr>, name: &str, f: impl Fn(f64, f64) -> f64 + 'static) {
    let cb: ExternalFn = Box::new(move |results, args| {
        let a = arg(args, 0)?.get_f64()?;
        let b = arg(args, 1)?.get_f64()?;
        ret1(results)?.set_f64(f(a, b), None);
        Ok(())
    });
    vm.bind_external_fn(name, cb);
}

fn bind_binary_i64<Tr: VmTracer>(vm: &mut VirtualMachine<Tr>, name: &str, f: impl Fn(i64, i64) -> i64 + 'static) {
    let cb: ExternalFn = Box::new(move |results, args| {
        let a = arg(args, 0)?.get_i64()?;
        let b = arg(args, 1)?.get_i64()?;
        ret1(results)?.set_i64(f(a, b), None);
        Ok(())
    });
    vm.bind_external_fn(name, cb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_range_reads_big_and_little_endian() {
        let buf = vec![0b1010_0000u8];
        assert_eq!(read_bit_range(&buf, 0, 2, true), 0b101);
        assert_eq!(read_bit_range(&buf, 0, 2, false), 0b000);
    }

    #[test]
    fn install_binds_every_declared_external() {
        let mut vm: VirtualMachine = VirtualMachine::new();
        let vars = indexmap::IndexMap::new();
        let mut fns = indexmap::IndexMap::new();
        for name in ["sin", "sqrt", "sel", "limit", "div", "readint", "now"] {
            fns.insert(name.to_string(), ());
        }
        vm.load(vec![], 0, &vars, &fns);
        Stdlib::new().install(&mut vm);
    }
}
