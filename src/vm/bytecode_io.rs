//! Bytecode persistence (spec §6): a flat binary container for a compiled
//! program plus hex encode/decode for the text transport the frontend's
//! CLI uses. Every multi-byte field is little-endian via `byteorder`.
//!
//! Layout: format-version (i32), start-pc (u32), opcode count (u32), then
//! each opcode as `{u8 tag, u8 value_count, value_count × value_cell}`,
//! a name table of externally-bound variables, and a function table of
//! externally-bound function names.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::opcode::{BinOp, CmpsFlags, MovsFlags, Opcode, UnOp};
use crate::value::{Kind, ValueCell};

#[derive(Debug, thiserror::Error)]
pub enum BytecodeError {
    #[error("unexpected end of bytecode stream")]
    Truncated,
    #[error("unknown opcode tag {0}")]
    UnknownTag(u8),
    #[error("invalid enum code {0}")]
    InvalidCode(i64),
    #[error("odd-length or non-hex input")]
    InvalidHex,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type BcResult<T> = Result<T, BytecodeError>;

/// A deserialized program, ready to load into a [`super::VirtualMachine`].
#[derive(Debug)]
pub struct DecodedProgram {
    pub format_version: i32,
    pub start_pc: u32,
    pub ops: Vec<Opcode>,
    pub external_vars: Vec<String>,
    pub external_fns: Vec<String>,
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn hex_decode(s: &str) -> BcResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(BytecodeError::InvalidHex);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| BytecodeError::InvalidHex))
        .collect()
}

pub fn write_program(ops: &[Opcode], start_pc: u32, format_version: i32, external_var_names: &[String], external_fn_names: &[String]) -> BcResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_i32::<LittleEndian>(format_version)?;
    buf.write_u32::<LittleEndian>(start_pc)?;
    buf.write_u32::<LittleEndian>(ops.len() as u32)?;
    for op in ops {
        let operands = opcode_operands(op);
        buf.push(opcode_tag(op));
        buf.push(operands.len() as u8);
        for cell in &operands {
            write_value_cell(&mut buf, cell)?;
        }
    }
    buf.write_u32::<LittleEndian>(external_var_names.len() as u32)?;
    for name in external_var_names {
        buf.write_u32::<LittleEndian>(0)?; // flags: reserved, unused by this build
        buf.write_u32::<LittleEndian>(0)?; // static_count: initial value lives with the host, not the image
        write_name(&mut buf, name)?;
        buf.write_u32::<LittleEndian>(1)?; // byte_size: every external binds to a single cell
    }
    buf.write_u32::<LittleEndian>(external_fn_names.len() as u32)?;
    for name in external_fn_names {
        write_name(&mut buf, name)?;
    }
    Ok(buf)
}

pub fn read_program(bytes: &[u8]) -> BcResult<DecodedProgram> {
    let mut cursor = Cursor::new(bytes);
    let format_version = cursor.read_i32::<LittleEndian>()?;
    let start_pc = cursor.read_u32::<LittleEndian>()?;
    let op_count = cursor.read_u32::<LittleEndian>()?;
    let mut ops = Vec::with_capacity(op_count as usize);
    for _ in 0..op_count {
        let tag = cursor.read_u8()?;
        let value_count = cursor.read_u8()?;
        let mut cells = Vec::with_capacity(value_count as usize);
        for _ in 0..value_count {
            cells.push(read_value_cell(&mut cursor)?);
        }
        ops.push(opcode_from_tag(tag, &cells)?);
    }
    let var_count = cursor.read_u32::<LittleEndian>()?;
    let mut external_vars = Vec::with_capacity(var_count as usize);
    for _ in 0..var_count {
        let _flags = cursor.read_u32::<LittleEndian>()?;
        let static_count = cursor.read_u32::<LittleEndian>()?;
        for _ in 0..static_count {
            read_value_cell(&mut cursor)?;
        }
        let name = read_name(&mut cursor)?;
        let _byte_size = cursor.read_u32::<LittleEndian>()?;
        external_vars.push(name);
    }
    let fn_count = cursor.read_u32::<LittleEndian>()?;
    let mut external_fns = Vec::with_capacity(fn_count as usize);
    for _ in 0..fn_count {
        external_fns.push(read_name(&mut cursor)?);
    }
    Ok(DecodedProgram { format_version, start_pc, ops, external_vars, external_fns })
}

fn write_name(buf: &mut Vec<u8>, s: &str) -> BcResult<()> {
    buf.write_u32::<LittleEndian>(s.len() as u32)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_name<R: Read>(r: &mut R) -> BcResult<String> {
    let len = r.read_u32::<LittleEndian>()?;
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| BytecodeError::Truncated)
}

fn write_value_cell(buf: &mut Vec<u8>, cell: &ValueCell) -> BcResult<()> {
    match cell.kind() {
        Kind::Bool => {
            buf.push(0);
            buf.push(cell.get_bool().unwrap_or(false) as u8);
        }
        Kind::Float32 => {
            buf.push(1);
            buf.write_f32::<LittleEndian>(cell.get_f64().unwrap_or(0.0) as f32)?;
        }
        Kind::Float64 => {
            buf.push(2);
            buf.write_f64::<LittleEndian>(cell.get_f64().unwrap_or(0.0))?;
        }
        Kind::I8 => {
            buf.push(3);
            buf.write_i8(cell.get_i64().unwrap_or(0) as i8)?;
        }
        Kind::U8 => {
            buf.push(4);
            buf.write_u8(cell.get_i64().unwrap_or(0) as u8)?;
        }
        Kind::I16 => {
            buf.push(5);
            buf.write_i16::<LittleEndian>(cell.get_i64().unwrap_or(0) as i16)?;
        }
        Kind::U16 => {
            buf.push(6);
            buf.write_u16::<LittleEndian>(cell.get_i64().unwrap_or(0) as u16)?;
        }
        Kind::I32 => {
            buf.push(7);
            buf.write_i32::<LittleEndian>(cell.get_i64().unwrap_or(0) as i32)?;
        }
        Kind::U32 => {
            buf.push(8);
            buf.write_u32::<LittleEndian>(cell.get_i64().unwrap_or(0) as u32)?;
        }
        Kind::I64 => {
            buf.push(9);
            buf.write_i64::<LittleEndian>(cell.get_i64().unwrap_or(0))?;
        }
        Kind::U64 => {
            buf.push(10);
            buf.write_u64::<LittleEndian>(cell.get_i64().unwrap_or(0) as u64)?;
        }
        Kind::Str => {
            buf.push(11);
            write_name(buf, &cell.get_string().unwrap_or_default())?;
        }
        Kind::Ptr | Kind::StrChar | Kind::Array | Kind::Map | Kind::Undefined => {
            buf.push(255);
        }
    }
    Ok(())
}

fn read_value_cell<R: Read>(r: &mut R) -> BcResult<ValueCell> {
    let tag = r.read_u8()?;
    Ok(match tag {
        0 => {
            let mut c = ValueCell::new(Kind::Bool);
            c.set_bool(r.read_u8()? != 0, None);
            c
        }
        1 => {
            let mut c = ValueCell::new(Kind::Float32);
            c.set_f64(f64::from(r.read_f32::<LittleEndian>()?), None);
            c
        }
        2 => {
            let mut c = ValueCell::new(Kind::Float64);
            c.set_f64(r.read_f64::<LittleEndian>()?, None);
            c
        }
        3 => {
            let mut c = ValueCell::new(Kind::I8);
            c.set_i64(i64::from(r.read_i8()?), None);
            c
        }
        4 => {
            let mut c = ValueCell::new(Kind::U8);
            c.set_i64(i64::from(r.read_u8()?), None);
            c
        }
        5 => {
            let mut c = ValueCell::new(Kind::I16);
            c.set_i64(i64::from(r.read_i16::<LittleEndian>()?), None);
            c
        }
        6 => {
            let mut c = ValueCell::new(Kind::U16);
            c.set_i64(i64::from(r.read_u16::<LittleEndian>()?), None);
            c
        }
        7 => {
            let mut c = ValueCell::new(Kind::I32);
            c.set_i64(i64::from(r.read_i32::<LittleEndian>()?), None);
            c
        }
        8 => {
            let mut c = ValueCell::new(Kind::U32);
            c.set_i64(i64::from(r.read_u32::<LittleEndian>()?), None);
            c
        }
        9 => {
            let mut c = ValueCell::new(Kind::I64);
            c.set_i64(r.read_i64::<LittleEndian>()?, None);
            c
        }
        10 => {
            let mut c = ValueCell::new(Kind::U64);
            c.set_i64(r.read_u64::<LittleEndian>()? as i64, None);
            c
        }
        11 => ValueCell::from_string(read_name(r)?),
        255 => ValueCell::default(),
        t => return Err(BytecodeError::UnknownTag(t)),
    })
}

fn cell_i64(cells: &[ValueCell], i: usize) -> BcResult<i64> {
    cells.get(i).ok_or(BytecodeError::Truncated)?.get_i64().map_err(|_| BytecodeError::Truncated)
}

fn cell_bool(cells: &[ValueCell], i: usize) -> BcResult<bool> {
    cells.get(i).ok_or(BytecodeError::Truncated)?.get_bool().map_err(|_| BytecodeError::Truncated)
}

fn kind_code(k: Kind) -> i64 {
    k as i64
}

fn kind_from_code(n: i64) -> BcResult<Kind> {
    Ok(match n {
        0 => Kind::Bool,
        1 => Kind::Float32,
        2 => Kind::Float64,
        3 => Kind::I8,
        4 => Kind::U8,
        5 => Kind::I16,
        6 => Kind::U16,
        7 => Kind::I32,
        8 => Kind::U32,
        9 => Kind::I64,
        10 => Kind::U64,
        11 => Kind::Ptr,
        12 => Kind::Str,
        13 => Kind::StrChar,
        14 => Kind::Array,
        15 => Kind::Map,
        16 => Kind::Undefined,
        _ => return Err(BytecodeError::InvalidCode(n)),
    })
}

fn binop_code(op: BinOp) -> i64 {
    match op {
        BinOp::Plus => 0,
        BinOp::Minus => 1,
        BinOp::Mod => 2,
        BinOp::Mul => 3,
        BinOp::Div => 4,
        BinOp::DivR => 5,
        BinOp::AndBin => 6,
        BinOp::Shl => 7,
        BinOp::Shr => 8,
        BinOp::OrBin => 9,
        BinOp::XorBin => 10,
        BinOp::And => 11,
        BinOp::AndLog => 12,
        BinOp::Or => 13,
        BinOp::OrLog => 14,
        BinOp::Xor => 15,
        BinOp::Lt => 16,
        BinOp::Gt => 17,
        BinOp::Le => 18,
        BinOp::Ge => 19,
        BinOp::Eq => 20,
        BinOp::Ne => 21,
        BinOp::Min => 22,
        BinOp::Max => 23,
    }
}

fn binop_from_code(n: i64) -> BcResult<BinOp> {
    Ok(match n {
        0 => BinOp::Plus,
        1 => BinOp::Minus,
        2 => BinOp::Mod,
        3 => BinOp::Mul,
        4 => BinOp::Div,
        5 => BinOp::DivR,
        6 => BinOp::AndBin,
        7 => BinOp::Shl,
        8 => BinOp::Shr,
        9 => BinOp::OrBin,
        10 => BinOp::XorBin,
        11 => BinOp::And,
        12 => BinOp::AndLog,
        13 => BinOp::Or,
        14 => BinOp::OrLog,
        15 => BinOp::Xor,
        16 => BinOp::Lt,
        17 => BinOp::Gt,
        18 => BinOp::Le,
        19 => BinOp::Ge,
        20 => BinOp::Eq,
        21 => BinOp::Ne,
        22 => BinOp::Min,
        23 => BinOp::Max,
        _ => return Err(BytecodeError::InvalidCode(n)),
    })
}

fn unop_code(op: UnOp) -> i64 {
    match op {
        UnOp::Plus => 0,
        UnOp::Minus => 1,
        UnOp::Not => 2,
        UnOp::Inv => 3,
        UnOp::Inc => 4,
        UnOp::Dec => 5,
    }
}

fn unop_from_code(n: i64) -> BcResult<UnOp> {
    Ok(match n {
        0 => UnOp::Plus,
        1 => UnOp::Minus,
        2 => UnOp::Not,
        3 => UnOp::Inv,
        4 => UnOp::Inc,
        5 => UnOp::Dec,
        _ => return Err(BytecodeError::InvalidCode(n)),
    })
}

fn i64_cell(n: i64) -> ValueCell {
    ValueCell::from_i64(n)
}

fn bool_cell(b: bool) -> ValueCell {
    ValueCell::from_bool(b)
}

fn opcode_tag(op: &Opcode) -> u8 {
    match op {
        Opcode::Nop => 0,
        Opcode::Binop { .. } => 1,
        Opcode::Unop { .. } => 2,
        Opcode::Multop { .. } => 3,
        Opcode::Movs { .. } => 4,
        Opcode::Cmps { .. } => 5,
        Opcode::Addref { .. } => 6,
        Opcode::Idx { .. } => 7,
        Opcode::IdxStr => 8,
        Opcode::Ref { .. } => 9,
        Opcode::RefExt { .. } => 10,
        Opcode::RefSt { .. } => 11,
        Opcode::Deref { .. } => 12,
        Opcode::Pop { .. } => 13,
        Opcode::Push { .. } => 14,
        Opcode::Call { .. } => 15,
        Opcode::CallExt { .. } => 16,
        Opcode::Ret => 17,
        Opcode::Jmp { .. } => 18,
        Opcode::Fjmp { .. } => 19,
        Opcode::Tjmp { .. } => 20,
        Opcode::Cvrt { .. } => 21,
        Opcode::Wrt { .. } => 22,
        Opcode::Exit => 23,
    }
}

fn opcode_operands(op: &Opcode) -> Vec<ValueCell> {
    match op {
        Opcode::Nop | Opcode::IdxStr | Opcode::Ret | Opcode::Exit => vec![],
        Opcode::Binop { op, ty } => vec![i64_cell(binop_code(*op)), i64_cell(kind_code(*ty))],
        Opcode::Unop { op, ty } => vec![i64_cell(unop_code(*op)), i64_cell(kind_code(*ty))],
        Opcode::Multop { op, ty, count } => vec![i64_cell(binop_code(*op)), i64_cell(kind_code(*ty)), i64_cell(i64::from(*count))],
        Opcode::Movs { flags, size } => vec![i64_cell(i64::from(flags.bits())), i64_cell(i64::from(*size))],
        Opcode::Cmps { flags, size, ty } => vec![i64_cell(i64::from(flags.bits())), i64_cell(i64::from(*size)), i64_cell(kind_code(*ty))],
        Opcode::Addref { delta } => vec![i64_cell(*delta)],
        Opcode::Idx { elem_size, low } => vec![i64_cell(*elem_size), i64_cell(*low)],
        Opcode::Ref { n, scope_level, size, auto_deref } => vec![i64_cell(*n), i64_cell(i64::from(*scope_level)), i64_cell(*size), bool_cell(*auto_deref)],
        Opcode::RefExt { n, size } => vec![i64_cell(*n), i64_cell(*size)],
        Opcode::RefSt { size } => vec![i64_cell(*size)],
        Opcode::Deref { size } => vec![i64_cell(*size)],
        Opcode::Pop { n } => vec![i64_cell(*n)],
        Opcode::Push { value, count } => vec![value.clone(), i64_cell(*count)],
        Opcode::Call { addr, arg_size, ret_size, scope_level, self_size } => {
            vec![i64_cell(*addr), i64_cell(*arg_size), i64_cell(*ret_size), i64_cell(i64::from(*scope_level)), i64_cell(*self_size)]
        }
        Opcode::CallExt { addr, arg_size, ret_size } => vec![i64_cell(*addr), i64_cell(*arg_size), i64_cell(*ret_size)],
        Opcode::Jmp { offset } | Opcode::Fjmp { offset } | Opcode::Tjmp { offset } => vec![i64_cell(*offset)],
        Opcode::Cvrt { kind } => vec![i64_cell(kind_code(*kind))],
        Opcode::Wrt { size, end_line } => vec![i64_cell(*size), bool_cell(*end_line)],
    }
}

fn opcode_from_tag(tag: u8, cells: &[ValueCell]) -> BcResult<Opcode> {
    Ok(match tag {
        0 => Opcode::Nop,
        1 => Opcode::Binop { op: binop_from_code(cell_i64(cells, 0)?)?, ty: kind_from_code(cell_i64(cells, 1)?)? },
        2 => Opcode::Unop { op: unop_from_code(cell_i64(cells, 0)?)?, ty: kind_from_code(cell_i64(cells, 1)?)? },
        3 => Opcode::Multop { op: binop_from_code(cell_i64(cells, 0)?)?, ty: kind_from_code(cell_i64(cells, 1)?)?, count: cell_i64(cells, 2)? as i32 },
        4 => Opcode::Movs { flags: MovsFlags::from_bits_truncate(cell_i64(cells, 0)? as u8), size: cell_i64(cells, 1)? as i32 },
        5 => Opcode::Cmps {
            flags: CmpsFlags::from_bits_truncate(cell_i64(cells, 0)? as u8),
            size: cell_i64(cells, 1)? as i32,
            ty: kind_from_code(cell_i64(cells, 2)?)?,
        },
        6 => Opcode::Addref { delta: cell_i64(cells, 0)? },
        7 => Opcode::Idx { elem_size: cell_i64(cells, 0)?, low: cell_i64(cells, 1)? },
        8 => Opcode::IdxStr,
        9 => Opcode::Ref { n: cell_i64(cells, 0)?, scope_level: cell_i64(cells, 1)? as i32, size: cell_i64(cells, 2)?, auto_deref: cell_bool(cells, 3)? },
        10 => Opcode::RefExt { n: cell_i64(cells, 0)?, size: cell_i64(cells, 1)? },
        11 => Opcode::RefSt { size: cell_i64(cells, 0)? },
        12 => Opcode::Deref { size: cell_i64(cells, 0)? },
        13 => Opcode::Pop { n: cell_i64(cells, 0)? },
        14 => Opcode::Push { value: cells.first().cloned().ok_or(BytecodeError::Truncated)?, count: cell_i64(cells, 1)? },
        15 => Opcode::Call {
            addr: cell_i64(cells, 0)?,
            arg_size: cell_i64(cells, 1)?,
            ret_size: cell_i64(cells, 2)?,
            scope_level: cell_i64(cells, 3)? as i32,
            self_size: cell_i64(cells, 4)?,
        },
        16 => Opcode::CallExt { addr: cell_i64(cells, 0)?, arg_size: cell_i64(cells, 1)?, ret_size: cell_i64(cells, 2)? },
        17 => Opcode::Ret,
        18 => Opcode::Jmp { offset: cell_i64(cells, 0)? },
        19 => Opcode::Fjmp { offset: cell_i64(cells, 0)? },
        20 => Opcode::Tjmp { offset: cell_i64(cells, 0)? },
        21 => Opcode::Cvrt { kind: kind_from_code(cell_i64(cells, 0)?)? },
        22 => Opcode::Wrt { size: cell_i64(cells, 0)?, end_line: cell_bool(cells, 1)? },
        23 => Opcode::Exit,
        t => return Err(BytecodeError::UnknownTag(t)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = vec![0u8, 1, 255, 16];
        let hex = hex_encode(&bytes);
        assert_eq!(hex, "0001ff10");
        assert_eq!(hex_decode(&hex).unwrap(), bytes);
    }

    #[test]
    fn program_roundtrip() {
        let ops = vec![
            Opcode::Push { value: ValueCell::from_i64(42), count: 1 },
            Opcode::Ref { n: 0, scope_level: 0, size: 1, auto_deref: false },
            Opcode::Binop { op: BinOp::Plus, ty: Kind::I64 },
            Opcode::Jmp { offset: 7 },
            Opcode::Exit,
        ];
        let vars = vec!["a".to_string()];
        let fns = vec!["sqrt".to_string()];
        let bytes = write_program(&ops, 0, 1, &vars, &fns).unwrap();
        let decoded = read_program(&bytes).unwrap();
        assert_eq!(decoded.ops.len(), ops.len());
        assert_eq!(decoded.external_vars, vars);
        assert_eq!(decoded.external_fns, fns);
        match &decoded.ops[2] {
            Opcode::Binop { op: BinOp::Plus, ty: Kind::I64 } => {}
            other => panic!("unexpected opcode: {other:?}"),
        }
    }
}
