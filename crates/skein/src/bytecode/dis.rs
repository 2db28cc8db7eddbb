//! Disassembly listings for `skein dis` and debugging.

use std::fmt::Write;

use super::{
    code::{Code, Const},
    op::{Opcode, Operands},
};
use crate::{
    expressions::{CmpOperator, Operator},
    fstring::float_repr,
    intern::Interns,
};

/// Renders `code` and all of its children, depth first.
pub(crate) fn disassemble(code: &Code, interns: &Interns) -> String {
    let mut out = String::new();
    write_code(&mut out, code, interns);
    out
}

fn write_code(out: &mut String, code: &Code, interns: &Interns) {
    let title = if code.qualname.is_empty() {
        interns.get_str(code.name)
    } else {
        code.qualname.as_str()
    };
    let _ = writeln!(out, "Disassembly of {title}:");

    let bytecode = &code.bytecode;
    let mut ip = 0;
    let mut last_line = 0;
    while ip < bytecode.len() {
        let line = code.location(ip).map_or(0, |range| range.start().line);
        let line_col = if line == last_line {
            String::new()
        } else {
            last_line = line;
            line.to_string()
        };
        let handler = if code.exception_table.iter().any(|entry| entry.handler as usize == ip) {
            ">>"
        } else {
            "  "
        };
        let Ok(op) = Opcode::try_from(bytecode[ip]) else {
            let _ = writeln!(out, "{line_col:>5} {handler} {ip:>5} <invalid {}>", bytecode[ip]);
            ip += 1;
            continue;
        };
        let name: &'static str = op.into();
        let operand = describe_operand(code, interns, op, ip);
        let _ = writeln!(out, "{line_col:>5} {handler} {ip:>5} {name:<20} {operand}");
        ip += op.size();
    }

    if !code.exception_table.is_empty() {
        let _ = writeln!(out, "ExceptionTable:");
        for entry in &code.exception_table {
            let _ = writeln!(
                out,
                "  {} to {} -> {} [{}]",
                entry.start, entry.end, entry.handler, entry.stack_depth
            );
        }
    }

    for child in &code.children {
        out.push('\n');
        write_code(out, child, interns);
    }
}

fn read_u16(bytecode: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytecode[at], bytecode[at + 1]])
}

fn describe_operand(code: &Code, interns: &Interns, op: Opcode, ip: usize) -> String {
    let bytecode = &code.bytecode;
    match op.operands() {
        Operands::None => String::new(),
        Operands::U8 => {
            let arg = bytecode[ip + 1];
            match op {
                Opcode::BinaryOp | Opcode::InplaceOp => Operator::from_repr(arg)
                    .map_or_else(|| arg.to_string(), |operator| format!("{arg} ({})", operator.symbol())),
                Opcode::CompareOp => CmpOperator::from_repr(arg)
                    .map_or_else(|| arg.to_string(), |operator| format!("{arg} ({})", operator.symbol())),
                _ => arg.to_string(),
            }
        }
        Operands::U16 => {
            let arg = read_u16(bytecode, ip + 1);
            let index = usize::from(arg);
            let detail = match op {
                Opcode::LoadConst => code.consts.get(index).map(|c| const_repr(c, interns)),
                Opcode::LoadLocal | Opcode::StoreLocal | Opcode::DeleteLocal => {
                    code.varnames.get(index).map(|name| interns.get_str(*name).to_owned())
                }
                Opcode::LoadDeref | Opcode::StoreDeref | Opcode::DeleteDeref | Opcode::LoadClosure => {
                    (index < code.cell_count()).then(|| interns.get_str(code.cell_name(index)).to_owned())
                }
                Opcode::LoadGlobal
                | Opcode::StoreGlobal
                | Opcode::DeleteGlobal
                | Opcode::LoadName
                | Opcode::StoreName
                | Opcode::DeleteName
                | Opcode::LoadAttr
                | Opcode::StoreAttr
                | Opcode::DeleteAttr
                | Opcode::ImportFrom => code.names.get(index).map(|name| interns.get_str(*name).to_owned()),
                _ => None,
            };
            match detail {
                Some(detail) => format!("{arg} ({detail})"),
                None => arg.to_string(),
            }
        }
        Operands::Jump => {
            let offset = i16::from_le_bytes([bytecode[ip + 1], bytecode[ip + 2]]);
            let target = (ip + op.size()).checked_add_signed(isize::from(offset)).unwrap_or(0);
            format!("to {target}")
        }
        Operands::U8U8 => format!("{} {}", bytecode[ip + 1], bytecode[ip + 2]),
        Operands::U16U8 => {
            let first = read_u16(bytecode, ip + 1);
            let second = bytecode[ip + 3];
            match op {
                Opcode::MakeFunction => {
                    let child = code
                        .children
                        .get(usize::from(first))
                        .map_or("?", |child| child.qualname.as_str());
                    format!("{first} ({child}) flags={second}")
                }
                Opcode::ImportName => {
                    let name = code
                        .names
                        .get(usize::from(first))
                        .map_or("?", |name| interns.get_str(*name));
                    format!("{first} ({name}) {second}")
                }
                _ => format!("{first} {second}"),
            }
        }
    }
}

fn const_repr(constant: &Const, interns: &Interns) -> String {
    match constant {
        Const::None => "None".to_owned(),
        Const::Bool(true) => "True".to_owned(),
        Const::Bool(false) => "False".to_owned(),
        Const::Int(value) => value.to_string(),
        Const::BigInt(value) => value.to_string(),
        Const::Float(value) => float_repr(*value),
        Const::Str(id) => format!("{:?}", interns.get_str(*id)),
        Const::Bytes(bytes) => format!("b{:?}", String::from_utf8_lossy(bytes)),
        Const::Ellipsis => "Ellipsis".to_owned(),
        Const::Tuple(items) => {
            let items: Vec<String> = items.iter().map(|item| const_repr(item, interns)).collect();
            format!("({})", items.join(", "))
        }
        Const::Names(names) => {
            let names: Vec<&str> = names.iter().map(|name| interns.get_str(*name)).collect();
            format!("names{names:?}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::compiler::compile_module, parse::parse, prepare::prepare};

    fn listing(source: &str) -> String {
        let mut interns = Interns::new();
        let mut module = parse(source, &mut interns).unwrap();
        prepare(&mut module, &interns).unwrap();
        let code = compile_module(&module, &mut interns, 0).unwrap();
        disassemble(&code, &interns)
    }

    #[test]
    fn shows_names_and_constants() {
        let text = listing("x = 40 + 2\nprint(x)\n");
        assert!(text.starts_with("Disassembly of <module>:"));
        assert!(text.contains("LoadConst"));
        assert!(text.contains("(40)"));
        assert!(text.contains("(x)"));
        assert!(text.contains("BinaryOp"));
        assert!(text.contains("(+)"));
    }

    #[test]
    fn lists_children_and_handlers() {
        let text = listing("def f():\n    try:\n        pass\n    except ValueError:\n        pass\n");
        assert!(text.contains("Disassembly of f:"));
        assert!(text.contains("ExceptionTable:"));
        assert!(text.contains(">>"));
    }
}
