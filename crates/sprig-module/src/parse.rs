//! Binary decoding on top of `wasmparser`.

use std::rc::Rc;

use sprig_types::{FuncType, ValueType};
use wasmparser::{
    ConstExpr, DataKind, ElementItems, ElementKind, ExternalKind, Operator, Parser, Payload,
    TypeRef, ValType,
};

use crate::module::{
    DataSegment, ElementSegment, Export, ExportKind, FunctionBody, FunctionDecl, GlobalDecl,
    ImportName, InitExpr, Limits,
};
use crate::{Module, ParseError, ParseResult};

impl Module {
    /// Validate and decode `bytes`.
    pub fn parse(name: &str, bytes: impl Into<Rc<[u8]>>) -> ParseResult<Module> {
        let bytes: Rc<[u8]> = bytes.into();
        wasmparser::validate(&bytes)?;

        let mut module = Module::empty(name, Rc::clone(&bytes));
        let mut next_body = 0usize;

        for payload in Parser::new(0).parse_all(&bytes) {
            match payload? {
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        let ty = ty?;
                        let params = value_types(ty.params())?;
                        let results = value_types(ty.results())?;
                        module.types.push(FuncType::new(params, results));
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import?;
                        let import_name = ImportName {
                            module: import.module.to_string(),
                            name: import.name.to_string(),
                        };
                        match import.ty {
                            TypeRef::Func(type_index) => {
                                module.functions.push(FunctionDecl {
                                    type_index,
                                    body: None,
                                    import: Some(import_name),
                                    export_names: Vec::new(),
                                });
                                module.num_imported_functions += 1;
                            }
                            _ => {
                                return Err(ParseError::Unsupported(format!(
                                    "non-function import {import_name}"
                                )))
                            }
                        }
                    }
                }
                Payload::FunctionSection(reader) => {
                    for type_index in reader {
                        module.functions.push(FunctionDecl {
                            type_index: type_index?,
                            body: None,
                            import: None,
                            export_names: Vec::new(),
                        });
                    }
                }
                Payload::TableSection(reader) => {
                    for table in reader {
                        let table = table?;
                        if module.table.is_some() {
                            return Err(ParseError::Unsupported("multiple tables".into()));
                        }
                        module.table = Some(Limits {
                            initial: narrow(table.ty.initial, "table size")?,
                            maximum: table.ty.maximum.map(|m| narrow(m, "table size")).transpose()?,
                        });
                    }
                }
                Payload::MemorySection(reader) => {
                    for memory in reader {
                        let memory = memory?;
                        if module.memory.is_some() {
                            return Err(ParseError::Unsupported("multiple memories".into()));
                        }
                        if memory.memory64 || memory.shared {
                            return Err(ParseError::Unsupported("64-bit or shared memory".into()));
                        }
                        module.memory = Some(Limits {
                            initial: narrow(memory.initial, "memory size")?,
                            maximum: memory.maximum.map(|m| narrow(m, "memory size")).transpose()?,
                        });
                    }
                }
                Payload::GlobalSection(reader) => {
                    for global in reader {
                        let global = global?;
                        module.globals.push(GlobalDecl {
                            ty: value_type(global.ty.content_type)?,
                            mutable: global.ty.mutable,
                            init: init_expr(&global.init_expr)?,
                        });
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export?;
                        let kind = match export.kind {
                            ExternalKind::Func => ExportKind::Function,
                            ExternalKind::Table => ExportKind::Table,
                            ExternalKind::Memory => ExportKind::Memory,
                            ExternalKind::Global => ExportKind::Global,
                            _ => continue,
                        };
                        if kind == ExportKind::Function {
                            if let Some(func) = module.functions.get_mut(export.index as usize) {
                                func.export_names.push(export.name.to_string());
                            }
                        }
                        module.exports.push(Export {
                            name: export.name.to_string(),
                            kind,
                            index: export.index,
                        });
                    }
                }
                Payload::StartSection { func, .. } => module.start = Some(func),
                Payload::ElementSection(reader) => {
                    for element in reader {
                        let element = element?;
                        let ElementKind::Active { offset_expr, .. } = element.kind else {
                            continue;
                        };
                        let mut functions = Vec::new();
                        match element.items {
                            ElementItems::Functions(items) => {
                                for index in items {
                                    functions.push(Some(index?));
                                }
                            }
                            ElementItems::Expressions(_, items) => {
                                for expr in items {
                                    functions.push(match init_expr(&expr?)? {
                                        InitExpr::RefFunc(index) => Some(index),
                                        _ => None,
                                    });
                                }
                            }
                        }
                        module.elements.push(ElementSegment {
                            offset: init_expr(&offset_expr)?,
                            functions,
                        });
                    }
                }
                Payload::DataSection(reader) => {
                    for data in reader {
                        let data = data?;
                        if let DataKind::Active { offset_expr, .. } = data.kind {
                            module.data.push(DataSegment {
                                offset: init_expr(&offset_expr)?,
                                bytes: data.data.to_vec(),
                            });
                        }
                    }
                }
                Payload::CodeSectionEntry(body) => {
                    let mut locals_reader = body.get_locals_reader()?;
                    let mut locals = Vec::new();
                    for _ in 0..locals_reader.get_count() {
                        let (count, ty) = locals_reader.read()?;
                        locals.push((count, value_type(ty)?));
                    }
                    let code_start = locals_reader.original_position();
                    let index = module.num_imported_functions as usize + next_body;
                    let func = module.functions.get_mut(index).ok_or(ParseError::IndexOutOfBounds {
                        space: "functions",
                        index: index as u32,
                    })?;
                    func.body = Some(FunctionBody {
                        range: body.range(),
                        code_start,
                        locals,
                    });
                    next_body += 1;
                }
                _ => {}
            }
        }

        tracing::debug!(
            target: "sprig.module",
            name,
            fingerprint = %module.short_fingerprint(),
            functions = module.functions.len(),
            imports = module.num_imported_functions,
            "module parsed"
        );
        Ok(module)
    }
}

fn narrow(value: u64, what: &str) -> ParseResult<u32> {
    u32::try_from(value).map_err(|_| ParseError::Unsupported(format!("{what} {value} exceeds 32 bits")))
}

fn value_type(ty: ValType) -> ParseResult<ValueType> {
    match ty {
        ValType::I32 => Ok(ValueType::I32),
        ValType::I64 => Ok(ValueType::I64),
        ValType::F32 => Ok(ValueType::F32),
        ValType::F64 => Ok(ValueType::F64),
        other => Err(ParseError::Unsupported(format!("value type {other:?}"))),
    }
}

fn value_types(types: &[ValType]) -> ParseResult<Vec<ValueType>> {
    types.iter().map(|&ty| value_type(ty)).collect()
}

fn init_expr(expr: &ConstExpr<'_>) -> ParseResult<InitExpr> {
    let mut reader = expr.get_operators_reader();
    let value = match reader.read()? {
        Operator::I32Const { value } => InitExpr::I32(value),
        Operator::I64Const { value } => InitExpr::I64(value),
        Operator::F32Const { value } => InitExpr::F32(value.bits()),
        Operator::F64Const { value } => InitExpr::F64(value.bits()),
        Operator::GlobalGet { global_index } => InitExpr::GlobalGet(global_index),
        Operator::RefNull { .. } => InitExpr::RefNull,
        Operator::RefFunc { function_index } => InitExpr::RefFunc(function_index),
        _ => return Err(ParseError::Unsupported("extended constant expression".into())),
    };
    match reader.read()? {
        Operator::End => Ok(value),
        _ => Err(ParseError::Unsupported("extended constant expression".into())),
    }
}
