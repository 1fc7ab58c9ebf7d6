use inlinable_string::InlinableString;

use crate::asm::Chain;
use crate::backend::{Access, Backend, Width, LOCAL, MAX_HOST_ARGS, PARAM_BASE};
use crate::config::Limits;
use crate::error::{CompilerResult, ErrorKind};
use crate::lexer::{Lexer, Token};
use crate::ops::{OpClass, Prec};
use crate::program::{FunctionInfo, Program};
use crate::resolver::SymbolResolver;
use crate::symbols::{Keyword, Slot, SlotId, SymbolTable, SYM_DEFINE, SYM_FORWARD};
use crate::{format_err, format_err_nowhere};

/// Meaning of a slot value, as far as the expression parser cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Binding {
	Undefined,
	Macro,
	Frame(i32),
	Global(i32),
	Function(i32),
}

/// What a primary expression followed by `(` calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Callee {
	/// The value just computed, called indirectly.
	Value,
	/// A function of the program, defined already or not.
	Named(SlotId),
	Host(usize),
}

/// Single-pass compiler: parsing and code generation are the same walk
/// over the token stream, with forward references left as pending chains.
pub struct Compiler<'a> {
	lex: Lexer<'a>,
	back: Backend,
	resolver: Box<dyn SymbolResolver>,
	stack_size: usize,
	/// Bytes of locals allocated in the current function.
	loc: i32,
	/// Pending jumps to the current function's epilogue.
	rsym: Chain,
	/// Names first called before their definition, with the first call site.
	forward: Vec<(SlotId, usize)>,
	/// Slot values hidden by the current function's parameters and locals.
	shadowed: Vec<(SlotId, i32)>,
	locals: Vec<(InlinableString, i32)>,
	functions: Vec<FunctionInfo>,
}

impl<'a> Compiler<'a> {
	pub fn new(src: &'a str, limits: &Limits, resolver: Box<dyn SymbolResolver>) -> CompilerResult<Self> {
		let syms = SymbolTable::new(limits.heap)?;
		Ok(Compiler {
			lex: Lexer::new(src, syms, limits.macro_depth),
			back: Backend::new(limits)?,
			resolver,
			stack_size: limits.stack,
			loc: 0,
			rsym: Chain::EMPTY,
			forward: vec![],
			shadowed: vec![],
			locals: vec![],
			functions: vec![],
		})
	}

	pub fn compile(mut self) -> CompilerResult<Program> {
		self.next()?;
		while self.lex.tok != Token::Eof {
			if self.lex.tok.is_keyword(Keyword::Int) {
				self.next()?;
				self.globals()?;
			} else {
				let id = self.declared_name()?;
				self.function(id)?;
			}
		}

		for &(id, at) in &self.forward {
			if self.lex.syms.slot(id).aux != 0 {
				return format_err!(ErrorKind::UndefinedSymbol, at,
					"'{}' is called but never defined", self.lex.syms.name(id));
			}
		}
		let main = match self.binding(SlotId::MAIN) {
			Binding::Function(addr) => self.back.code_pos(addr),
			_ => return format_err_nowhere!(ErrorKind::UndefinedSymbol, "no 'main' function"),
		};
		let entry = self.back.entry_stub(main)?;
		tracing::debug!(code = self.back.pos(), functions = self.functions.len(), "compiled program");
		let (code, data) = self.back.finish()?;
		Program::new(code, data, entry, self.functions, self.stack_size)
	}

	fn next(&mut self) -> CompilerResult<()> {
		self.lex.next()
	}

	fn expected<T>(&self, what: &str) -> CompilerResult<T> {
		format_err!(ErrorKind::Syntax, self.lex.offset(), "{} expected", what)
	}

	fn skip(&mut self, c: char) -> CompilerResult<()> {
		if !self.lex.tok.is(c) {
			return self.expected(&format!("'{}'", c));
		}
		self.next()
	}

	/// Consume the identifier being declared.
	fn declared_name(&mut self) -> CompilerResult<SlotId> {
		match self.lex.tok {
			Token::Ident(id) if id.keyword().is_none() => {
				self.next()?;
				Ok(id)
			},
			_ => self.expected("identifier"),
		}
	}

	fn binding(&self, id: SlotId) -> Binding {
		let value = self.lex.syms.slot(id).value;
		match value {
			SYM_FORWARD => Binding::Undefined,
			SYM_DEFINE => Binding::Macro,
			v if v < LOCAL => Binding::Frame(v),
			v if self.back.is_code(v) => Binding::Function(v),
			v => Binding::Global(v),
		}
	}

	fn redefined<T>(&self, id: SlotId, at: usize) -> CompilerResult<T> {
		format_err!(ErrorKind::Syntax, at, "'{}' redefined", self.lex.syms.name(id))
	}

	/// Bind a parameter or local for the rest of the current function.
	fn bind_local(&mut self, id: SlotId, offset: i32) {
		let slot = self.lex.syms.slot_mut(id);
		if !self.shadowed.iter().any(|&(s, _)| s == id) {
			self.shadowed.push((id, slot.value));
		}
		slot.value = offset;
		self.locals.push((self.lex.syms.name(id).into(), offset));
	}

	fn expr(&mut self) -> CompilerResult<()> {
		self.sum(Prec::LOOSEST)
	}

	/// Evaluate a condition and jump to the returned chain when it is false.
	fn test_expr(&mut self) -> CompilerResult<Chain> {
		self.expr()?;
		self.back.test_jump(0, Chain::EMPTY)
	}

	fn sum(&mut self, level: Prec) -> CompilerResult<()> {
		let Some(tighter) = level.tighter() else {
			return self.unary(true);
		};
		self.sum(tighter)?;

		let mut pending = Chain::EMPTY;
		let mut when_set = 0;
		while let Token::Op(op) = self.lex.tok {
			if op.binary_prec() != Some(level) {
				break;
			}
			self.next()?;
			if level.is_logical() {
				// jump out as soon as the outcome is known
				when_set = op.code[0];
				pending = self.back.test_jump(when_set, pending)?;
				self.sum(tighter)?;
			} else {
				self.back.push_acc()?;
				self.sum(tighter)?;
				self.back.pop_secondary()?;
				if level.is_comparison() {
					self.back.compare(op.code[0])?;
				} else {
					self.back.emit(op.code)?;
				}
			}
		}

		if !pending.is_empty() {
			pending = self.back.test_jump(when_set, pending)?;
			self.back.load_imm((when_set ^ 1) as i32)?;
			self.back.jmp_over(5)?;
			self.back.code.resolve(pending);
			self.back.load_imm(when_set as i32)?;
		}
		Ok(())
	}

	fn unary(&mut self, allow_assign: bool) -> CompilerResult<()> {
		let start = self.lex.offset();
		let mut callee = Callee::Value;
		match self.lex.tok {
			Token::Punct('"') => self.string()?,
			Token::Num(n) => {
				self.next()?;
				self.back.load_imm(n)?;
			},
			Token::Op(op) if op.is_prefix() => {
				self.next()?;
				self.unary(false)?;
				self.back.clear_secondary()?;
				if op.class == OpClass::Unary && op.is_single('!') {
					self.back.compare(op.code[0])?;
				} else {
					self.back.emit(op.code)?;
				}
			},
			Token::Punct('(') => {
				self.next()?;
				self.expr()?;
				self.skip(')')?;
			},
			tok if tok.is('*') => self.cast()?,
			tok if tok.is('&') => {
				self.next()?;
				let at = self.lex.offset();
				let id = self.declared_name()?;
				match self.binding(id) {
					Binding::Frame(v) | Binding::Global(v) | Binding::Function(v) => self.back.access(Access::Addr, v)?,
					_ => return self.undefined(id, at),
				}
			},
			Token::Ident(id) if id.keyword().is_none() => {
				self.next()?;
				callee = self.identifier(id, allow_assign, start)?;
			},
			_ => return self.expected("expression"),
		}

		if self.lex.tok.is('(') {
			self.call(callee, start)?;
		}
		Ok(())
	}

	fn undefined<T>(&self, id: SlotId, at: usize) -> CompilerResult<T> {
		format_err!(ErrorKind::UndefinedSymbol, at, "'{}' undeclared", self.lex.syms.name(id))
	}

	/// A name in expression position: load, store, step, or the target of
	/// a call that follows.
	fn identifier(&mut self, id: SlotId, allow_assign: bool, start: usize) -> CompilerResult<Callee> {
		let calling = self.lex.tok.is('(');
		let value = match self.binding(id) {
			Binding::Undefined | Binding::Macro => {
				let host = self.resolver.resolve(self.lex.syms.name(id));
				return match host {
					Some(addr) if calling => Ok(Callee::Host(addr)),
					Some(_) => format_err!(ErrorKind::Syntax, start,
						"host symbol '{}' can only be called", self.lex.syms.name(id)),
					None if calling => Ok(Callee::Named(id)),
					None => self.undefined(id, start),
				};
			},
			Binding::Function(addr) => {
				if calling {
					return Ok(Callee::Named(id));
				}
				if allow_assign && self.lex.tok.is('=') {
					return format_err!(ErrorKind::Syntax, start,
						"cannot assign to function '{}'", self.lex.syms.name(id));
				}
				self.back.load_imm(addr)?;
				return Ok(Callee::Value);
			},
			Binding::Frame(v) | Binding::Global(v) => v,
		};

		if allow_assign && self.lex.tok.is('=') {
			self.next()?;
			self.expr()?;
			self.back.access(Access::Store, value)?;
		} else {
			self.back.access(Access::Load, value)?;
			if let Token::Op(op) = self.lex.tok {
				if op.class == OpClass::Step {
					self.back.access(Access::Step(op.code[0]), value)?;
					self.next()?;
				}
			}
		}
		Ok(Callee::Value)
	}

	/// `*(int*)e`, `*(char*)e` and `*(int(*)())e`, optionally stored through.
	fn cast(&mut self) -> CompilerResult<()> {
		self.next()?;
		self.skip('(')?;
		let width = if self.lex.tok.is_keyword(Keyword::Int) { Width::Word } else { Width::Byte };
		if !matches!(self.lex.tok, Token::Ident(_)) {
			return self.expected("type name");
		}
		self.next()?;
		let function = self.lex.tok.is('(');
		if function {
			self.next()?;
			self.skip('*')?;
			self.skip(')')?;
			self.skip('(')?;
			self.skip(')')?;
		} else {
			self.skip('*')?;
		}
		self.skip(')')?;
		self.unary(false)?;

		if self.lex.tok.is('=') {
			if function {
				return format_err!(ErrorKind::Syntax, self.lex.offset(), "cannot store through a function pointer");
			}
			self.next()?;
			self.back.push_acc()?;
			self.expr()?;
			self.back.pop_secondary()?;
			self.back.store_through(width)?;
		} else if !function {
			self.back.deref(width)?;
		}
		Ok(())
	}

	/// String literal: copied into the data region, its address loaded.
	fn string(&mut self) -> CompilerResult<()> {
		let addr = self.back.data_addr();
		self.back.load_imm(addr)?;
		while self.lex.ch() != Some('"') {
			let Some(c) = self.lex.escaped() else {
				return format_err!(ErrorKind::Syntax, self.lex.offset(), "unterminated string literal");
			};
			let mut buf = [0; 4];
			for &b in c.encode_utf8(&mut buf).as_bytes() {
				self.back.push_data(b)?;
			}
			self.lex.inp();
		}
		self.back.push_data(0)?;
		self.back.align_data()?;
		self.lex.inp();
		self.next()
	}

	fn call(&mut self, callee: Callee, start: usize) -> CompilerResult<()> {
		if callee == Callee::Value {
			self.back.push_acc()?;
		}
		let area = self.back.reserve_args()?;
		self.next()?;
		let mut nargs = 0;
		while !self.lex.tok.is(')') {
			self.expr()?;
			self.back.store_arg(nargs)?;
			nargs += 1;
			if self.lex.tok.is(',') {
				self.next()?;
			} else if !self.lex.tok.is(')') {
				return self.expected("',' or ')'");
			}
		}
		self.next()?;
		let mut bytes = 4 * nargs as i32;
		self.back.end_args(area, bytes);

		match callee {
			Callee::Value => {
				self.back.call_indirect(bytes)?;
				bytes += 8;
			},
			Callee::Named(id) => match self.binding(id) {
				Binding::Function(addr) => self.back.call_direct(addr)?,
				_ => {
					let pending = Chain::from_raw(self.lex.syms.slot(id).aux);
					if pending.is_empty() {
						self.forward.push((id, start));
					}
					let pending = self.back.call_pending(pending)?;
					self.lex.syms.slot_mut(id).aux = pending.raw();
					tracing::trace!(name = self.lex.syms.name(id), "forward call");
				},
			},
			Callee::Host(addr) => {
				if nargs > MAX_HOST_ARGS {
					return format_err!(ErrorKind::Syntax, start,
						"host functions take at most {} arguments", MAX_HOST_ARGS);
				}
				self.back.call_host(addr, nargs)?;
			},
		}
		self.back.release_args(bytes)
	}

	fn block(&mut self, mut brk: Option<&mut Chain>) -> CompilerResult<()> {
		let tok = self.lex.tok;
		if tok.is_keyword(Keyword::If) {
			self.next()?;
			self.skip('(')?;
			let otherwise = self.test_expr()?;
			self.skip(')')?;
			self.block(brk.as_deref_mut())?;
			if self.lex.tok.is_keyword(Keyword::Else) {
				self.next()?;
				let over = self.back.jmp(Chain::EMPTY)?;
				self.back.code.resolve(otherwise);
				self.block(brk)?;
				self.back.code.resolve(over);
			} else {
				self.back.code.resolve(otherwise);
			}
		} else if tok.is_keyword(Keyword::While) || tok.is_keyword(Keyword::For) {
			self.next()?;
			self.skip('(')?;
			let mut top;
			let mut exit = Chain::EMPTY;
			if tok.is_keyword(Keyword::While) {
				top = self.back.pos();
				exit = self.test_expr()?;
			} else {
				if !self.lex.tok.is(';') {
					self.expr()?;
				}
				self.skip(';')?;
				top = self.back.pos();
				if !self.lex.tok.is(';') {
					exit = self.test_expr()?;
				}
				self.skip(';')?;
				if !self.lex.tok.is(')') {
					// the step runs after the body, which jumps back to it
					let over = self.back.jmp(Chain::EMPTY)?;
					let step = self.back.pos();
					self.expr()?;
					self.back.jump_back(top)?;
					self.back.code.resolve(over);
					top = step;
				}
			}
			self.skip(')')?;
			self.block(Some(&mut exit))?;
			self.back.jump_back(top)?;
			self.back.code.resolve(exit);
		} else if tok.is('{') {
			self.next()?;
			self.local_decls()?;
			while !self.lex.tok.is('}') {
				if self.lex.tok == Token::Eof {
					return self.expected("'}'");
				}
				self.block(brk.as_deref_mut())?;
			}
			self.next()?;
		} else {
			if tok.is_keyword(Keyword::Return) {
				self.next()?;
				if !self.lex.tok.is(';') {
					self.expr()?;
				}
				self.rsym = self.back.jmp(self.rsym)?;
			} else if tok.is_keyword(Keyword::Break) {
				let Some(exit) = brk else {
					return format_err!(ErrorKind::Syntax, self.lex.offset(), "'break' outside a loop");
				};
				self.next()?;
				*exit = self.back.jmp(*exit)?;
			} else if !tok.is(';') {
				self.expr()?;
			}
			self.skip(';')?;
		}
		Ok(())
	}

	fn local_decls(&mut self) -> CompilerResult<()> {
		while self.lex.tok.is_keyword(Keyword::Int) {
			self.next()?;
			loop {
				let id = self.declared_name()?;
				self.loc += 4;
				self.bind_local(id, -self.loc);
				if !self.lex.tok.is(',') {
					break;
				}
				self.next()?;
			}
			self.skip(';')?;
		}
		Ok(())
	}

	/// Top-level declaration after `int`: globals, or a function definition.
	fn globals(&mut self) -> CompilerResult<()> {
		let mut at = self.lex.offset();
		let mut id = self.declared_name()?;
		if self.lex.tok.is('(') {
			return self.function(id);
		}
		loop {
			if self.binding(id) != Binding::Undefined {
				return self.redefined(id, at);
			}
			let addr = self.back.alloc_global()?;
			self.lex.syms.slot_mut(id).value = addr;
			if !self.lex.tok.is(',') {
				break;
			}
			self.next()?;
			at = self.lex.offset();
			id = self.declared_name()?;
		}
		self.skip(';')
	}

	fn function(&mut self, id: SlotId) -> CompilerResult<()> {
		if self.binding(id) != Binding::Undefined {
			return self.redefined(id, self.lex.offset());
		}
		let entry = self.back.pos();
		let pending = Chain::from_raw(self.lex.syms.slot(id).aux);
		self.back.code.resolve(pending);
		let addr = self.back.code_addr(entry);
		*self.lex.syms.slot_mut(id) = Slot { value: addr, aux: 0 };

		self.skip('(')?;
		let mut params = 0;
		while !self.lex.tok.is(')') {
			if self.lex.tok.is_keyword(Keyword::Int) {
				self.next()?;
			}
			let param = self.declared_name()?;
			let offset = PARAM_BASE + 4 * params as i32;
			if offset >= LOCAL {
				return format_err!(ErrorKind::ResourceExhausted, self.lex.offset(), "too many parameters");
			}
			self.bind_local(param, offset);
			params += 1;
			if self.lex.tok.is(',') {
				self.next()?;
			} else if !self.lex.tok.is(')') {
				return self.expected("',' or ')'");
			}
		}
		self.next()?;

		self.loc = 0;
		self.rsym = Chain::EMPTY;
		let frame = self.back.prologue()?;
		self.block(None)?;
		self.back.code.resolve(self.rsym);
		self.back.epilogue()?;
		self.back.code.patch(frame, self.loc);

		for (slot, value) in self.shadowed.drain(..).rev() {
			self.lex.syms.slot_mut(slot).value = value;
		}
		let info = FunctionInfo {
			name: self.lex.syms.name(id).into(),
			entry,
			frame_size: self.loc,
			params,
			locals: std::mem::take(&mut self.locals),
		};
		tracing::debug!(name = %info.name, entry, frame_size = info.frame_size, params, "compiled function");
		self.functions.push(info);
		Ok(())
	}
}

/// Compile `src` into a program ready to run.
pub fn compile(src: &str, limits: &Limits, resolver: Box<dyn SymbolResolver>) -> CompilerResult<Program> {
	Compiler::new(src, limits, resolver)?.compile()
}

/// Like `compile`, for source that has not been decoded yet. A byte
/// sequence that is not UTF-8 is a syntax error at the offending byte.
pub fn compile_bytes(src: &[u8], limits: &Limits, resolver: Box<dyn SymbolResolver>) -> CompilerResult<Program> {
	match std::str::from_utf8(src) {
		Ok(src) => compile(src, limits, resolver),
		Err(err) => format_err!(ErrorKind::Syntax, err.valid_up_to() + 1,
			"invalid byte 0x{:02x} in source", src[err.valid_up_to()]),
	}
}
