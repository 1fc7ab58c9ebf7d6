use inlinable_string::{InlinableString, StringExt};
use unicode_xid::UnicodeXID;

use crate::error::{CompilerResult, ErrorKind};
use crate::ops::{self, OpEntry};
use crate::symbols::{Keyword, SlotId, SymbolTable, SYM_DEFINE, TAG_MACRO};
use crate::{format_err, format_err_nowhere};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
	Eof,
	Num(i32),
	/// Identifier or keyword.
	Ident(SlotId),
	Op(&'static OpEntry),
	Punct(char),
}

impl Token {
	/// True for the single character `c`, whether or not it is a table operator.
	pub fn is(&self, c: char) -> bool {
		match self {
			Token::Punct(p) => *p == c,
			Token::Op(op) => op.is_single(c),
			_ => false,
		}
	}

	pub fn is_keyword(&self, kw: Keyword) -> bool {
		*self == Token::Ident(kw.slot())
	}
}

/// A macro body being read: where we are in the heap, and the lookahead
/// character to restore once the body is exhausted.
struct Expansion {
	pos: usize,
	saved: Option<char>,
}

pub struct Lexer<'a> {
	rest: &'a str,
	offset: usize,
	ch: Option<char>,
	expansions: Vec<Expansion>,
	max_depth: usize,
	pub syms: SymbolTable,
	pub tok: Token,
}

fn is_ident_char(c: char) -> bool {
	c == '_' || c.is_xid_continue()
}

/// Integer literal in C notation: decimal, `0x` hex or leading-zero octal.
fn parse_number(text: &str) -> Option<i32> {
	let (digits, radix) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
		(hex, 16)
	} else if text.len() > 1 && text.starts_with('0') {
		(&text[1..], 8)
	} else {
		(text, 10)
	};
	if digits.is_empty() {
		return None;
	}
	u32::from_str_radix(digits, radix).ok().map(|v| v as i32)
}

impl<'a> Lexer<'a> {
	pub fn new(src: &'a str, syms: SymbolTable, max_depth: usize) -> Self {
		let mut lex = Lexer {
			rest: src,
			offset: 0,
			ch: None,
			expansions: vec![],
			max_depth,
			syms,
			tok: Token::Eof,
		};
		lex.inp(); // prime ch
		lex
	}

	/// Bytes of source consumed so far.
	pub fn offset(&self) -> usize {
		self.offset
	}

	pub fn ch(&self) -> Option<char> {
		self.ch
	}

	pub fn inp(&mut self) {
		if let Some(exp) = self.expansions.last_mut() {
			if self.syms.byte_at(exp.pos) == TAG_MACRO {
				self.ch = exp.saved;
				self.expansions.pop();
			} else {
				let (c, len) = self.syms.char_at(exp.pos);
				exp.pos += len;
				self.ch = Some(c);
			}
			return;
		}
		self.ch = self.rest.chars().next();
		if let Some(c) = self.ch {
			self.rest = &self.rest[c.len_utf8()..];
			self.offset += c.len_utf8();
		}
	}

	/// Current character of a quoted literal, translating `\n`.
	pub fn escaped(&mut self) -> Option<char> {
		if self.ch == Some('\\') {
			self.inp();
			if self.ch == Some('n') {
				return Some('\n');
			}
		}
		self.ch
	}

	pub fn next(&mut self) -> CompilerResult<()> {
		self.lex(true)
	}

	fn directive(&mut self) -> CompilerResult<()> {
		self.inp(); // '#'
		self.lex(false)?;
		let target = if self.tok.is_keyword(Keyword::Define) {
			self.lex(false)?;
			match self.tok {
				Token::Ident(id) if id.keyword().is_none() => Some(id),
				_ => return format_err!(ErrorKind::Syntax, self.offset, "macro name expected"),
			}
		} else {
			None
		};

		let body = self.syms.len();
		while let Some(c) = self.ch {
			if c == '\n' {
				break;
			}
			self.syms.push_macro_char(c)?;
			self.inp();
		}
		self.syms.push_macro_byte(b'\n')?;
		self.syms.push_macro_byte(TAG_MACRO)?;

		match target {
			Some(id) => {
				let slot = self.syms.slot_mut(id);
				slot.value = SYM_DEFINE;
				slot.aux = body as i32;
				tracing::trace!(name = self.syms.name(id), body, "defined macro");
			},
			None => tracing::debug!(offset = self.offset, "ignoring preprocessor directive"),
		}
		self.inp(); // '\n'
		Ok(())
	}

	fn skip_comment(&mut self) -> CompilerResult<()> {
		self.inp(); // '*'
		loop {
			match self.ch {
				None => return format_err!(ErrorKind::Syntax, self.offset, "unterminated comment"),
				Some('*') => {
					self.inp();
					if self.ch == Some('/') {
						self.inp();
						return Ok(());
					}
				},
				Some(_) => self.inp(),
			}
		}
	}

	fn lex(&mut self, expand: bool) -> CompilerResult<()> {
		loop {
			while let Some(c) = self.ch {
				if c == '#' {
					self.directive()?;
				} else if c.is_whitespace() {
					self.inp();
				} else {
					break;
				}
			}
			let Some(c) = self.ch else {
				self.tok = Token::Eof;
				return Ok(());
			};

			if is_ident_char(c) {
				let start = self.offset;
				let mut text = InlinableString::new();
				while let Some(c) = self.ch.filter(|&c| is_ident_char(c)) {
					text.push(c);
					self.inp();
				}
				if c.is_ascii_digit() {
					self.tok = match parse_number(&text) {
						Some(n) => Token::Num(n),
						None => return format_err!(ErrorKind::Syntax, start, "malformed number '{}'", text),
					};
					return Ok(());
				}
				let id = self.syms.intern(&text)?;
				if expand && id.keyword().is_none() && self.syms.slot(id).value == SYM_DEFINE {
					if self.expansions.len() >= self.max_depth {
						return format_err_nowhere!(ErrorKind::ResourceExhausted,
							"macro expansion nested more than {} deep", self.max_depth);
					}
					let pos = self.syms.slot(id).aux as usize;
					self.expansions.push(Expansion { pos, saved: self.ch });
					self.inp();
					continue;
				}
				self.tok = Token::Ident(id);
				return Ok(());
			}

			self.inp();
			if c == '\'' {
				let Some(value) = self.escaped() else {
					return format_err!(ErrorKind::Syntax, self.offset, "unterminated character literal");
				};
				self.inp();
				if self.ch != Some('\'') {
					return format_err!(ErrorKind::Syntax, self.offset, "''' expected");
				}
				self.inp();
				self.tok = Token::Num(value as i32);
			} else if c == '/' && self.ch == Some('*') {
				self.skip_comment()?;
				continue;
			} else if let Some(op) = ops::lookup(c, self.ch) {
				if op.follow.is_some() {
					self.inp();
				}
				self.tok = Token::Op(op);
			} else {
				self.tok = Token::Punct(c);
			}
			return Ok(());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ops::{OpClass, Prec};

	fn lexer(src: &str) -> Lexer<'_> {
		Lexer::new(src, SymbolTable::new(4096).unwrap(), 8)
	}

	fn tokens(lex: &mut Lexer<'_>) -> Vec<Token> {
		let mut toks = vec![];
		loop {
			lex.next().unwrap();
			if lex.tok == Token::Eof {
				return toks;
			}
			toks.push(lex.tok);
		}
	}

	fn num(lex: &mut Lexer<'_>) -> i32 {
		lex.next().unwrap();
		match lex.tok {
			Token::Num(n) => n,
			tok => panic!("expected number, got {:?}", tok),
		}
	}

	#[test]
	fn keywords_identifiers_and_punctuation() {
		let mut lex = lexer("if (x) return y;");
		let toks = tokens(&mut lex);
		assert_eq!(toks.len(), 7);
		assert!(toks[0].is_keyword(Keyword::If));
		assert!(toks[1].is('('));
		let Token::Ident(x) = toks[2] else { panic!() };
		assert_eq!(lex.syms.name(x), "x");
		assert!(toks[3].is(')'));
		assert!(toks[4].is_keyword(Keyword::Return));
		assert!(toks[6].is(';'));
	}

	#[test]
	fn numbers_in_c_notation() {
		let mut lex = lexer("42 0x1F 017 0 'a' '\\n' 4294967295");
		assert_eq!(num(&mut lex), 42);
		assert_eq!(num(&mut lex), 31);
		assert_eq!(num(&mut lex), 15);
		assert_eq!(num(&mut lex), 0);
		assert_eq!(num(&mut lex), 'a' as i32);
		assert_eq!(num(&mut lex), '\n' as i32);
		assert_eq!(num(&mut lex), -1);
	}

	#[test]
	fn malformed_number() {
		let mut lex = lexer("  12ab");
		let err = lex.next().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Syntax);
		assert_eq!(err.offset(), Some(3));
	}

	#[test]
	fn operators_prefer_two_characters() {
		let mut lex = lexer("a<<=b&&c=d++");
		let toks = tokens(&mut lex);
		let Token::Op(shl) = toks[1] else { panic!() };
		assert_eq!(shl.class, OpClass::Binary(Prec::Shift));
		assert!(toks[2].is('='));
		let Token::Op(and) = toks[4] else { panic!() };
		assert_eq!(and.class, OpClass::Binary(Prec::LogAnd));
		assert!(toks[6].is('='));
		let Token::Op(step) = toks[8] else { panic!() };
		assert_eq!(step.class, OpClass::Step);
		assert_eq!(toks.len(), 9);
	}

	#[test]
	fn comments_are_skipped() {
		let mut lex = lexer("1 /* two * / */ 3");
		assert_eq!(num(&mut lex), 1);
		assert_eq!(num(&mut lex), 3);
	}

	#[test]
	fn unterminated_comment() {
		let mut lex = lexer("1 /* never closed");
		assert_eq!(num(&mut lex), 1);
		let err = lex.next().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Syntax);
		assert!(err.message().contains("comment"));
	}

	#[test]
	fn macros_expand_in_place() {
		let mut lex = lexer("#define N 5\nN*N;");
		assert_eq!(num(&mut lex), 5);
		lex.next().unwrap();
		assert!(lex.tok.is('*'));
		assert_eq!(num(&mut lex), 5);
		lex.next().unwrap();
		assert!(lex.tok.is(';'));
	}

	#[test]
	fn nested_macros_expand() {
		let mut lex = lexer("#define A 1 + B\n#define B 2\nA;");
		let toks = tokens(&mut lex);
		assert_eq!(toks.len(), 4);
		assert_eq!(toks[0], Token::Num(1));
		assert!(toks[1].is('+'));
		assert_eq!(toks[2], Token::Num(2));
		assert!(toks[3].is(';'));
	}

	#[test]
	fn recursive_macro_is_bounded() {
		let mut lex = lexer("#define LOOP LOOP\nLOOP");
		let err = lex.next().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
	}

	#[test]
	fn other_directives_are_ignored() {
		let mut lex = lexer("#include <stdio.h>\n7");
		assert_eq!(num(&mut lex), 7);
	}

	#[test]
	fn offset_counts_source_bytes() {
		let mut lex = lexer("ab  cd");
		lex.next().unwrap();
		assert_eq!(lex.offset(), 3);
		lex.next().unwrap();
		assert_eq!(lex.offset(), 6);
	}

	#[test]
	fn unicode_identifiers() {
		let mut lex = lexer("größe");
		lex.next().unwrap();
		let Token::Ident(id) = lex.tok else { panic!() };
		assert_eq!(lex.syms.name(id), "größe");
	}
}
