use num_enum::TryFromPrimitive;

use crate::error::{CompilerResult, ErrorKind};
use crate::format_err_nowhere;

/// Delimits interned identifiers in the heap.
pub const TAG_TOK: u8 = b' ';
/// Ends a macro body in the heap.
pub const TAG_MACRO: u8 = 2;

/// Initial heap contents: keyword slots are the positions of these words.
const KEYWORDS: &str = " int if else while break return for define main ";

/// `value` of a name that has not been defined yet.
pub const SYM_FORWARD: i32 = 0;
/// `value` of a macro; `aux` then holds the heap position of its body.
pub const SYM_DEFINE: i32 = 1;

/// Heap position of an identifier's leading tag, used as its slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Keyword {
	Int = 0,
	If = 4,
	Else = 7,
	While = 12,
	Break = 18,
	Return = 24,
	For = 31,
	Define = 35,
}

impl Keyword {
	pub fn slot(self) -> SlotId {
		SlotId(self as u32)
	}
}

impl SlotId {
	/// Slot of the program entry point.
	pub const MAIN: SlotId = SlotId(42);

	pub fn keyword(self) -> Option<Keyword> {
		Keyword::try_from(self.0).ok()
	}
}

/// What a slot currently means is decided by whoever reads it: a frame
/// offset, a global or code address, the macro mark, or nothing yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Slot {
	pub value: i32,
	pub aux: i32,
}

pub struct SymbolTable {
	heap: Vec<u8>,
	slots: Vec<Slot>,
	capacity: usize,
}

impl SymbolTable {
	pub fn new(capacity: usize) -> CompilerResult<SymbolTable> {
		if capacity < KEYWORDS.len() {
			return format_err_nowhere!(ErrorKind::ResourceExhausted,
				"symbol heap of {} bytes cannot hold the keywords", capacity);
		}
		let mut heap = Vec::with_capacity(capacity);
		heap.extend_from_slice(KEYWORDS.as_bytes());
		Ok(SymbolTable { heap, slots: vec![Slot::default(); capacity], capacity })
	}

	fn reserve(&self, n: usize) -> CompilerResult<()> {
		if self.heap.len() + n > self.capacity {
			format_err_nowhere!(ErrorKind::ResourceExhausted,
				"symbol heap is full ({} bytes)", self.capacity)
		} else {
			Ok(())
		}
	}

	pub fn intern(&mut self, name: &str) -> CompilerResult<SlotId> {
		let mut needle = Vec::with_capacity(name.len() + 2);
		needle.push(TAG_TOK);
		needle.extend_from_slice(name.as_bytes());
		needle.push(TAG_TOK);
		if let Some(pos) = self.heap.windows(needle.len()).position(|w| w == needle) {
			return Ok(SlotId(pos as u32));
		}

		// reuse the closing tag of the previous identifier when there is one
		let shared = self.heap.last() == Some(&TAG_TOK);
		self.reserve(needle.len() - shared as usize)?;
		let pos = if shared {
			self.heap.len() - 1
		} else {
			self.heap.push(TAG_TOK);
			self.heap.len() - 1
		};
		self.heap.extend_from_slice(&needle[1..]);
		Ok(SlotId(pos as u32))
	}

	pub fn slot(&self, id: SlotId) -> &Slot {
		&self.slots[id.0 as usize]
	}

	pub fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
		&mut self.slots[id.0 as usize]
	}

	pub fn name(&self, id: SlotId) -> &str {
		let start = id.0 as usize + 1;
		let len = self.heap[start..].iter()
			.position(|&b| b == TAG_TOK || b == TAG_MACRO || b == b'\n')
			.unwrap_or(self.heap.len() - start);
		std::str::from_utf8(&self.heap[start..start + len]).unwrap_or("?")
	}

	pub fn len(&self) -> usize {
		self.heap.len()
	}

	pub fn push_macro_byte(&mut self, b: u8) -> CompilerResult<()> {
		self.reserve(1)?;
		self.heap.push(b);
		Ok(())
	}

	pub fn push_macro_char(&mut self, c: char) -> CompilerResult<()> {
		let mut buf = [0; 4];
		for &b in c.encode_utf8(&mut buf).as_bytes() {
			self.push_macro_byte(b)?;
		}
		Ok(())
	}

	/// Decode the character stored at `pos`, with its encoded length.
	pub fn char_at(&self, pos: usize) -> (char, usize) {
		let len = match self.heap[pos] {
			0x00..=0x7f => 1,
			0xc0..=0xdf => 2,
			0xe0..=0xef => 3,
			_ => 4,
		};
		let end = (pos + len).min(self.heap.len());
		let c = std::str::from_utf8(&self.heap[pos..end]).ok()
			.and_then(|s| s.chars().next())
			.unwrap_or(char::REPLACEMENT_CHARACTER);
		(c, len)
	}

	pub fn byte_at(&self, pos: usize) -> u8 {
		self.heap[pos]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keywords_occupy_fixed_slots() {
		let mut syms = SymbolTable::new(1024).unwrap();
		for (word, kw) in [
			("int", Keyword::Int), ("if", Keyword::If), ("else", Keyword::Else),
			("while", Keyword::While), ("break", Keyword::Break), ("return", Keyword::Return),
			("for", Keyword::For), ("define", Keyword::Define),
		] {
			let id = syms.intern(word).unwrap();
			assert_eq!(id, kw.slot());
			assert_eq!(id.keyword(), Some(kw));
		}
		assert_eq!(syms.intern("main").unwrap(), SlotId::MAIN);
		assert_eq!(SlotId::MAIN.keyword(), None);
	}

	#[test]
	fn interning_is_idempotent_and_position_addressed() {
		let mut syms = SymbolTable::new(1024).unwrap();
		let before = syms.len();
		let a = syms.intern("alpha").unwrap();
		assert_eq!(a, SlotId(before as u32 - 1));
		let b = syms.intern("beta").unwrap();
		assert_eq!(b, SlotId(a.0 + 6));
		assert_eq!(syms.intern("alpha").unwrap(), a);
		assert_eq!(syms.len(), before + "alpha beta ".len());
		assert_eq!(syms.name(a), "alpha");
		assert_eq!(syms.name(b), "beta");
		// a prefix of an existing name is still a distinct entry
		let al = syms.intern("al").unwrap();
		assert_ne!(al, a);
		assert_eq!(syms.name(al), "al");
	}

	#[test]
	fn slots_are_independent() {
		let mut syms = SymbolTable::new(1024).unwrap();
		let x = syms.intern("x").unwrap();
		let y = syms.intern("y").unwrap();
		syms.slot_mut(x).value = -4;
		syms.slot_mut(y).aux = 99;
		assert_eq!(*syms.slot(x), Slot { value: -4, aux: 0 });
		assert_eq!(*syms.slot(y), Slot { value: 0, aux: 99 });
	}

	#[test]
	fn names_after_a_macro_body_get_their_own_tag() {
		let mut syms = SymbolTable::new(1024).unwrap();
		for c in " 5\n".chars() {
			syms.push_macro_char(c).unwrap();
		}
		syms.push_macro_byte(TAG_MACRO).unwrap();
		let id = syms.intern("n").unwrap();
		assert_eq!(syms.byte_at(id.0 as usize), TAG_TOK);
		assert_eq!(syms.name(id), "n");
	}

	#[test]
	fn full_heap_is_reported() {
		let mut syms = SymbolTable::new(KEYWORDS.len() + 4).unwrap();
		syms.intern("abc").unwrap();
		let err = syms.intern("toolong").unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
	}

	#[test]
	fn multibyte_characters_round_trip() {
		let mut syms = SymbolTable::new(1024).unwrap();
		let start = syms.len();
		syms.push_macro_char('é').unwrap();
		assert_eq!(syms.char_at(start), ('é', 2));
	}
}
