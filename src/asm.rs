use crate::error::CompilerResult;
use crate::mmap::{ExecBox, MmapVec};

/// Head of a list of 4-byte displacement fields that all wait for the same
/// target. Each field holds the buffer offset of the next one until the
/// list is resolved; offset 0 ends the list, since no field can start there.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Chain(u32);

impl Chain {
	pub const EMPTY: Chain = Chain(0);

	pub fn is_empty(self) -> bool {
		self.0 == 0
	}

	/// Chains parked in a symbol slot are stored as plain words.
	pub fn from_raw(raw: i32) -> Chain {
		Chain(raw as u32)
	}

	pub fn raw(self) -> i32 {
		self.0 as i32
	}
}

/// Append-only machine code buffer. The write cursor only grows; forward
/// references are threaded through the fields they will eventually fill.
pub struct CodeBuf {
	buf: MmapVec,
}

impl CodeBuf {
	pub fn new(size: usize) -> CompilerResult<Self> {
		Ok(CodeBuf { buf: MmapVec::new("code buffer", size)? })
	}

	pub fn pos(&self) -> usize {
		self.buf.len()
	}

	/// Absolute address of buffer offset `pos`.
	pub fn addr(&self, pos: usize) -> usize {
		self.buf.addr() + pos
	}

	/// True if `addr` lies inside the buffer's mapping.
	pub fn contains(&self, addr: usize) -> bool {
		addr >= self.buf.addr() && addr < self.buf.end_addr()
	}

	pub fn bytes(&self) -> &[u8] {
		&self.buf
	}

	pub fn emit(&mut self, bytes: &[u8]) -> CompilerResult<()> {
		self.buf.push_slice(bytes)
	}

	/// Emit `opcode` followed by a 4-byte field holding `value`, returning
	/// the offset of the field.
	pub fn emit_with_field(&mut self, opcode: &[u8], value: i32) -> CompilerResult<usize> {
		self.buf.push_slice(opcode)?;
		let at = self.buf.len();
		self.buf.push_i32(value)?;
		Ok(at)
	}

	/// Emit a jump or call whose target is not known yet, adding its field
	/// to the front of `chain`.
	pub fn thread(&mut self, opcode: &[u8], chain: Chain) -> CompilerResult<Chain> {
		let at = self.emit_with_field(opcode, chain.raw())?;
		Ok(Chain(at as u32))
	}

	/// Point every field of `chain` at the current cursor.
	pub fn resolve(&mut self, chain: Chain) {
		let to = self.buf.len();
		let mut node = chain;
		while !node.is_empty() {
			let at = node.0 as usize;
			node = Chain::from_raw(self.buf.read_i32(at));
			self.buf.write_rel32(at, to);
		}
	}

	/// Emit `opcode` with a displacement to the earlier offset `target`.
	pub fn jump_back(&mut self, opcode: &[u8], target: usize) -> CompilerResult<()> {
		let at = self.emit_with_field(opcode, 0)?;
		self.buf.write_rel32(at, target);
		Ok(())
	}

	pub fn patch(&mut self, at: usize, value: i32) {
		self.buf.write_i32(at, value);
	}

	pub fn read(&self, at: usize) -> i32 {
		self.buf.read_i32(at)
	}

	pub fn finish(self) -> CompilerResult<ExecBox> {
		self.buf.make_exec()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const JMP: &[u8] = &[0xe9];

	#[test]
	fn resolving_walks_the_whole_chain() {
		let mut code = CodeBuf::new(64).unwrap();
		let mut chain = Chain::EMPTY;
		chain = code.thread(JMP, chain).unwrap();
		code.emit(&[0x90]).unwrap();
		chain = code.thread(JMP, chain).unwrap();
		chain = code.thread(JMP, chain).unwrap();
		assert_eq!(chain.raw(), 12);
		// fields link back to the previous node, the first one ends the list
		assert_eq!(code.read(12), 7);
		assert_eq!(code.read(7), 1);
		assert_eq!(code.read(1), 0);

		code.emit(&[0x90, 0x90]).unwrap();
		code.resolve(chain);
		let target = code.pos();
		for field in [1, 7, 12] {
			assert_eq!(code.read(field), (target - field - 4) as i32);
		}
	}

	#[test]
	fn empty_chain_resolves_to_nothing() {
		let mut code = CodeBuf::new(16).unwrap();
		code.emit(&[0xc3]).unwrap();
		code.resolve(Chain::EMPTY);
		assert_eq!(code.bytes(), &[0xc3]);
	}

	#[test]
	fn backward_jumps_are_negative() {
		let mut code = CodeBuf::new(16).unwrap();
		code.emit(&[0x90, 0x90, 0x90]).unwrap();
		code.jump_back(JMP, 1).unwrap();
		assert_eq!(code.read(4), 1 - 8);
	}

	#[test]
	fn chains_survive_a_slot_round_trip() {
		let mut code = CodeBuf::new(16).unwrap();
		code.emit(&[0x90]).unwrap();
		let chain = code.thread(&[0xe8], Chain::EMPTY).unwrap();
		assert_eq!(Chain::from_raw(chain.raw()), chain);
		assert!(!chain.is_empty());
	}
}
