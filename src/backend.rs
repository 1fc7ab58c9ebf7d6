use crate::asm::{Chain, CodeBuf};
use crate::config::Limits;
use crate::error::{CompilerResult, ErrorKind};
use crate::format_err_nowhere;
use crate::mmap::{ExecBox, MmapVec};

/// Slot values below this are frame offsets, anything above is an address.
pub const LOCAL: i32 = 0x200;
/// Frame offset of the first parameter; each further one is 4 bytes higher.
pub const PARAM_BASE: i32 = 8;
/// The return address and saved frame pointer take 8 bytes each, so
/// parameters sit this much further from the frame pointer than recorded.
const PARAM_BIAS: i32 = 8;
/// Host functions take at most this many arguments, all passed in registers.
pub const MAX_HOST_ARGS: usize = 6;

pub fn is_frame(value: i32) -> bool {
	value < LOCAL
}

/// What to do with a variable, by the opcode used on its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
	Load,
	Store,
	Addr,
	/// Add the 8-bit immediate to the variable in place.
	Step(u8),
}

impl Access {
	fn opcode(self) -> u8 {
		match self {
			Access::Load => 0x8b,
			Access::Store => 0x89,
			Access::Addr => 0x8d,
			Access::Step(_) => 0x83,
		}
	}
}

/// Size of the object a pointer cast refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
	Word,
	Byte,
}

/// Instruction selection for the 32-bit word model: the value being computed
/// lives in eax, the left operand of a binary operator in ecx, and every
/// pointer fits in 32 bits because all regions are mapped below 2 GiB.
pub struct Backend {
	pub code: CodeBuf,
	data: MmapVec,
}

impl Backend {
	pub fn new(limits: &Limits) -> CompilerResult<Backend> {
		Ok(Backend {
			code: CodeBuf::new(limits.code)?,
			data: MmapVec::new("data region", limits.data)?,
		})
	}

	pub fn pos(&self) -> usize {
		self.code.pos()
	}

	/// Absolute address of code offset `pos`, as the generated code sees it.
	pub fn code_addr(&self, pos: usize) -> i32 {
		self.code.addr(pos) as i32
	}

	pub fn is_code(&self, addr: i32) -> bool {
		addr > 0 && self.code.contains(addr as usize)
	}

	/// Code offset of a function whose slot holds its address.
	pub fn code_pos(&self, addr: i32) -> usize {
		addr as usize - self.code.addr(0)
	}

	pub fn emit(&mut self, bytes: &[u8]) -> CompilerResult<()> {
		self.code.emit(bytes)
	}

	pub fn load_imm(&mut self, value: i32) -> CompilerResult<()> {
		self.code.emit_with_field(&[0xb8], value)?;
		Ok(())
	}

	pub fn jmp(&mut self, chain: Chain) -> CompilerResult<Chain> {
		self.code.thread(&[0xe9], chain)
	}

	/// Unconditional jump over the next `len` bytes.
	pub fn jmp_over(&mut self, len: i32) -> CompilerResult<()> {
		self.code.emit_with_field(&[0xe9], len)?;
		Ok(())
	}

	pub fn jump_back(&mut self, target: usize) -> CompilerResult<()> {
		self.code.jump_back(&[0xe9], target)
	}

	/// Test eax and jump when it is zero (`when_set == 0`) or non-zero.
	pub fn test_jump(&mut self, when_set: u8, chain: Chain) -> CompilerResult<Chain> {
		self.code.emit(&[0x85, 0xc0])?;
		self.code.thread(&[0x0f, 0x84 + when_set], chain)
	}

	/// eax = (ecx <cc> eax) as 0 or 1.
	pub fn compare(&mut self, cc: u8) -> CompilerResult<()> {
		self.code.emit(&[0x39, 0xc1])?;
		self.load_imm(0)?;
		self.code.emit(&[0x0f, 0x90 + cc, 0xc0])
	}

	pub fn push_acc(&mut self) -> CompilerResult<()> {
		self.code.emit(&[0x50])
	}

	pub fn pop_secondary(&mut self) -> CompilerResult<()> {
		self.code.emit(&[0x59])
	}

	pub fn clear_secondary(&mut self) -> CompilerResult<()> {
		self.code.emit_with_field(&[0xb9], 0)?;
		Ok(())
	}

	pub fn access(&mut self, access: Access, value: i32) -> CompilerResult<()> {
		let op = access.opcode();
		if is_frame(value) {
			let disp = if value > 0 { value + PARAM_BIAS } else { value };
			self.code.emit_with_field(&[op, 0x85], disp)?;
		} else {
			self.code.emit_with_field(&[op, 0x04, 0x25], value)?;
		}
		if let Access::Step(imm) = access {
			self.code.emit(&[imm])?;
		}
		Ok(())
	}

	pub fn deref(&mut self, width: Width) -> CompilerResult<()> {
		match width {
			Width::Word => self.code.emit(&[0x67, 0x8b, 0x00]),
			Width::Byte => self.code.emit(&[0x67, 0x0f, 0xbe, 0x00]),
		}
	}

	/// Store eax (or al) at the address in ecx.
	pub fn store_through(&mut self, width: Width) -> CompilerResult<()> {
		match width {
			Width::Word => self.code.emit(&[0x67, 0x89, 0x01]),
			Width::Byte => self.code.emit(&[0x67, 0x88, 0x01]),
		}
	}

	/// Reserve the outgoing argument area; the size is patched by `end_args`.
	pub fn reserve_args(&mut self) -> CompilerResult<usize> {
		self.code.emit_with_field(&[0x48, 0x81, 0xec], 0)
	}

	pub fn store_arg(&mut self, index: usize) -> CompilerResult<()> {
		self.code.emit_with_field(&[0x89, 0x84, 0x24], 4 * index as i32)?;
		Ok(())
	}

	pub fn end_args(&mut self, field: usize, bytes: i32) {
		self.code.patch(field, bytes);
	}

	pub fn release_args(&mut self, bytes: i32) -> CompilerResult<()> {
		if bytes != 0 {
			self.code.emit_with_field(&[0x48, 0x81, 0xc4], bytes)?;
		}
		Ok(())
	}

	/// Call a function that is not defined yet.
	pub fn call_pending(&mut self, chain: Chain) -> CompilerResult<Chain> {
		self.code.thread(&[0xe8], chain)
	}

	pub fn call_direct(&mut self, addr: i32) -> CompilerResult<()> {
		let target = self.code_pos(addr);
		self.code.jump_back(&[0xe8], target)
	}

	/// Call the function pointer pushed just above an argument area of
	/// `bytes` bytes.
	pub fn call_indirect(&mut self, bytes: i32) -> CompilerResult<()> {
		self.code.emit_with_field(&[0xff, 0x94, 0x24], bytes)?;
		Ok(())
	}

	/// Call a native System V function with the `nargs` words stored in the
	/// argument area. The words are sign-extended into the argument
	/// registers, and the stack is aligned around the call.
	pub fn call_host(&mut self, addr: usize, nargs: usize) -> CompilerResult<()> {
		const LOAD_ARG: [[u8; 4]; MAX_HOST_ARGS] = [
			[0x48, 0x63, 0x7b, 0x08], // movsxd rdi, [rbx+8]
			[0x48, 0x63, 0x73, 0x0c], // movsxd rsi, [rbx+12]
			[0x48, 0x63, 0x53, 0x10], // movsxd rdx, [rbx+16]
			[0x48, 0x63, 0x4b, 0x14], // movsxd rcx, [rbx+20]
			[0x4c, 0x63, 0x43, 0x18], // movsxd r8, [rbx+24]
			[0x4c, 0x63, 0x4b, 0x1c], // movsxd r9, [rbx+28]
		];
		debug_assert!(nargs <= MAX_HOST_ARGS);
		// push rbx; mov rbx, rsp; and rsp, -16
		self.code.emit(&[0x53, 0x48, 0x89, 0xe3, 0x48, 0x83, 0xe4, 0xf0])?;
		for load in &LOAD_ARG[..nargs.min(MAX_HOST_ARGS)] {
			self.code.emit(load)?;
		}
		// xor eax, eax; mov r11, addr; call r11
		self.code.emit(&[0x31, 0xc0, 0x49, 0xbb])?;
		self.code.emit(&(addr as u64).to_le_bytes())?;
		self.code.emit(&[0x41, 0xff, 0xd3])?;
		// mov rsp, rbx; pop rbx; mov eax, eax
		self.code.emit(&[0x48, 0x89, 0xdc, 0x5b, 0x89, 0xc0])
	}

	/// Function entry; returns the field holding the frame size.
	pub fn prologue(&mut self) -> CompilerResult<usize> {
		self.code.emit(&[0x55, 0x48, 0x89, 0xe5])?;
		self.code.emit_with_field(&[0x48, 0x81, 0xec], 0)
	}

	pub fn epilogue(&mut self) -> CompilerResult<()> {
		self.code.emit(&[0xc9, 0xc3])
	}

	/// Trampoline with the signature
	/// `extern "sysv64" fn(argc: i32, argv: u32, stack_top: usize) -> i32`:
	/// switches to the program stack, passes argc and argv the way compiled
	/// functions expect them, calls `main` and restores the host stack.
	pub fn entry_stub(&mut self, main: usize) -> CompilerResult<usize> {
		let entry = self.code.pos();
		self.code.emit(&[
			0x55, // push rbp
			0x48, 0x89, 0xe5, // mov rbp, rsp
			0x53, // push rbx
			0x41, 0x54, // push r12
			0x49, 0x89, 0xe4, // mov r12, rsp
			0x48, 0x89, 0xd4, // mov rsp, rdx
			0x48, 0x83, 0xec, 0x10, // sub rsp, 16
			0x89, 0x3c, 0x24, // mov [rsp], edi
			0x89, 0x74, 0x24, 0x04, // mov [rsp+4], esi
		])?;
		self.code.jump_back(&[0xe8], main)?;
		self.code.emit(&[
			0x4c, 0x89, 0xe4, // mov rsp, r12
			0x41, 0x5c, // pop r12
			0x5b, // pop rbx
			0x5d, // pop rbp
			0xc3,
		])?;
		Ok(entry)
	}

	/// Address of the next byte of the data region.
	pub fn data_addr(&self) -> i32 {
		(self.data.addr() + self.data.len()) as i32
	}

	/// Reserve one zeroed 4-byte global and return its address.
	pub fn alloc_global(&mut self) -> CompilerResult<i32> {
		let addr = self.data_addr();
		self.data.push_i32(0)?;
		Ok(addr)
	}

	pub fn push_data(&mut self, b: u8) -> CompilerResult<()> {
		self.data.push_u8(b)
	}

	/// Pad the data region with zeroes up to the next 4-byte boundary.
	pub fn align_data(&mut self) -> CompilerResult<()> {
		while self.data.len() % 4 != 0 {
			self.data.push_u8(0)?;
		}
		Ok(())
	}

	pub fn finish(self) -> CompilerResult<(ExecBox, MmapVec)> {
		if self.data.len() > i32::MAX as usize {
			return format_err_nowhere!(ErrorKind::ResourceExhausted, "data region too large");
		}
		Ok((self.code.finish()?, self.data))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn backend() -> Backend {
		Backend::new(&Limits { code: 4096, data: 4096, ..Limits::default() }).unwrap()
	}

	#[test]
	fn frame_access_adds_the_parameter_bias() {
		let mut back = backend();
		back.access(Access::Load, -4).unwrap();
		assert_eq!(back.code.bytes(), &[0x8b, 0x85, 0xfc, 0xff, 0xff, 0xff]);

		let mut back = backend();
		back.access(Access::Store, PARAM_BASE + 4).unwrap();
		assert_eq!(back.code.bytes(), &[0x89, 0x85, 20, 0, 0, 0]);
	}

	#[test]
	fn global_access_uses_absolute_addresses() {
		let mut back = backend();
		let addr = back.alloc_global().unwrap();
		assert!(!is_frame(addr));
		back.access(Access::Step(0xff), addr).unwrap();
		let bytes = back.code.bytes();
		assert_eq!(&bytes[..3], &[0x83, 0x04, 0x25]);
		assert_eq!(&bytes[3..7], &addr.to_le_bytes());
		assert_eq!(bytes[7], 0xff);
	}

	#[test]
	fn compare_materializes_a_flag() {
		let mut back = backend();
		back.compare(0x0c).unwrap();
		assert_eq!(back.code.bytes(), &[0x39, 0xc1, 0xb8, 0, 0, 0, 0, 0x0f, 0x9c, 0xc0]);
	}

	#[test]
	fn test_jump_picks_the_condition() {
		let mut back = backend();
		let chain = back.test_jump(0, Chain::EMPTY).unwrap();
		let chain = back.test_jump(1, chain).unwrap();
		let bytes = back.code.bytes();
		assert_eq!(&bytes[..4], &[0x85, 0xc0, 0x0f, 0x84]);
		assert_eq!(&bytes[8..12], &[0x85, 0xc0, 0x0f, 0x85]);
		assert_eq!(chain.raw(), 12);
	}

	#[test]
	fn strings_are_padded_to_words() {
		let mut back = backend();
		let start = back.data_addr();
		for &b in b"hi\0" {
			back.push_data(b).unwrap();
		}
		back.align_data().unwrap();
		assert_eq!(back.data_addr(), start + 4);
		let global = back.alloc_global().unwrap();
		assert_eq!(global, start + 4);
		assert_eq!(back.data_addr(), start + 8);
	}

	#[test]
	fn host_calls_load_only_the_passed_arguments() {
		let mut none = backend();
		none.call_host(0x1234, 0).unwrap();
		let mut two = backend();
		two.call_host(0x1234, 2).unwrap();
		assert_eq!(two.pos() - none.pos(), 8);
		assert_eq!(&two.code.bytes()[8..12], &[0x48, 0x63, 0x7b, 0x08]);
	}

	#[test]
	fn direct_calls_reach_back_to_the_entry() {
		let mut back = backend();
		back.epilogue().unwrap();
		let addr = back.code_addr(0);
		back.call_direct(addr).unwrap();
		assert_eq!(back.code.read(3), -7);
		assert_eq!(back.code_pos(addr), 0);
	}
}
