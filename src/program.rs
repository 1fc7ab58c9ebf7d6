use inlinable_string::InlinableString;

use crate::error::CompilerResult;
use crate::mmap::{ExecBox, MmapVec};

type EntryFn = extern "sysv64" fn(argc: i32, argv: u32, stack_top: usize) -> i32;

/// What the compiler recorded about one function.
#[derive(Clone, Debug)]
pub struct FunctionInfo {
	pub name: InlinableString,
	/// Offset of the first instruction in the code buffer.
	pub entry: usize,
	pub frame_size: i32,
	pub params: usize,
	/// Parameters then locals, in declaration order, with their frame offsets.
	pub locals: Vec<(InlinableString, i32)>,
}

/// Compiled code, ready to run.
pub struct Program {
	code: ExecBox,
	data: MmapVec,
	/// Data bytes owned by the program itself; `argv` goes after them.
	data_len: usize,
	stack: MmapVec,
	entry: usize,
	functions: Vec<FunctionInfo>,
}

impl std::fmt::Debug for Program {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Program")
			.field("code_len", &self.code.len())
			.field("data_len", &self.data_len)
			.field("entry", &self.entry)
			.field("functions", &self.functions.iter().map(|f| &*f.name).collect::<Vec<_>>())
			.finish()
	}
}

impl Program {
	pub(crate) fn new(code: ExecBox, data: MmapVec, entry: usize, functions: Vec<FunctionInfo>, stack: usize)
		-> CompilerResult<Program>
	{
		let data_len = data.len();
		let stack = MmapVec::new("program stack", stack)?;
		Ok(Program { code, data, data_len, stack, entry, functions })
	}

	/// The generated machine code, entry trampoline included.
	pub fn code(&self) -> &[u8] {
		&self.code
	}

	pub fn functions(&self) -> &[FunctionInfo] {
		&self.functions
	}

	pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
		self.functions.iter().find(|f| &*f.name == name)
	}

	/// Copy `args` into the data region and call `main(argc, argv)`.
	/// Globals keep whatever the previous run left in them.
	pub fn run<S: AsRef<str>>(&mut self, args: &[S]) -> CompilerResult<i32> {
		self.data.truncate(self.data_len);
		let mut ptrs = Vec::with_capacity(args.len() + 1);
		for arg in args {
			ptrs.push((self.data.addr() + self.data.len()) as u32);
			self.data.push_slice(arg.as_ref().as_bytes())?;
			self.data.push_u8(0)?;
		}
		ptrs.push(0);
		while self.data.len() % 4 != 0 {
			self.data.push_u8(0)?;
		}
		let argv = (self.data.addr() + self.data.len()) as u32;
		for ptr in ptrs {
			self.data.push_u32(ptr)?;
		}

		let stack_top = self.stack.end_addr() & !0xf;
		tracing::debug!(argc = args.len(), "running program");
		let entry: EntryFn = unsafe {
			std::mem::transmute(self.code.get_idx(self.entry))
		};
		let res = entry(args.len() as i32, argv, stack_top);
		tracing::debug!(result = res, "program returned");
		Ok(res)
	}
}
