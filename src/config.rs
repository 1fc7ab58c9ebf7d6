/// Default size of the symbol heap, code buffer and data region.
pub const ALLOC_SIZE: usize = 99999;

/// Fixed capacities of one compiler instance. Nothing grows past these.
#[derive(Clone, Debug)]
pub struct Limits {
	/// Intern heap bytes; the slot table has one entry per heap byte.
	pub heap: usize,
	/// Machine code bytes.
	pub code: usize,
	/// Globals, string literals and the argument vector built at run time.
	pub data: usize,
	/// Stack the compiled program runs on.
	pub stack: usize,
	/// Maximum number of macro bodies being expanded at once.
	pub macro_depth: usize,
}

impl Default for Limits {
	fn default() -> Self {
		Limits {
			heap: ALLOC_SIZE,
			code: ALLOC_SIZE,
			data: ALLOC_SIZE,
			stack: 1 << 20,
			macro_depth: 64,
		}
	}
}
