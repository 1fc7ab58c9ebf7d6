use std::ffi::CString;

use ahash::{HashMap, HashMapExt};
use inlinable_string::InlinableString;
use nix::libc;

/// Looks up names the program uses without defining them. Whatever address
/// comes back is called as a System V function taking up to six integers.
pub trait SymbolResolver {
	fn resolve(&mut self, name: &str) -> Option<usize>;
}

/// Resolves against the symbols already loaded into this process.
#[derive(Default)]
pub struct HostResolver {
	cache: HashMap<InlinableString, Option<usize>>,
}

impl HostResolver {
	pub fn new() -> Self {
		HostResolver { cache: HashMap::new() }
	}

	fn lookup(name: &str) -> Option<usize> {
		let name = CString::new(name).ok()?;
		let sym = unsafe {
			libc::dlerror();
			libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr())
		};
		if sym.is_null() {
			None
		} else {
			Some(sym as usize)
		}
	}
}

impl SymbolResolver for HostResolver {
	fn resolve(&mut self, name: &str) -> Option<usize> {
		if let Some(&addr) = self.cache.get(name) {
			return addr;
		}
		let addr = Self::lookup(name);
		match addr {
			Some(addr) => tracing::debug!(name, addr = format_args!("{:#x}", addr), "resolved host symbol"),
			None => tracing::debug!(name, "no host symbol"),
		}
		self.cache.insert(name.into(), addr);
		addr
	}
}

/// Resolves nothing: programs may only call what they define themselves.
pub struct NoResolver;

impl SymbolResolver for NoResolver {
	fn resolve(&mut self, _name: &str) -> Option<usize> {
		None
	}
}

/// Resolves from a fixed table, for embedding native functions.
#[derive(Default)]
pub struct TableResolver {
	table: HashMap<InlinableString, usize>,
}

impl TableResolver {
	pub fn new() -> Self {
		TableResolver { table: HashMap::new() }
	}

	pub fn with(mut self, name: &str, addr: usize) -> Self {
		self.table.insert(name.into(), addr);
		self
	}
}

impl SymbolResolver for TableResolver {
	fn resolve(&mut self, name: &str) -> Option<usize> {
		self.table.get(name).copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn host_symbols_are_found_and_cached() {
		let mut res = HostResolver::new();
		let addr = res.resolve("strlen").unwrap();
		assert_eq!(res.resolve("strlen"), Some(addr));
		assert_eq!(res.cache.len(), 1);
		assert_eq!(res.resolve("surely_not_a_symbol_anywhere"), None);
		assert_eq!(res.resolve("bad\0name"), None);
	}

	#[test]
	fn table_and_empty_resolvers() {
		let mut res = TableResolver::new().with("answer", 0x4242);
		assert_eq!(res.resolve("answer"), Some(0x4242));
		assert_eq!(res.resolve("strlen"), None);
		assert_eq!(NoResolver.resolve("strlen"), None);
	}
}
