use std::fs::File;
use std::num::NonZeroUsize;
use std::ops::DerefMut;
use std::ptr::null_mut;

use nix::sys::mman::*;
use nix::unistd::{sysconf, SysconfVar};

use crate::error::{CompilerResult, ErrorKind};
use crate::format_err_nowhere;

/// Fixed-capacity byte vector backed by an anonymous mapping in the low
/// 2 GiB of the address space, so every byte of it has a 32-bit address.
pub struct MmapVec {
	name: &'static str,
	ptr: *mut nix::libc::c_void,
	cap: usize,
	len: usize,
}

pub struct ExecBox {
	ptr: *const nix::libc::c_void,
	cap: usize,
	len: usize,
}

fn page_size() -> CompilerResult<usize> {
	match sysconf(SysconfVar::PAGE_SIZE) {
		Ok(Some(size)) if size > 0 => Ok(size as usize),
		_ => format_err_nowhere!(ErrorKind::ResourceExhausted, "cannot query the page size"),
	}
}

impl MmapVec {
	pub fn new(name: &'static str, size: usize) -> CompilerResult<Self> {
		let page_size = page_size()?;
		let cap = size.max(1).div_ceil(page_size) * page_size;
		let Some(map_len) = NonZeroUsize::new(cap) else {
			return format_err_nowhere!(ErrorKind::ResourceExhausted, "{} size overflows", name);
		};
		let ptr = unsafe {
			mmap::<File>(None,
				map_len,
				ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
				MapFlags::MAP_ANONYMOUS | MapFlags::MAP_PRIVATE | MapFlags::MAP_32BIT,
				None, 0
			)
		};
		let ptr = match ptr {
			Ok(ptr) => ptr,
			Err(errno) => return format_err_nowhere!(ErrorKind::ResourceExhausted,
				"cannot map {} ({} bytes): {}", name, cap, errno),
		};
		let vec = MmapVec { name, ptr, cap, len: 0 };
		if vec.end_addr() > i32::MAX as usize {
			return format_err_nowhere!(ErrorKind::ResourceExhausted,
				"{} was not mapped below 2 GiB", name);
		}
		Ok(vec)
	}

	pub fn make_exec(mut self) -> CompilerResult<ExecBox> {
		let ptr = self.ptr;
		self.ptr = null_mut();
		if let Err(errno) = unsafe { mprotect(ptr, self.cap, ProtFlags::PROT_READ | ProtFlags::PROT_EXEC) } {
			let _ = unsafe { munmap(ptr, self.cap) };
			return format_err_nowhere!(ErrorKind::ResourceExhausted,
				"cannot make {} executable: {}", self.name, errno);
		}
		Ok(ExecBox { ptr, cap: self.cap, len: self.len })
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn capacity(&self) -> usize {
		self.cap
	}

	/// Address of the first byte.
	pub fn addr(&self) -> usize {
		self.ptr as usize
	}

	/// Address one past the end of the mapping.
	pub fn end_addr(&self) -> usize {
		self.addr() + self.cap
	}

	pub fn truncate(&mut self, len: usize) {
		self.len = self.len.min(len);
	}

	pub fn push_slice(&mut self, b: &[u8]) -> CompilerResult<()> {
		if self.len + b.len() > self.cap {
			return format_err_nowhere!(ErrorKind::ResourceExhausted,
				"{} is full ({} bytes)", self.name, self.cap);
		}
		let pos = self.len;
		self.len += b.len();
		self.deref_mut()[pos..].copy_from_slice(b);
		Ok(())
	}
	pub fn push_u8(&mut self, x: u8) -> CompilerResult<()> { self.push_slice(&[x]) }
	pub fn push_i32(&mut self, x: i32) -> CompilerResult<()> { self.push_slice(&x.to_le_bytes()) }
	pub fn push_u32(&mut self, x: u32) -> CompilerResult<()> { self.push_slice(&x.to_le_bytes()) }

	pub fn read_i32(&self, at: usize) -> i32 {
		let mut bytes = [0; 4];
		bytes.copy_from_slice(&self[at..at + 4]);
		i32::from_le_bytes(bytes)
	}

	pub fn write_i32(&mut self, at: usize, x: i32) {
		self[at..at + 4].copy_from_slice(&x.to_le_bytes());
	}

	/// Fill the 4-byte field at `at` with the displacement of `to` relative to
	/// the end of that field.
	pub fn write_rel32(&mut self, at: usize, to: usize) {
		let from = at + 4;
		let diff = (to as i64) - (from as i64);
		self.write_i32(at, diff as i32);
	}
}

impl ExecBox {
	pub fn get_idx(&self, idx: usize) -> *const nix::libc::c_void {
		assert!(idx <= self.len);
		unsafe { self.ptr.add(idx) }
	}
}

impl std::ops::Deref for MmapVec {
	type Target = [u8];
	fn deref(&self) -> &[u8] {
		unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
	}
}
impl std::ops::DerefMut for MmapVec {
	fn deref_mut(&mut self) -> &mut [u8] {
		unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
	}
}
impl std::ops::Deref for ExecBox {
	type Target = [u8];
	fn deref(&self) -> &[u8] {
		unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
	}
}

impl std::ops::Drop for MmapVec {
	fn drop(&mut self) {
		if !self.ptr.is_null() {
			let _ = unsafe { munmap(self.ptr, self.cap) };
		}
	}
}
impl std::ops::Drop for ExecBox {
	fn drop(&mut self) {
		if !self.ptr.is_null() {
			let _ = unsafe { munmap(self.ptr.cast_mut(), self.cap) };
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mapping_is_low_and_page_rounded() {
		let v = MmapVec::new("test region", 10).unwrap();
		assert!(v.capacity() >= 10);
		assert_eq!(v.capacity() % page_size().unwrap(), 0);
		assert!(v.end_addr() <= i32::MAX as usize);
	}

	#[test]
	fn push_past_capacity_is_reported() {
		let mut v = MmapVec::new("test region", 1).unwrap();
		let cap = v.capacity();
		v.push_slice(&vec![0xaa; cap]).unwrap();
		let err = v.push_u8(1).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
		assert!(err.message().contains("test region"));
	}

	#[test]
	fn rel32_is_measured_from_the_field_end() {
		let mut v = MmapVec::new("test region", 64).unwrap();
		v.push_slice(&[0; 16]).unwrap();
		v.write_rel32(2, 12);
		assert_eq!(v.read_i32(2), 6);
		v.write_rel32(8, 0);
		assert_eq!(v.read_i32(8), -12);
		v.truncate(4);
		assert_eq!(v.len(), 4);
	}
}
