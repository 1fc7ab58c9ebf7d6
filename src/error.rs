#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	/// An expected token or construct was not found.
	Syntax,
	/// A name is neither defined in the program nor known to the host resolver.
	UndefinedSymbol,
	/// The symbol heap, a code/data region or the macro stack is full.
	ResourceExhausted,
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.write_str(match self {
			ErrorKind::Syntax => "syntax error",
			ErrorKind::UndefinedSymbol => "undefined symbol",
			ErrorKind::ResourceExhausted => "resource exhausted",
		})
	}
}

pub struct CompilationError {
	kind: ErrorKind,
	msg: String,
	offset: Option<usize>,
}

impl CompilationError {
	pub fn nowhere(kind: ErrorKind, msg: String) -> Self {
		CompilationError { kind, msg, offset: None }
	}
	pub fn at(kind: ErrorKind, offset: usize, msg: String) -> Self {
		CompilationError { kind, msg, offset: Some(offset) }
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}
	pub fn offset(&self) -> Option<usize> {
		self.offset
	}
	pub fn message(&self) -> &str {
		&self.msg
	}
}

impl std::fmt::Display for CompilationError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if let Some(offset) = self.offset {
			f.write_fmt(format_args!("{}: {}", offset, self.msg))
		} else {
			f.write_str(&self.msg)
		}
	}
}

impl std::fmt::Debug for CompilationError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if let Some(offset) = self.offset {
			f.write_fmt(format_args!("{} at byte {}: {}", self.kind, offset, self.msg))
		} else {
			f.write_fmt(format_args!("{}: {}", self.kind, self.msg))
		}
	}
}

impl std::error::Error for CompilationError {}

#[macro_export]
macro_rules! format_err {
	($kind:expr, $offset:expr, $($arg:tt)*) => {{
		Err($crate::error::CompilationError::at($kind, $offset, format!($($arg)*)))
	}};
}
#[macro_export]
macro_rules! format_err_nowhere {
	($kind:expr, $($arg:tt)*) => {{
		Err($crate::error::CompilationError::nowhere($kind, format!($($arg)*)))
	}};
}

pub type CompilerResult<T> = Result<T, CompilationError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_matches_the_diagnostic_line() {
		let err = CompilationError::at(ErrorKind::Syntax, 17, "')' expected".into());
		assert_eq!(err.to_string(), "17: ')' expected");
		assert_eq!(format!("{:?}", err), "syntax error at byte 17: ')' expected");
		let err: CompilerResult<()> = format_err_nowhere!(ErrorKind::ResourceExhausted, "code buffer full ({} bytes)", 64);
		assert_eq!(err.unwrap_err().to_string(), "code buffer full (64 bytes)");
	}
}
