use num_enum::TryFromPrimitive;

/// Binding strength of binary operators, tightest first. Level 1 is the
/// unary/primary level that every other level eventually recurses into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
#[repr(u8)]
pub enum Prec {
	Unary = 1,
	Mul, Add, Shift,
	Rel, Eq,
	BitAnd, BitXor, BitOr,
	LogAnd, LogOr,
}

impl Prec {
	pub const LOOSEST: Prec = Prec::LogOr;

	pub fn tighter(self) -> Option<Prec> {
		Prec::try_from(self as u8 - 1).ok()
	}

	pub fn is_logical(self) -> bool {
		matches!(self, Prec::LogAnd | Prec::LogOr)
	}

	pub fn is_comparison(self) -> bool {
		matches!(self, Prec::Rel | Prec::Eq)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpClass {
	Binary(Prec),
	/// Postfix `++`/`--`, payload is the 8-bit addend.
	Step,
	/// Prefix-only operators.
	Unary,
}

/// One row of the operator encoding table. `follow == None` matches any
/// following character.
#[derive(Debug, PartialEq, Eq)]
pub struct OpEntry {
	pub lead: char,
	pub follow: Option<char>,
	pub class: OpClass,
	pub code: &'static [u8],
}

impl OpEntry {
	pub fn is_single(&self, c: char) -> bool {
		self.lead == c && self.follow.is_none()
	}

	/// `-`, `+`, `!` and `~` may start an expression.
	pub fn is_prefix(&self) -> bool {
		matches!(self.class, OpClass::Unary | OpClass::Binary(Prec::Add))
	}

	pub fn binary_prec(&self) -> Option<Prec> {
		match self.class {
			OpClass::Binary(prec) => Some(prec),
			_ => None,
		}
	}
}

include!(concat!(env!("OUT_DIR"), "/op_table.rs"));

pub fn lookup(lead: char, next: Option<char>) -> Option<&'static OpEntry> {
	OP_TABLE.iter().find(|op| op.lead == lead && (op.follow.is_none() || op.follow == next))
}
