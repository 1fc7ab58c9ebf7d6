use std::{
	env,
	fs::{self, File},
	path::Path,
	io::Write
};
use nom::{
	IResult,
	character::complete::{char, digit1, line_ending, not_line_ending},
	combinator::{opt, map_res, map, all_consuming, value},
	bytes::complete::{take_while_m_n, tag},
	multi::{many0, separated_list1},
	sequence::{terminated, preceded}, branch::alt,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
	Step,
	Unary,
	Binary(u8),
}

#[derive(Clone, Debug)]
struct Entry {
	lead: char,
	follow: Option<char>,
	class: Class,
	code: Vec<u8>,
}

// Binary levels 2..=11, level 1 being unary/primary expressions
const PREC_NAMES: [&str; 10] = [
	"Mul", "Add", "Shift", "Rel", "Eq",
	"BitAnd", "BitXor", "BitOr", "LogAnd", "LogOr",
];

fn is_op_char(c: char) -> bool {
	"+-*/%<>=!&|^~".contains(c)
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
	map_res(
		take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
		|s: &str| u8::from_str_radix(s, 16))(input)
}

fn parse_class(input: &str) -> IResult<&str, Class> {
	alt((
		value(Class::Step, tag("step")),
		value(Class::Unary, tag("unary")),
		map_res(digit1, |s: &str| s.parse::<u8>().map(Class::Binary)),
	))(input)
}

fn parse_entry(input: &str) -> IResult<&str, Entry> {
	let (input, pat) = take_while_m_n(1, 2, is_op_char)(input)?;
	let (input, _) = char('\t')(input)?;
	let (input, class) = parse_class(input)?;
	let (input, _) = char('\t')(input)?;
	let (input, code) = separated_list1(char(' '), hex_byte)(input)?;
	let (input, _) = line_ending(input)?;
	let mut chars = pat.chars();
	let lead = chars.next().unwrap();
	Ok((input, Entry { lead, follow: chars.next(), class, code }))
}

fn main() {
	println!("cargo:rerun-if-changed=build.rs");
	println!("cargo:rerun-if-changed=src/ops.txt");

	let in_path = Path::new("./src/ops.txt");
	let ops_txt = fs::read(in_path).expect("could not read ops.txt");
	let ops_txt = std::str::from_utf8(&ops_txt).expect("ops.txt is not valid utf-8");

	let (_, entries) = all_consuming(many0(alt((
		map(parse_entry, Some),
		map(terminated(opt(preceded(char('#'), not_line_ending)), line_ending), |_| None),
	))))(ops_txt).unwrap();

	let out_dir = env::var_os("OUT_DIR").unwrap();
	let out_path = Path::new(&out_dir).join("op_table.rs");
	let mut out = File::create(out_path).expect("could not create op_table.rs");

	write!(out, "pub static OP_TABLE: &[OpEntry] = &[\n").unwrap();
	for entry in entries.into_iter().flatten() {
		let class = match entry.class {
			Class::Step => "OpClass::Step".to_string(),
			Class::Unary => "OpClass::Unary".to_string(),
			Class::Binary(level) => {
				assert!((2..=11).contains(&level), "binary level {} out of range in ops.txt", level);
				format!("OpClass::Binary(Prec::{})", PREC_NAMES[level as usize - 2])
			},
		};
		let code: Vec<String> = entry.code.iter().map(|b| format!("{:#04x}", b)).collect();
		write!(out, "\tOpEntry {{ lead: {:?}, follow: {:?}, class: {}, code: &[{}] }},\n",
			entry.lead, entry.follow, class, code.join(", ")).unwrap();
	}
	write!(out, "];\n").unwrap();
}
