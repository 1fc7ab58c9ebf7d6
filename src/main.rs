use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tinyc::{HostResolver, Limits, NoResolver, SymbolResolver};

#[derive(Parser)]
#[command(name = "tinyc", about = "Compile a tiny C program and run it", version)]
struct Cli {
	/// Source file; standard input when omitted
	file: Option<PathBuf>,

	/// Write the generated machine code to FILE instead of running it
	#[arg(long, value_name = "FILE")]
	dump: Option<PathBuf>,

	/// Do not resolve undefined functions against the running process
	#[arg(long)]
	no_host: bool,

	/// Symbol heap size in bytes
	#[arg(long, value_name = "BYTES")]
	heap_size: Option<usize>,

	/// Code buffer size in bytes
	#[arg(long, value_name = "BYTES")]
	code_size: Option<usize>,

	/// Data region size in bytes
	#[arg(long, value_name = "BYTES")]
	data_size: Option<usize>,

	/// Program stack size in bytes
	#[arg(long, value_name = "BYTES")]
	stack_size: Option<usize>,

	/// Arguments passed to the program's main
	#[arg(last = true)]
	args: Vec<String>,
}

impl Cli {
	fn limits(&self) -> Limits {
		let mut limits = Limits::default();
		if let Some(heap) = self.heap_size {
			limits.heap = heap;
		}
		if let Some(code) = self.code_size {
			limits.code = code;
		}
		if let Some(data) = self.data_size {
			limits.data = data;
		}
		if let Some(stack) = self.stack_size {
			limits.stack = stack;
		}
		limits
	}
}

fn init_logging() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.try_init();
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging();

	let (name, src) = match &cli.file {
		Some(path) => {
			let src = std::fs::read(path)
				.with_context(|| format!("cannot read {}", path.display()))?;
			(path.display().to_string(), src)
		},
		None => {
			let mut src = vec![];
			std::io::stdin().read_to_end(&mut src).context("cannot read standard input")?;
			("-".to_string(), src)
		},
	};

	let resolver: Box<dyn SymbolResolver> = if cli.no_host {
		Box::new(NoResolver)
	} else {
		Box::new(HostResolver::new())
	};
	let mut prog = match tinyc::compile_bytes(&src, &cli.limits(), resolver) {
		Ok(prog) => prog,
		Err(err) => {
			eprintln!("{}", err);
			std::process::exit(1);
		},
	};

	if let Some(path) = &cli.dump {
		std::fs::write(path, prog.code())
			.with_context(|| format!("cannot write {}", path.display()))?;
		return Ok(());
	}

	let mut args = vec![name];
	args.extend(cli.args.iter().cloned());
	let res = match prog.run(&args) {
		Ok(res) => res,
		Err(err) => {
			eprintln!("{}", err);
			std::process::exit(1);
		},
	};
	std::process::exit(res);
}
