mod init;

use muxkit::console::base_dir_of;
use muxkit::Console;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq, Eq)]
enum Args {
	Help,
	Version,
	Run(PathBuf),
	Invalid(String),
}

fn parse_args(args: &[String]) -> Args {
	let mut file = None;
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" | "help" => return Args::Help,
			"-V" | "--version" | "version" => return Args::Version,
			"-f" | "--init" => match iter.next() {
				Some(path) => file = Some(PathBuf::from(path)),
				None => return Args::Invalid(format!("{} needs a file", arg)),
			},
			flag if flag.starts_with('-') => return Args::Invalid(format!("unknown option: {}", flag)),
			path if file.is_none() => file = Some(PathBuf::from(path)),
			extra => return Args::Invalid(format!("unexpected argument: {}", extra)),
		}
	}
	match file {
		Some(file) => Args::Run(file),
		None => Args::Invalid("no init file given".into()),
	}
}

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let file = match parse_args(&args) {
		Args::Help => {
			print_usage();
			return;
		}
		Args::Version => {
			println!("console-mux {}", env!("CARGO_PKG_VERSION"));
			return;
		}
		Args::Run(file) => file,
		Args::Invalid(message) => {
			eprintln!("{}", message);
			eprintln!();
			print_usage();
			std::process::exit(1);
		}
	};
	if !file.is_file() {
		eprintln!("no such init file: {}", file.display());
		eprintln!();
		print_usage();
		std::process::exit(1);
	}

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let console = match load(&file) {
		Ok(console) => console,
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		}
	};

	let mut usr1 = match signal(SignalKind::user_defined1()) {
		Ok(s) => s,
		Err(e) => {
			tracing::error!("failed to install SIGUSR1 handler: {}", e);
			std::process::exit(1);
		}
	};
	let mut term = match signal(SignalKind::terminate()) {
		Ok(s) => s,
		Err(e) => {
			tracing::error!("failed to install SIGTERM handler: {}", e);
			std::process::exit(1);
		}
	};

	tracing::info!("console-mux started (pid {})", std::process::id());

	loop {
		tokio::select! {
			_ = usr1.recv() => print_status(&console),
			_ = term.recv() => break,
			_ = tokio::signal::ctrl_c() => break,
		}
	}

	tracing::info!("shutting down");
	console.shutdown().await;
}

fn load(file: &std::path::Path) -> Result<Arc<Console>, init::InitError> {
	let init = init::load(file)?;
	let console = Console::new(init.supervisor.clone())?;
	console.spawn_mark_timer();
	let sequences = init.apply(&console, &base_dir_of(file));
	tracing::info!("{} sequences launched, {}", sequences.len(), console.count());
	Ok(console)
}

fn print_status(console: &Console) {
	let table = console.status_table();
	let mut lines = table.lines();
	if let Some(header) = lines.next() {
		println!("{}", header.bold());
	}
	for line in lines {
		if line.ends_with("(pending)") || line.contains(" down ") {
			println!("{}", line.dimmed());
		} else {
			println!("{}", line);
		}
	}
	println!("{}", console.count().cyan());
}

fn print_usage() {
	eprintln!(
		"{} {} - run commands in pseudo-terminals and keep them supervised",
		"console-mux".bold(),
		env!("CARGO_PKG_VERSION")
	);
	eprintln!();
	eprintln!("usage: {} [-f FILE | FILE]", "console-mux".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {} FILE     TOML init file ([supervisor], [defaults], [[add]], [[run]], [[sequence]])", "-f, --init".bold());
	eprintln!("  {}       Print version", "-V, --version".bold());
	eprintln!("  {}          Show this help", "-h, --help".bold());
	eprintln!();
	eprintln!("{}", "signals".cyan().bold());
	eprintln!("  {}                Print the status table", "USR1".bold());
	eprintln!("  {}         Stop every process and exit", "INT, TERM".bold());
	eprintln!();
	eprintln!("Set RUST_LOG to change log verbosity (default: info).");
}
