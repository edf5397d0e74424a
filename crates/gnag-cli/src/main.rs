mod config;

use std::{
    env::args,
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context};
use config::{Config, GrammarFile};
use gnag_atn::{
    error::ErrorAccumulator,
    grammar::{Compiled, Grammar},
};

fn main() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "WARN".to_owned());
    let level = log::LevelFilter::from_str(&level).unwrap_or(log::LevelFilter::Warn);

    if let Err(e) = simplelog::TermLogger::init(
        level,
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    ) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

struct StdoutSink;

impl std::fmt::Write for StdoutSink {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        use std::io::Write as _;
        std::io::stdout()
            .write_all(s.as_bytes())
            .map_err(|_| std::fmt::Error)
    }
}

pub struct UnitPrinter {
    value: f64,
    suffixes: &'static [(&'static str, f64)],
}

#[allow(non_upper_case_globals)]
impl UnitPrinter {
    fn bytes(value: f64) -> Self {
        const KiB: f64 = 1.0 / 1024.0;
        Self {
            value,
            suffixes: &[("MiB", KiB * KiB), ("KiB", KiB), ("B", 1.0)],
        }
    }
    fn seconds(value: f64) -> Self {
        const ms: f64 = 1000.0;
        Self {
            value,
            suffixes: &[
                ("s", 1.0),
                ("ms", ms),
                ("µs", ms * ms),
                ("ns", ms * ms * ms),
            ],
        }
    }
}

impl Display for UnitPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the largest unit that keeps the value at least one
        let mut best: Option<(f64, &'static str)> = None;
        for &(name, factor) in self.suffixes {
            let value = self.value * factor;
            let better = match best {
                None => true,
                Some((best, _)) if best >= 1.0 => value < best && value >= 1.0,
                Some((best, _)) => value > best,
            };
            if better {
                best = Some((value, name));
            }
        }

        match best {
            Some((value, suffix)) => write!(f, "{value:.2} {suffix}"),
            None => write!(f, "{:.2}", self.value),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ErrorReporting {
    On,
    Eager,
    Off,
}

pub struct PhaseRunner<'a, 'b> {
    file: &'a Path,
    err: &'b ErrorAccumulator,
    errors: ErrorReporting,
    do_bench: bool,
    bytes: usize,
    iters: u32,
}

impl<'a, 'b> PhaseRunner<'a, 'b> {
    pub fn new(
        file: &'a Path,
        bytes: usize,
        err: &'b ErrorAccumulator,
        errors: ErrorReporting,
        do_bench: bool,
        iters: u32,
    ) -> PhaseRunner<'a, 'b> {
        PhaseRunner {
            file,
            err,
            errors,
            do_bench,
            bytes,
            iters: iters.max(1),
        }
    }
    pub fn run<F: FnMut() -> T, T>(&self, name: &str, mut fun: F) -> T {
        let start = std::time::Instant::now();
        let mut output = fun();
        for _ in 1..self.iters {
            output = fun();
        }
        let elapsed = (start.elapsed() / self.iters).as_secs_f64();

        if self.do_bench {
            let throughput = UnitPrinter::bytes((self.bytes as f64) / elapsed);
            let time = UnitPrinter::seconds(elapsed);
            eprintln!("{name}\t {time}\t {throughput}/s");
        }
        if self.errors == ErrorReporting::Eager {
            self.report_errors();
        }

        output
    }
    pub fn report_errors(&self) {
        if self.errors == ErrorReporting::Off {
            return;
        }

        let file = self.file.display();
        for d in self.err.get().iter() {
            match d.message.span {
                Some(span) => eprintln!("{file}:{span}: {}: {}", d.severity, *d.message),
                None => eprintln!("{file}: {}: {}", d.severity, *d.message),
            }
        }
        self.err.clear();
    }
}

fn load(file: &GrammarFile) -> anyhow::Result<Grammar> {
    let mut grammar = Grammar::new();
    for name in &file.tokens {
        grammar.symbols.define_token(name);
    }
    for name in &file.channels {
        grammar.symbols.define_channel(name);
    }
    for (i, entry) in file.rules.iter().enumerate() {
        let handle = match entry.fragment {
            true => grammar.add_fragment(&entry.tree),
            false => grammar.add_rule(&entry.tree),
        }
        .with_context(|| format!("Rule #{i} is not a RULE tree"))?;
        if entry.left_recursive {
            grammar.mark_left_recursive(handle);
        }
    }
    log::debug!(
        "loaded {} rules, {} tokens",
        grammar.rules.len(),
        grammar.symbols.token_count()
    );
    Ok(grammar)
}

fn next_arg<'a>(iter: &mut impl Iterator<Item = &'a str>, flag: &str) -> anyhow::Result<&'a str> {
    iter.next()
        .with_context(|| format!("Expected argument after {flag}"))
}

#[allow(unused_must_use)]
fn run() -> anyhow::Result<bool> {
    let args = args().skip(1).collect::<Vec<_>>();

    let mut do_tree = false;
    let mut do_classify = false;
    let mut do_statements = false;
    let mut do_dot = false;

    let mut do_bench = false;
    let mut bench_iters = 1;

    let mut errors = ErrorReporting::On;

    let mut files = Vec::new();
    let mut iter = args.iter().map(String::as_str);

    while let Some(arg) = iter.next() {
        match arg {
            "--tree" => do_tree = true,
            "--classify" => do_classify = true,
            "--statements" => do_statements = true,
            "--dot" => do_dot = true,
            "--errors" => match next_arg(&mut iter, arg)? {
                "eager" => errors = ErrorReporting::Eager,
                "off" => errors = ErrorReporting::Off,
                other => bail!("Unexpected argument to --errors: {other}"),
            },
            "--bench" => do_bench = true,
            "--iters" => {
                let n = next_arg(&mut iter, arg)?;
                bench_iters = n
                    .parse::<u32>()
                    .with_context(|| format!("Expected number, got {n}"))?;
            }
            _ => files.push(arg),
        }
    }

    let path: PathBuf = match files.as_slice() {
        [] => bail!("No file provided"),
        [file] => file.into(),
        _ => bail!("Only one file may be provided"),
    };

    let src = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read `{}`", path.display()))?;

    let err = ErrorAccumulator::new();
    let runner = PhaseRunner::new(&path, src.len(), &err, errors, do_bench, bench_iters);

    let file = runner.run("parse", || serde_json::from_str::<GrammarFile>(&src));
    let file = file.with_context(|| format!("Malformed grammar `{}`", path.display()))?;
    let config = Config::new(file.options.clone())?;
    let options = config.compile_options();

    let grammar = runner.run("load", || load(&file))?;
    let (grammar, compiled): (Grammar, Compiled) = runner.run("compile", || {
        err.clear();
        let mut grammar = grammar.clone();
        let compiled = grammar.compile(&options, &err);
        (grammar, compiled)
    });

    let ok = compiled.failures.is_empty() && !err.has_errors();
    runner.report_errors();
    for failure in &compiled.failures {
        let rule = &grammar.rules[failure.rule];
        match failure.error.span() {
            Some(span) => eprintln!("{}:{span}: {}: {}", path.display(), rule.name, failure.error),
            None => eprintln!("{}: {}: {}", path.display(), rule.name, failure.error),
        }
    }

    if do_tree {
        grammar.display_rules(&mut StdoutSink);
        println!();
    }

    if do_classify {
        for classified in compiled.left_recursion.values().flatten() {
            classified.display_into(&mut StdoutSink);
        }
        println!();
    }

    if do_statements {
        compiled.atn.display_statements(&mut StdoutSink, &grammar);
    }

    if do_dot {
        compiled.atn.debug_graphviz(&mut StdoutSink, &grammar);
        println!();
    }

    Ok(ok)
}
