//! Tokenizes a file with TextMate grammars and prints the tokens of every line.
//!
//! Usage:
//!   tmline-cli --grammar rust.json src/main.rs
//!   tmline-cli --grammar html.json --grammar css.json --theme dark.json --binary page.html
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tmline::themes::RawTheme;
use tmline::{Registry, StateStack, TokenizeOptions, decode_binary_tokens};

#[derive(Parser, Debug)]
#[command(version, about = "Tokenize a file with TextMate grammars")]
struct Cli {
    /// Grammar JSON files to load. Grammars can include each other.
    #[arg(short, long = "grammar", required = true)]
    grammars: Vec<PathBuf>,

    /// Name or scope name of the grammar to tokenize with, the first loaded one by default
    #[arg(short, long)]
    scope: Option<String>,

    /// VS Code JSON theme, used for the metadata of binary tokens
    #[arg(short, long)]
    theme: Option<PathBuf>,

    /// Print (offset, metadata) tokens instead of scopes
    #[arg(short, long)]
    binary: bool,

    /// Give up on a line after that many milliseconds
    #[arg(long)]
    time_limit_ms: Option<u64>,

    /// File to tokenize
    file: PathBuf,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = Registry::new();
    let mut first_grammar = None;
    for path in &cli.grammars {
        let id = registry.add_grammar_from_path(path)?;
        first_grammar.get_or_insert(id);
    }
    if let Some(path) = &cli.theme {
        registry.set_theme(RawTheme::load_from_file(path)?.compile()?);
    }

    let grammar = match &cli.scope {
        Some(name) => registry.require_grammar(name)?,
        None => first_grammar
            .and_then(|id| registry.grammar_by_id(id))
            .ok_or("no grammar loaded")?,
    };

    let mut options = TokenizeOptions::new();
    if let Some(ms) = cli.time_limit_ms {
        options = options.time_limit(Duration::from_millis(ms));
    }

    let text = std::fs::read_to_string(&cli.file)?;
    let mut state: Option<StateStack> = None;
    for (i, line) in text.lines().enumerate() {
        println!("{:>4}: {line:?}", i + 1);
        if cli.binary {
            let result = grammar.tokenize_line_binary_with_options(line, state.as_ref(), options)?;
            for (span, metadata) in decode_binary_tokens(&result.tokens, line.len()) {
                let style = registry.theme().style_for_metadata(metadata);
                println!(
                    "      [{}..{}) fg={} bg={} {:?} {:?}",
                    span.start,
                    span.end,
                    style.foreground.as_hex(),
                    style.background.as_hex(),
                    style.font_style,
                    metadata.token_type(),
                );
            }
            if result.stopped_early {
                println!("      (stopped early)");
            }
            state = Some(result.rule_stack);
        } else {
            let result = grammar.tokenize_line_with_options(line, state.as_ref(), options)?;
            for token in &result.tokens {
                let scopes: Vec<&str> = token.scopes.iter().map(|s| s.as_str()).collect();
                println!(
                    "      [{}..{}) {:?} {}",
                    token.span.start,
                    token.span.end,
                    &line[token.span.clone()],
                    scopes.join(" ")
                );
            }
            if result.stopped_early {
                println!("      (stopped early)");
            }
            state = Some(result.rule_stack);
        }
    }

    Ok(())
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
