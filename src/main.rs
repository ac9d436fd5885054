//! onto-export CLI: export a knowledge-base snapshot as an ontology document.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use kb_onto_export::config::ExportConfig;
use kb_onto_export::engine::OntologyExportEngine;
use kb_onto_export::kb::memory::MemoryKb;
use kb_onto_export::sink::JsonSink;

#[derive(Parser)]
#[command(name = "onto-export", version, about = "Ontology export over a knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an export and write the ontology document as JSON.
    Run {
        /// Knowledge-base snapshot (JSON).
        #[arg(long)]
        kb: PathBuf,

        /// Export configuration (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Output file. Defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Parse and validate an export configuration.
    CheckConfig {
        /// Export configuration (TOML).
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { kb, config, out } => {
            let config = ExportConfig::load(&config)?;
            let kb = MemoryKb::load_json(&kb)?;

            let mut engine = OntologyExportEngine::new(&kb, config);
            let mut sink = JsonSink::new();
            let report = engine.run(&mut sink)?;

            let document = sink.into_document();
            match out {
                Some(path) => {
                    document.write_to(&path)?;
                    println!("Wrote {}", path.display());
                    println!("{report}");
                }
                None => {
                    println!("{}", document.to_json_string()?);
                    eprintln!("{report}");
                }
            }
            if !report.is_complete() {
                miette::bail!("export stopped in state {}", report.state);
            }
        }

        Commands::CheckConfig { config } => {
            let parsed = ExportConfig::load(&config)?;
            println!("{}: ok", config.display());
            println!("  selection:          {}", parsed.selection.name());
            println!("  upward closure:     {}", parsed.upward_closure_enabled());
            println!("  non-atomic terms:   {}", parsed.include_non_atomic_terms);
            println!("  applicable:         {}", parsed.applicable_relations.join(", "));
            let json = serde_json::to_string_pretty(&parsed).into_diagnostic()?;
            tracing::debug!(config = %json, "parsed configuration");
        }
    }

    Ok(())
}
