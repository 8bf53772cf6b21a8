//! fieldmap CLI - Map supplier data onto a catalog schema
//!
//! # Main Commands
//!
//! ```bash
//! fieldmap serve                          # Start HTTP server (port 3000)
//! fieldmap map input.csv -r rules.json    # Map rows, print JSON result
//! fieldmap export input.csv -r rules.json # Map rows, write CSV
//! fieldmap rules list                     # Manage stored rule sets
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! fieldmap parse input.csv                # Just parse CSV to JSON
//! fieldmap check-rules rules.json         # Load and check a rules document
//! fieldmap validate rows.json -r rules.json
//! fieldmap example-rules                  # Print a sample rules document
//! ```

use clap::{Parser, Subcommand};
use fieldmap::config::Config;
use fieldmap::logging::{init_logging, LogConfig, LogFormat};
use fieldmap::{
    enrich_file, enrich_with_rules, example_rules, map_batch, parse_csv_file_auto, validate_rows,
    EnrichOptions, EnrichResult, MappedRow, MappingRules, RulesRegistry,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "fieldmap")]
#[command(about = "Map supplier product data onto a catalog schema and export CSV", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the rules for a run come from
#[derive(clap::Args, Debug, Clone)]
struct RulesArgs {
    /// Rules document (JSON)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Stored rule set ID
    #[arg(long, conflicts_with = "rules")]
    rules_id: Option<String>,

    /// Don't search stored rule sets for a compatible one
    #[arg(long)]
    no_cache: bool,
}

impl RulesArgs {
    fn options(&self, rules_dir: &Path) -> EnrichOptions {
        EnrichOptions {
            rules_path: self.rules.clone(),
            rules_id: self.rules_id.clone(),
            no_cache: self.no_cache,
            registry_dir: Some(rules_dir.to_path_buf()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Map a CSV (or JSON array of records) and output the JSON result
    Map {
        /// Input CSV file, or .json array of flat records
        input: PathBuf,

        #[command(flatten)]
        rules: RulesArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Map a CSV and write the valid rows as CSV
    Export {
        /// Input CSV file
        input: PathBuf,

        #[command(flatten)]
        rules: RulesArgs,

        /// Output CSV file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a rules document and report problems
    CheckRules {
        /// Rules document (JSON)
        rules: PathBuf,
    },

    /// Parse a CSV file and output JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate mapped rows (JSON array) against a rules document
    Validate {
        /// Input JSON file (array of mapped rows)
        input: PathBuf,

        /// Rules document (JSON)
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// Show an example rules document
    ExampleRules,

    /// Start HTTP server
    Serve {
        /// Port to listen on (default: FIELDMAP_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage stored rule sets
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List all stored rule sets
    List,

    /// Import a rules document
    Import {
        /// Rules JSON file to import
        file: PathBuf,
        /// Name for the rule set
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show details of a rule set
    Show {
        /// Rule set ID
        id: String,
    },

    /// Delete a rule set
    Delete {
        /// Rule set ID
        id: String,
    },

    /// Use a specific rule set to export a CSV
    Use {
        /// Rule set ID
        id: String,
        /// Input CSV file
        input: PathBuf,
        /// Output CSV file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    let log_config = LogConfig::from_verbosity(cli.verbose).with_format(config.log_format);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("⚠️  Logging disabled: {}", e);
    }

    let result = match cli.command {
        Commands::Map {
            input,
            rules,
            output,
        } => cmd_map(&input, &rules.options(&config.rules_dir), output.as_deref()),

        Commands::Export {
            input,
            rules,
            output,
        } => cmd_export(&input, &rules.options(&config.rules_dir), output.as_deref()),

        Commands::CheckRules { rules } => cmd_check_rules(&rules),

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::Validate { input, rules } => cmd_validate(&input, &rules),

        Commands::ExampleRules => cmd_example_rules(),

        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            fieldmap::server::start_server(&config).await
        }

        Commands::Rules { action } => cmd_rules(action, &config),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_map(input: &Path, options: &EnrichOptions, output: Option<&Path>) -> CliResult {
    eprintln!("📄 Mapping: {}", input.display());

    if input.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        let path = options
            .rules_path
            .as_deref()
            .ok_or("mapping JSON records requires --rules")?;
        let rules = MappingRules::load_path(path)?;
        let records: Vec<Value> = serde_json::from_str(&fs::read_to_string(input)?)?;

        let batch = map_batch(&records, &rules);
        eprintln!("   {}", batch.summary());
        return write_output(&serde_json::to_string_pretty(&batch)?, output);
    }

    let result = enrich_file(input, options)?;
    print_result(&result);
    write_output(&serde_json::to_string_pretty(&result.batch)?, output)
}

fn cmd_export(input: &Path, options: &EnrichOptions, output: Option<&Path>) -> CliResult {
    eprintln!("📄 Exporting: {}", input.display());

    let result = enrich_file(input, options)?;
    print_result(&result);
    write_output(&result.csv, output)
}

fn print_result(result: &EnrichResult) {
    let info = &result.csv_info;
    eprintln!("   Encoding: {}", info.encoding);
    eprintln!("   Delimiter: '{}'", format_delimiter(info.delimiter));
    eprintln!("   Rows: {}", info.row_count);
    if let Some(ref id) = result.rules_id {
        eprintln!("   Rules: {}", id);
    }

    let batch = &result.batch;
    eprintln!("\n✔️  {}", batch.summary());
    for issue in batch.errors.iter().take(5) {
        eprintln!("   - {}", issue);
    }
    if batch.errors.len() > 5 {
        eprintln!("   ... +{} more", batch.errors.len() - 5);
    }
    for warning in batch.warnings.iter().take(3) {
        eprintln!("   ⚠️  {}", warning);
    }
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn cmd_check_rules(path: &Path) -> CliResult {
    eprintln!("✔️  Checking rules: {}", path.display());
    let rules = MappingRules::load_path(path)?;

    eprintln!("   Source fields: {}", rules.source_fields().join(", "));
    eprintln!("   Output columns: {}", rules.output_format.columns.join(", "));
    eprintln!("   Required: {}", rules.validation.required.join(", "));
    eprintln!(
        "   {} fixed, {} generated, {} transformed",
        rules.fixed_values.len(),
        rules.auto_generate.len(),
        rules.transformations.len()
    );
    eprintln!("✅ Rules are valid");
    Ok(())
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> CliResult {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let result = parse_csv_file_auto(input)?;
    eprintln!("   Encoding: {}", result.encoding);
    eprintln!("   Delimiter: '{}' (auto-detected)", format_delimiter(result.delimiter));
    eprintln!("   Columns: {}", result.headers.join(", "));
    eprintln!("✅ Parsed {} records", result.records.len());

    write_output(&serde_json::to_string_pretty(&result.records)?, output)
}

fn cmd_validate(input: &Path, rules_path: &Path) -> CliResult {
    eprintln!("✔️  Validating: {}", input.display());

    let rules = MappingRules::load_path(rules_path)?;
    let rows: Vec<MappedRow> = serde_json::from_str(&fs::read_to_string(input)?)?;

    let invalid = validate_rows(&rows, &rules);
    for (row, errors) in invalid.iter().take(5) {
        eprintln!("\n❌ Row {} invalid:", row);
        for err in errors.iter().take(3) {
            eprintln!("   - {}", err);
        }
    }

    eprintln!(
        "\n📊 Results: {} valid, {} invalid",
        rows.len() - invalid.len(),
        invalid.len()
    );

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(format!("{} invalid rows", invalid.len()).into())
    }
}

fn cmd_example_rules() -> CliResult {
    println!("{}", example_rules().to_json()?);
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

fn cmd_rules(action: RulesAction, config: &Config) -> CliResult {
    let mut registry = RulesRegistry::with_dir(&config.rules_dir);

    match action {
        RulesAction::List => {
            let all = registry.list();
            if all.is_empty() {
                eprintln!("📋 No rule sets stored yet.");
                eprintln!("   Use 'fieldmap rules import <file>' to add one.");
                return Ok(());
            }

            eprintln!("📋 Stored rule sets ({}):\n", all.len());
            for r in all {
                println!("  📄 {} ({})", r.name, r.id);
                println!("     Columns: {}", r.source_columns.join(", "));
                println!("     Success rate: {:.0}%", r.success_rate * 100.0);
                println!("     Uses: {}", r.use_count);
                if let Some(ref last) = r.last_used {
                    println!("     Last used: {}", last);
                }
                println!();
            }
        }

        RulesAction::Import { file, name } => {
            eprintln!("📥 Importing rules from: {}", file.display());
            let id = registry.import(&file, name.as_deref())?;
            eprintln!("✅ Rules saved with ID: {}", id);
        }

        RulesAction::Show { id } => {
            let r = registry.get(&id)?;
            println!("📄 Rules: {} ({})\n", r.name, r.id);
            println!("Source columns: {}", r.source_columns.join(", "));
            println!("Created: {}", r.created_at);
            println!("Success rate: {:.0}%", r.success_rate * 100.0);
            println!("Uses: {}", r.use_count);
            println!("\n{}", r.rules.to_json()?);
        }

        RulesAction::Delete { id } => {
            registry.delete(&id)?;
            eprintln!("🗑️  Rules deleted: {}", id);
        }

        RulesAction::Use { id, input, output } => {
            let stored = registry.get(&id)?;
            eprintln!("📄 Using rules: {} ({})", stored.name, stored.id);
            let rules = stored.rules.clone();

            let parsed = parse_csv_file_auto(&input)?;
            eprintln!("   Found {} rows", parsed.records.len());

            let result = enrich_with_rules(&parsed, &rules);
            registry.update_stats(&id, result.batch.stats.valid_rows > 0)?;
            eprintln!("   {}", result.batch.summary());

            write_output(&result.csv, output.as_deref())?;
        }
    }

    Ok(())
}
