//! Ledgermerge CLI - merge bank statement exports into one table
//!
//! # Main Commands
//!
//! ```bash
//! ledgermerge import a.xlsx b.csv --bank 招商银行   # Register source files
//! ledgermerge merge                                # Merge all imported files
//! ledgermerge serve                                # Start HTTP server (port 3000)
//! ```
//!
//! # Configuration Commands
//!
//! ```bash
//! ledgermerge fields                               # Show standard fields
//! ledgermerge detect a.xlsx                        # Show detected header
//! ledgermerge mapping show a.xlsx                  # Show field mapping
//! ledgermerge mapping set a.xlsx -m balance=余额   # Edit field mapping
//! ledgermerge rule parse "每50行分页" --bank 招商银行 --save
//! ledgermerge rule list
//! ```

use clap::{Parser, Subcommand};
use ledgermerge::store::files::resolve_path;
use ledgermerge::{
    merge_files, AppConfig, OutputFormat, FieldMapping, FieldMappingStore, FileRegistry, FileSheetReader, FileStatus,
    HeaderDetector, HeaderInfo, MergeOptions, RuleParser, RuleStore, SchemaRegistry, SheetReader, SourceFile,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ledgermerge")]
#[command(about = "Merge heterogeneous bank statement exports into one canonical table", long_about = None)]
struct Cli {
    /// Directory holding mappings, rules and the file registry
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the standard fields in output order
    Fields,

    /// Detect the header of a spreadsheet
    Detect {
        /// Input spreadsheet
        file: PathBuf,
    },

    /// Register spreadsheets for merging
    Import {
        /// Input spreadsheets
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Bank scope whose rules apply to these files
        #[arg(short, long)]
        bank: Option<String>,
    },

    /// List imported spreadsheets
    Files,

    /// Unregister a spreadsheet
    Remove {
        file: PathBuf,
    },

    /// Manage field mappings
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Manage transformation rules
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Merge spreadsheets into one workbook (or CSV)
    Merge {
        /// Files to merge (default: all imported files)
        files: Vec<PathBuf>,

        /// Fail a whole file on its first rule error
        #[arg(long)]
        strict: bool,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output format (default: LEDGERMERGE_OUTPUT_FORMAT or xlsx)
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[derive(Subcommand)]
enum MappingAction {
    /// Show the mapping of a file (suggested if none is saved)
    Show {
        file: PathBuf,
    },

    /// Save a mapping, starting from the current one
    Set {
        file: PathBuf,

        /// `field=column`; an empty column leaves the field blank
        #[arg(short, long = "map", value_parser = parse_assignment)]
        map: Vec<(String, String)>,
    },

    /// Delete the saved mapping of a file
    Clear {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Parse a natural-language rule
    Parse {
        text: String,

        /// Bank scope of the rule
        #[arg(short, long)]
        bank: String,

        /// Save the rule
        #[arg(long)]
        save: bool,

        /// Heuristic parsing only
        #[arg(long)]
        no_ai: bool,
    },

    /// List rules
    List {
        /// Only this bank scope
        #[arg(short, long)]
        bank: Option<String>,
    },

    /// Delete a rule
    Delete {
        bank: String,
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let result = match cli.command {
        Commands::Fields => cmd_fields(&config),
        Commands::Detect { file } => cmd_detect(&file),
        Commands::Import { files, bank } => cmd_import(&config, &files, bank.as_deref()),
        Commands::Files => cmd_files(&config),
        Commands::Remove { file } => cmd_remove(&config, &file),
        Commands::Mapping { action } => cmd_mapping(&config, action),
        Commands::Rule { action } => cmd_rule(&config, action).await,
        Commands::Merge { files, strict, output_dir, format } => {
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(format) = format {
                config.output_format = format;
            }
            cmd_merge(&config, &files, strict || config.strict)
        }
        Commands::Serve { port } => cmd_serve(config, port).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn load_schema(config: &AppConfig) -> Result<Arc<SchemaRegistry>, Box<dyn std::error::Error>> {
    Ok(Arc::new(config.load_schema()?))
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (field, column) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=column, got '{}'", s))?;
    Ok((field.trim().to_string(), column.trim().to_string()))
}

fn detect(file: &Path) -> Result<HeaderInfo, Box<dyn std::error::Error>> {
    let sheet = FileSheetReader.read(file)?;
    Ok(HeaderDetector::new().detect(&sheet.rows)?)
}

fn cmd_fields(config: &AppConfig) -> CmdResult {
    let schema = load_schema(config)?;
    for (i, field) in schema.fields().iter().enumerate() {
        println!("{:>2}. {:<20} {:<8} {}", i + 1, field.name, field.value_type, field.description);
    }
    Ok(())
}

fn cmd_detect(file: &Path) -> CmdResult {
    eprintln!("📄 Detecting header: {}", file.display());
    let header = detect(file)?;

    println!("   Header row:  {}", header.header_row_index + 1);
    println!("   Data starts: {}", header.data_start_row + 1);
    println!("   Columns:     {}", header.columns.join(", "));
    println!("   Balance:     {}", header.balance_column.as_deref().unwrap_or("(none)"));
    Ok(())
}

fn cmd_import(config: &AppConfig, files: &[PathBuf], bank: Option<&str>) -> CmdResult {
    let mut registry = FileRegistry::open(config.files_path())?;
    let mut failed = 0;

    for file in files {
        let mut source = SourceFile::new(file.display().to_string());
        match detect(file) {
            Ok(header) => {
                source.detected_header_row = Some(header.header_row_index);
                source.detected_columns = header.columns;
            }
            Err(e) => eprintln!("   ⚠️  {}: {}", file.display(), e),
        }
        if let Some(bank) = bank {
            source = source.with_bank_scope(bank);
        }

        match registry.import(source) {
            Ok(imported) => eprintln!("   ✓ {}", imported.path),
            Err(e) => {
                failed += 1;
                eprintln!("   ❌ {}", e);
            }
        }
    }

    eprintln!("📥 {} file(s) registered", registry.len());
    if failed > 0 {
        return Err(format!("{} file(s) not imported", failed).into());
    }
    Ok(())
}

fn cmd_files(config: &AppConfig) -> CmdResult {
    let registry = FileRegistry::open(config.files_path())?;
    if registry.is_empty() {
        eprintln!("📋 No files imported yet.");
        eprintln!("   Use 'ledgermerge import <files>' to add some.");
        return Ok(());
    }

    eprintln!("📋 Imported files ({}):\n", registry.len());
    for file in registry.list() {
        println!("  📄 {}", file.display_name);
        println!("     Path: {}", file.path);
        println!("     Imported: {}", file.import_timestamp.to_rfc3339());
        if let Some(bank) = &file.bank_scope {
            println!("     Bank: {}", bank);
        }
        if !file.detected_columns.is_empty() {
            println!("     Columns: {}", file.detected_columns.join(", "));
        }
        println!();
    }
    Ok(())
}

fn cmd_remove(config: &AppConfig, file: &Path) -> CmdResult {
    let mut registry = FileRegistry::open(config.files_path())?;
    let removed = registry.remove(file)?;
    eprintln!("🗑️  Removed: {}", removed.path);
    Ok(())
}

fn cmd_mapping(config: &AppConfig, action: MappingAction) -> CmdResult {
    let schema = load_schema(config)?;
    let mut store = FieldMappingStore::open(config.mapping_path(), schema.clone())?;

    match action {
        MappingAction::Show { file } => {
            let key = resolve_path(&file);
            let header = detect(&file)?;
            if !store.has_mapping(&key) {
                eprintln!("💡 No saved mapping, showing suggestions");
            }
            for mapping in store.get_mapping(&key, &header.columns) {
                println!(
                    "  {:<20} ← {}",
                    mapping.standard_field,
                    mapping.active_column().unwrap_or("(blank)")
                );
            }
        }

        MappingAction::Set { file, map } => {
            let key = resolve_path(&file);
            let header = detect(&file)?;
            let mut mappings = store.get_mapping(&key, &header.columns);

            for (field, column) in map {
                let entry = if column.is_empty() {
                    FieldMapping::unmapped(&key, &field)
                } else {
                    FieldMapping::mapped(&key, &field, &column)
                };
                match mappings.iter_mut().find(|m| m.standard_field == field) {
                    Some(existing) => *existing = entry,
                    None => mappings.push(entry),
                }
            }

            store.set_mapping(&key, &header.columns, &mappings)?;
            eprintln!("✅ Mapping saved for {}", key);
        }

        MappingAction::Clear { file } => {
            let key = resolve_path(&file);
            if store.remove_mapping(&key)? {
                eprintln!("🗑️  Mapping cleared for {}", key);
            } else {
                eprintln!("No saved mapping for {}", key);
            }
        }
    }
    Ok(())
}

async fn cmd_rule(config: &AppConfig, action: RuleAction) -> CmdResult {
    let mut store = RuleStore::open(config.rules_path())?;

    match action {
        RuleAction::Parse { text, bank, save, no_ai } => {
            let schema = load_schema(config)?;
            let parser = if no_ai {
                RuleParser::heuristic_only(schema)
            } else {
                RuleParser::from_config(schema, &config.ai)
            };

            let rule = parser.parse(&text, &bank).await;
            println!("📐 {} ({:?})", rule.describe(), rule.created_from);
            println!("{}", serde_json::to_string_pretty(&rule)?);

            if save {
                let replaced = store.upsert(rule.clone())?;
                match replaced {
                    Some(_) => eprintln!("💾 Rule {} replaced", rule.id),
                    None => eprintln!("💾 Rule {} saved", rule.id),
                }
            }
        }

        RuleAction::List { bank } => {
            let scopes: Vec<String> = match bank {
                Some(bank) => vec![bank],
                None => store.scopes().into_iter().map(String::from).collect(),
            };
            if scopes.is_empty() {
                eprintln!("📋 No rules stored yet.");
                return Ok(());
            }
            for scope in scopes {
                println!("🏦 {}", scope);
                for rule in store.rules_for(&scope) {
                    println!("   {}  [{:?}/{:?}] {}", rule.id, rule.stage(), rule.created_from, rule.describe());
                }
            }
        }

        RuleAction::Delete { bank, id } => {
            let removed = store.remove(&bank, &id)?;
            eprintln!("🗑️  Rule deleted: {}", removed.describe());
        }
    }
    Ok(())
}

fn cmd_merge(config: &AppConfig, files: &[PathBuf], strict: bool) -> CmdResult {
    let schema = load_schema(config)?;
    let outcome = merge_files(config, schema, files, MergeOptions { strict })?;
    let report = &outcome.report;

    println!("\n{}", "=".repeat(70));
    println!("📊 SUMMARY");
    println!("{}", "=".repeat(70));
    for file in &report.files {
        match &file.status {
            FileStatus::Succeeded => println!(
                "   ✓ {:<30} {} rows, {} skipped, {} filtered{}",
                file.display_name,
                file.rows,
                file.skipped.len(),
                file.filtered,
                if file.suggested_mapping { " (suggested mapping)" } else { "" }
            ),
            FileStatus::Failed { kind, message } => {
                println!("   ❌ {:<30} {}: {}", file.display_name, kind, message)
            }
        }
        for skipped in file.skipped.iter().take(5) {
            println!("        row {}: {}", skipped.row, skipped.reason);
        }
    }
    println!("   Rows:      {}", report.table.len());
    println!("   Succeeded: {}", report.succeeded());
    println!("   Failed:    {}", report.failed());
    println!("{}\n", "=".repeat(70));

    match &outcome.output_path {
        Some(path) => {
            eprintln!("💾 Output written to: {}", path.display());
            Ok(())
        }
        None => Err("no file could be merged".into()),
    }
}

async fn cmd_serve(config: AppConfig, port: u16) -> CmdResult {
    ledgermerge::server::start_server(config, port).await
}
