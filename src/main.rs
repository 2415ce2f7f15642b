use clap::Parser;
use std::fs;
use std::path::Path;
use std::process;

use vm_optimize::{
    canonicalize, ChangeReporter, Document, OptimizationEngine, ReportFormat,
};

#[derive(Parser, Debug)]
#[command(name = "vm-optimize")]
#[command(about = "Apply VirtIO optimizations to a libvirt domain XML descriptor")]
struct Args {
    /// Path to the domain XML descriptor
    domain_file: String,

    /// Where to write the optimized descriptor (default: a fresh optimized-*.xml)
    #[arg(long, value_name = "FILE")]
    output: Option<String>,

    /// Show proposed changes without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Report rendering format
    #[arg(long, value_enum, default_value = "console")]
    format: CliFormat,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliFormat {
    Console,
    Json,
    Yaml,
}

impl From<CliFormat> for ReportFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Console => ReportFormat::Console,
            CliFormat::Json => ReportFormat::Json,
            CliFormat::Yaml => ReportFormat::Yaml,
        }
    }
}

fn main() {
    let args = Args::parse();

    let original_text =
        fs::read_to_string(&args.domain_file).expect("Failed to read the domain XML file");

    let document = match Document::parse(&original_text) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("\n❌ Error: {e}");
            process::exit(1);
        }
    };

    let engine = OptimizationEngine::new();
    let outcome = engine.transform(document);
    let optimized_text =
        canonicalize(&outcome.document).expect("Failed to serialize the optimized descriptor");

    let reporter = ChangeReporter::new().with_format(args.format.into());
    let report = reporter.generate_report(&outcome.changes, &original_text, &optimized_text);
    let rendered = reporter.format_report(&report).expect("Failed to render the report");
    println!("{rendered}");

    if outcome.is_already_optimized() {
        return;
    }

    if args.dry_run {
        println!("[Dry run - no changes applied]");
        return;
    }

    let output_file = args
        .output
        .unwrap_or_else(|| unique_output_name(&args.domain_file));
    fs::write(&output_file, &optimized_text).expect("Failed to write the optimized descriptor");

    println!("\n=== Optimization Complete ===");
    println!("  ✓ Output file: {output_file}");
    println!("  ℹ Apply it with: virsh define {output_file} (takes effect on next boot)");
}

// Never clobber an existing file; pick the next free optimized-*.xml name.
fn unique_output_name(input: &str) -> String {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("domain");

    let mut count = 0;
    let mut file_name = format!("optimized-{stem}.xml");

    while Path::new(&file_name).exists() {
        count += 1;
        file_name = format!("optimized-{stem}-{count}.xml");
    }

    file_name
}
