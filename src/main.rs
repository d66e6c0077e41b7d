use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use classfile_flattener::jar_convert::convert_jar_file;
use classfile_flattener::valuetype::ConvertOptions;

/// Rewrite a JAR so that value-capable classes travel in their flattened
/// value form.
#[derive(Parser, Debug)]
#[command(name = "flatten-jar", version, about)]
struct Cli {
    /// Input archive; the result is written next to it as
    /// `<name>-valuetypified.jar`
    jar: PathBuf,

    /// Keep arrays of value-capable classes as reference arrays
    #[arg(long)]
    no_array_rewrite: bool,

    /// Log every converted class and method
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // info by default, --verbose enables debug; RUST_LOG overrides
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("classfile_flattener", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let options = ConvertOptions {
        rewrite_value_arrays: !cli.no_array_rewrite,
    };
    let output = convert_jar_file(&cli.jar, &options)
        .with_context(|| format!("failed to convert {}", cli.jar.display()))?;
    println!("{} generated", output.display());
    Ok(())
}
