//! pkgseal CLI entrypoint.
//!
//! This binary strips staged install trees, assembles their archives into a
//! binary repository, regenerates and signs repository indexes, and manages
//! signing keys. Progress is logged to stderr.

use camino::Utf8Path;
use clap::Parser;
use pkgseal_common::{CommandExecutor, SystemCommandExecutor};
use pkgseal_publisher::assemble::{ApkMkpkgWriter, AssembleOutcome};
use pkgseal_publisher::cli::{
    Cli, Command, IndexArgs, KeygenArgs, PackageArgs, PruneArgs, PublishArgs, SignArgs, StripArgs,
};
use pkgseal_publisher::config::PublishConfig;
use pkgseal_publisher::error::{PublishError, Result};
use pkgseal_publisher::package::PackageInfo;
use pkgseal_publisher::pipeline::{
    PipelineContext, PublishReport, fill_shared_libraries, index_repository, publish_package,
    resolve_epoch, run_post_build, strip_staged,
};
use pkgseal_publisher::repo::prune;
use pkgseal_publisher::sign::{KeygenRequest, SignInput, Signer, keygen, resolve_key_path};
use pkgseal_publisher::strip::{ElfMap, ScanelfInspector};
use std::io::Write;
use tracing_subscriber::filter::LevelFilter;

fn main() {
    let cli = Cli::parse();
    let mut stderr = std::io::stderr();
    if let Err(err) = init_logging(cli.log_level()) {
        write_stderr_line(&mut stderr, format!("error: {err}"));
    }
    let exit_code = exit_code_for_run_result(run(&cli), &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Installs the stderr subscriber; `log` records from the library are
/// forwarded to it.
fn init_logging(
    level: LevelFilter,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
}

fn run(cli: &Cli) -> Result<()> {
    let config = PublishConfig::load(&cli.config)?;
    let executor = SystemCommandExecutor;

    match &cli.command {
        Command::Strip(args) => run_strip(&config, &executor, args),
        Command::Package(args) => run_package(&config, &executor, args),
        Command::Publish(args) => run_publish(&config, &executor, args),
        Command::Index(args) => run_index(&config, &executor, args),
        Command::Prune(args) => run_prune(&config, args),
        Command::Sign(args) => run_sign(&config, &executor, args),
        Command::Keygen(args) => run_keygen(&config, &cli.config, &executor, args),
    }
}

fn load_elf_map(path: Option<&Utf8Path>) -> Result<ElfMap> {
    path.map_or_else(|| Ok(ElfMap::default()), ElfMap::load)
}

fn run_strip(config: &PublishConfig, executor: &dyn CommandExecutor, args: &StripArgs) -> Result<()> {
    let package = PackageInfo::load(&args.package)?;
    let elfs = load_elf_map(args.elf_map.as_deref())?;
    let epoch = resolve_epoch(None, &package.definition)?;
    let ctx = PipelineContext::new(config, executor, epoch);
    let inspector = ScanelfInspector::new(executor, &config.tools.scanelf);

    let report = strip_staged(&ctx, &package, &elfs, &inspector)?;
    log::info!(
        "{}: {} file(s) stripped, {} ignored",
        package.pkgname,
        report.stripped.len(),
        report.ignored.len()
    );
    if let Some(debug_root) = &report.debug_root {
        log::info!("debug files moved to {debug_root}");
    }
    Ok(())
}

fn run_package(
    config: &PublishConfig,
    executor: &dyn CommandExecutor,
    args: &PackageArgs,
) -> Result<()> {
    let mut package = PackageInfo::load(&args.package)?;
    package.force = args.force;
    let elfs = load_elf_map(args.elf_map.as_deref())?;
    fill_shared_libraries(&mut package, &elfs);
    let epoch = resolve_epoch(args.epoch, &package.definition)?;
    let ctx = PipelineContext::new(config, executor, epoch);
    let writer = ApkMkpkgWriter::new(executor, &config.tools.apk);

    let report = publish_package(&ctx, &package, &writer)?;
    log_report(&report);
    Ok(())
}

fn run_publish(
    config: &PublishConfig,
    executor: &dyn CommandExecutor,
    args: &PublishArgs,
) -> Result<()> {
    let mut package = PackageInfo::load(&args.package)?;
    package.force = args.force;
    let elfs = load_elf_map(args.elf_map.as_deref())?;
    let epoch = resolve_epoch(args.epoch, &package.definition)?;
    let ctx = PipelineContext::new(config, executor, epoch);
    let inspector = ScanelfInspector::new(executor, &config.tools.scanelf);
    let writer = ApkMkpkgWriter::new(executor, &config.tools.apk);

    let report = run_post_build(&ctx, &mut package, &elfs, &inspector, &writer)?;
    log_report(&report);
    Ok(())
}

fn log_report(report: &PublishReport) {
    for outcome in [Some(&report.main), report.debug.as_ref()].into_iter().flatten() {
        match outcome {
            AssembleOutcome::Created(archive) => log::info!("created {archive}"),
            AssembleOutcome::AlreadyFresh(archive) => log::debug!("kept {archive}"),
            AssembleOutcome::MissingStagedDir => {}
        }
    }
}

fn run_index(config: &PublishConfig, executor: &dyn CommandExecutor, args: &IndexArgs) -> Result<()> {
    for dir in &args.dirs {
        let epoch = resolve_epoch(args.epoch, dir)?;
        let ctx = PipelineContext::new(config, executor, epoch);
        index_repository(&ctx, dir)?;
    }
    Ok(())
}

fn run_prune(config: &PublishConfig, args: &PruneArgs) -> Result<()> {
    let arch = args.arch.as_deref().unwrap_or(&config.build.arch);
    let pruned = prune(&args.root, arch)?;
    log::debug!("{} archive(s) pruned", pruned.len());
    Ok(())
}

fn run_sign(config: &PublishConfig, executor: &dyn CommandExecutor, args: &SignArgs) -> Result<()> {
    let epoch = resolve_epoch(args.epoch, &args.file)?;
    let key = match &args.key {
        Some(key) => resolve_key_path(key, &config.paths.distdir),
        None => PipelineContext::new(config, executor, epoch)
            .signing_key()
            .ok_or(PublishError::NoSigningKey)?,
    };

    let container = Signer::new(executor, &config.tools.openssl).sign(
        &key,
        SignInput::File(&args.file),
        epoch,
    )?;
    let output = args.output_path();
    std::fs::write(&output, container).map_err(PublishError::io_at(&output))?;
    log::info!("signature written to {output}");
    Ok(())
}

fn run_keygen(
    config: &PublishConfig,
    config_path: &Utf8Path,
    executor: &dyn CommandExecutor,
    args: &KeygenArgs,
) -> Result<()> {
    let request = KeygenRequest {
        name: args.name.clone(),
        bits: args.bits,
    };
    keygen(&request, config, config_path, executor)?;
    Ok(())
}

/// Maps the run result to an exit code, printing the error and any causes
/// its message does not already include.
fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            for line in error_chain(&err) {
                write_stderr_line(stderr, line);
            }
            1
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut shown = err.to_string();
    let mut lines = vec![format!("error: {shown}")];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !shown.contains(&text) {
            lines.push(format!("  caused by: {text}"));
            shown = text;
        }
        source = cause.source();
    }
    lines
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort logging; ignore write failures.
    }
}
