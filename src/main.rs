// src/main.rs
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};

use credscan::cli::Args;
use credscan::common::{banner, logger, targets};
use credscan::engine::Engine;
use credscan::inputs;
use credscan::output::report::{ReportFormat, ReportWriter};
use credscan::plugins;

fn main() {
    let args = Args::parse();

    if let Err(e) = logger::init(args.verbose, args.silent, args.log_file.as_deref()) {
        eprintln!("ERROR: unable to initialize logging: {:#}", e);
        process::exit(1);
    }

    if !args.silent {
        banner::show();
    }

    if args.list_protocols {
        print!("{}", plugins::render_protocol_help());
        return;
    }

    if let Err(e) = run(&args) {
        eprintln!("ERROR: {:#}", e);
        process::exit(1);
    }
}

/// 配置检查与整场扫描。所有配置错误都在任何扫描开始之前返回,
/// 由 main 统一打印并以状态码 1 退出。
fn run(args: &Args) -> Result<()> {
    let target_file = args.targets.as_ref().context("target file was not defined")?;
    let output_file = args.output.as_ref().context("output file was not defined")?;
    let auth_file = args
        .auth_file
        .as_ref()
        .context("credential file was not defined")?;
    let protocol = args.protocol.as_ref().context("protocol was not defined")?;

    let scanner = plugins::lookup(protocol)
        .with_context(|| format!("unsupported protocol: {}", protocol))?;
    if !scanner.supported_auth().contains(&args.auth_type.as_str()) {
        bail!(
            "protocol {} does not support auth type {}",
            protocol,
            args.auth_type
        );
    }
    let mut strategy = inputs::make_strategy(&args.strategy)
        .with_context(|| format!("unknown enumeration strategy: {}", args.strategy))?;
    let format = ReportFormat::parse(&args.format)
        .with_context(|| format!("unknown report format: {}", args.format))?;
    if args.threads == 0 {
        bail!("thread count must be at least 1");
    }
    if args.timeout == 0 {
        bail!("timeout must be at least 1 second");
    }

    let cred_count = targets::load_credentials(auth_file, &args.auth_type, strategy.as_mut())?;
    if cred_count == 0 {
        bail!("no credentials loaded from {}", auth_file.display());
    }
    let target_count = targets::load_targets(target_file, strategy.as_mut())?;
    if target_count == 0 {
        bail!("no targets loaded from {}", target_file.display());
    }

    // 所有输入都校验完才创建报告文件, 配置错误不留半截输出
    let report = ReportWriter::create(output_file, format)
        .with_context(|| format!("unable to create output file {}", output_file.display()))?;

    info!(
        "scanning {} targets with {} credentials over {} ({} strategy, {} workers, {} jobs)",
        target_count,
        cred_count,
        scanner.name(),
        args.strategy,
        args.threads,
        target_count * cred_count
    );
    if !args.cmd.is_empty() {
        debug!("remote command: {}", args.cmd);
    }

    let engine = Engine::new(
        args.threads,
        args.cmd.clone(),
        Duration::from_secs(args.timeout),
    );
    let started = Instant::now();
    let tally = engine.run(strategy, Arc::from(scanner), report)?;

    info!(
        "scan complete: {} attempts, {} successful logins in {:.2}s, report written to {}",
        tally.attempts,
        tally.successes,
        started.elapsed().as_secs_f64(),
        output_file.display()
    );
    Ok(())
}
