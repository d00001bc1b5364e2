use log::LevelFilter;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use anyhow::Result;
use chrono::Local;
use env_logger::{Builder, Target};

/// 初始化全局日志: -v 提到 Debug, -q 压到 Error, 默认 Info。
/// 指定 log_file 时日志写入文件, 否则走标准输出。
pub fn init(verbose: bool, silent: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else if silent {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };

    let mut builder = Builder::new();
    builder.filter_level(level);

    if let Some(path) = log_file {
        let file = File::create(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    } else {
        builder.target(Target::Stdout);
    }

    builder.format(|buf, record| {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(
            buf,
            "[{}] [{}] {}",
            timestamp,
            record.level(),
            record.args()
        )
    });

    builder.init();

    Ok(())
}
