// src/output/report.rs
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::output::flatten_newlines;
use crate::plugins::ScanResult;

/// csv 格式报告的表头行。
pub const CSV_HEADER: &str = "Host,Account,AuthData,Success,Message,Output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    pub fn parse(name: &str) -> Option<ReportFormat> {
        match name.to_lowercase().as_str() {
            "csv" => Some(ReportFormat::Csv),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

/// 报告写入器。csv 逐条追加记录, 六个字段全部双引号包裹,
/// 输出里的换行先压成 "<br>" 保证一行一条记录; json 先收集,
/// finish 时整体 pretty 打印。
pub struct ReportWriter<W: Write> {
    out: W,
    format: ReportFormat,
    header_written: bool,
    records: Vec<ScanResult>,
}

impl ReportWriter<BufWriter<File>> {
    /// 在启动阶段创建报告文件, 必要时先建父目录。失败属于配置错误。
    pub fn create(path: impl AsRef<Path>, format: ReportFormat) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(ReportWriter::new(BufWriter::new(file), format))
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        ReportWriter {
            out,
            format,
            header_written: false,
            records: Vec::new(),
        }
    }

    pub fn write_record(&mut self, result: &ScanResult) -> io::Result<()> {
        match self.format {
            ReportFormat::Csv => {
                if !self.header_written {
                    writeln!(self.out, "{}", CSV_HEADER)?;
                    self.header_written = true;
                }
                writeln!(
                    self.out,
                    "{},{},{},{},{},{}",
                    quote(&result.host),
                    quote(&result.cred.account),
                    quote(&result.cred.auth_data),
                    quote(if result.status { "true" } else { "false" }),
                    quote(&result.message),
                    quote(&flatten_newlines(&result.output)),
                )
            }
            ReportFormat::Json => {
                self.records.push(result.clone());
                Ok(())
            }
        }
    }

    pub fn finish(&mut self) -> io::Result<()> {
        match self.format {
            ReportFormat::Json => {
                let rendered = serde_json::to_string_pretty(&self.records)?;
                self.out.write_all(rendered.as_bytes())?;
                self.out.write_all(b"\n")?;
            }
            ReportFormat::Csv => {
                // 空结果集也要落表头
                if !self.header_written {
                    writeln!(self.out, "{}", CSV_HEADER)?;
                    self.header_written = true;
                }
            }
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
