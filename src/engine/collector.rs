// src/engine/collector.rs
use std::io::Write;

use colored::Colorize;
use crossbeam_channel::{select, Receiver};
use log::warn;

use crate::output::report::ReportWriter;
use crate::plugins::ScanResult;

/// 一次运行的统计, 收集线程退出时返回。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    pub attempts: usize,
    pub successes: usize,
}

/// 结果收集器: 结果通道的唯一消费者。每条结果打一行控制台、写一条报告
/// 记录; 收到停止信号后刷新报告退出。协议约定停止信号在所有工作线程
/// 结束之后才发送, 而结果通道是零容量的 rendezvous 通道, 所以停止信号
/// 到达时不可能还有在途结果。
pub struct Collector<W: Write> {
    report: ReportWriter<W>,
    tally: RunTally,
}

impl<W: Write> Collector<W> {
    pub fn new(report: ReportWriter<W>) -> Self {
        Collector {
            report,
            tally: RunTally::default(),
        }
    }

    pub fn run(mut self, results: Receiver<ScanResult>, stop: Receiver<()>) -> (RunTally, ReportWriter<W>) {
        println!(
            "{:<20}  {:<20}  {:<20}    {}",
            "Hostname", "Username", "Password", "Result"
        );
        loop {
            select! {
                recv(results) -> msg => match msg {
                    Ok(result) => self.record(&result),
                    Err(_) => {
                        // 生产端全部退出, 只剩停止信号可等
                        let _ = stop.recv();
                        break;
                    }
                },
                recv(stop) -> _ => break,
            }
        }
        if let Err(e) = self.report.finish() {
            warn!("failed to flush report: {}", e);
        }
        (self.tally, self.report)
    }

    fn record(&mut self, result: &ScanResult) {
        let status = if result.status {
            "Success".green().bold().to_string()
        } else {
            "Failed".red().to_string()
        };
        println!(
            "{:<20.20}  {:<20.20}  {:<20.20}    {}",
            result.host, result.cred.account, result.cred.auth_data, status
        );
        if let Err(e) = self.report.write_record(result) {
            warn!("failed to write report record for {}: {}", result.host, e);
        }
        self.tally.attempts += 1;
        if result.status {
            self.tally.successes += 1;
        }
    }
}
