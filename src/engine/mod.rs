// src/engine/mod.rs
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::debug;

use crate::inputs::{Job, Strategy};
use crate::output::report::ReportWriter;
use crate::plugins::{ScanResult, Scanner};

pub mod collector;

use collector::{Collector, RunTally};

/// 调度器: 持有任务、结果、关停三类通道和全部线程句柄的唯一所有者。
/// 一次 run() 完成 启动收集器 -> 启动工作线程 -> 发射任务 ->
/// 关停工作线程 -> 关停收集器 的完整生命周期。
pub struct Engine {
    workers: usize,
    command: String,
    timeout: Duration,
}

impl Engine {
    pub fn new(workers: usize, command: String, timeout: Duration) -> Self {
        Engine {
            workers: workers.max(1),
            command,
            timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 执行一次完整扫描。任务在当前线程上发射 (run 返回即全部入队),
    /// 之后才向每个工作线程发一个关停信号, 等全部工作线程汇合后再停止
    /// 收集器, 所以任何结果都不会丢。
    pub fn run<W: Write + Send + 'static>(
        &self,
        mut strategy: Box<dyn Strategy>,
        scanner: Arc<dyn Scanner>,
        report: ReportWriter<W>,
    ) -> Result<RunTally> {
        let jobs = strategy.jobs();
        // 结果通道零容量: 工作线程的 send 返回即表示收集器已接收
        let (result_tx, result_rx) = bounded::<ScanResult>(0);
        let (done_tx, done_rx) = bounded::<()>(self.workers);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let collector = Collector::new(report);
        let collector_handle = thread::spawn(move || collector.run(result_rx, stop_rx));

        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let worker = Worker {
                id,
                scanner: Arc::clone(&scanner),
                command: self.command.clone(),
                timeout: self.timeout,
                jobs: jobs.clone(),
                done: done_rx.clone(),
                results: result_tx.clone(),
            };
            handles.push(thread::spawn(move || worker.run()));
        }

        strategy.run();
        debug!("all jobs emitted, signalling {} workers to stop", self.workers);
        // 每个工作线程恰好一个信号, 只在全部任务入队之后发送
        for _ in 0..self.workers {
            let _ = done_tx.send(());
        }
        for handle in handles {
            let _ = handle.join();
        }
        debug!("all workers joined, stopping collector");
        let _ = stop_tx.send(());
        let (tally, _report) = collector_handle
            .join()
            .map_err(|_| anyhow!("result collector thread panicked"))?;
        Ok(tally)
    }
}

/// 工作线程: 反复从任务通道取一个任务交给协议插件, 结果写入结果通道。
struct Worker {
    id: usize,
    scanner: Arc<dyn Scanner>,
    command: String,
    timeout: Duration,
    jobs: Receiver<Job>,
    done: Receiver<()>,
    results: Sender<ScanResult>,
}

impl Worker {
    /// 任务和关停信号上的阻塞多路等待, 没有忙轮询分支。
    /// 拿到关停信号后先清空通道里剩余的任务再退出, 任务不会因关停丢失。
    fn run(self) {
        loop {
            select! {
                recv(self.jobs) -> msg => match msg {
                    Ok(job) => self.process(job),
                    Err(_) => {
                        // 任务通道断开, 不会再有新任务; 等走自己的信号
                        let _ = self.done.recv();
                        break;
                    }
                },
                recv(self.done) -> _ => {
                    while let Ok(job) = self.jobs.try_recv() {
                        self.process(job);
                    }
                    break;
                }
            }
        }
        debug!("worker {} finished", self.id);
    }

    fn process(&self, job: Job) {
        debug!(
            "worker {} scanning {} as {}",
            self.id, job.target, job.cred.account
        );
        self.scanner
            .scan(&job.target, &self.command, &job.cred, self.timeout, &self.results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::make_strategy;
    use crate::output::report::ReportFormat;
    use crate::plugins::Credential;
    use std::sync::Mutex;

    /// 记录每个到达的任务, admin 账号视为认证成功。
    struct MockScanner {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl MockScanner {
        fn new() -> Arc<Self> {
            Arc::new(MockScanner {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Scanner for MockScanner {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn description(&self) -> &'static str {
            "records every job"
        }
        fn supported_auth(&self) -> &'static [&'static str] {
            &["basic"]
        }
        fn auth_examples(&self) -> &'static [(&'static str, &'static str)] {
            &[("basic", "USERNAME,PASSWORD")]
        }
        fn attempt(
            &self,
            target: &str,
            _command: &str,
            cred: &Credential,
            _timeout: Duration,
        ) -> ScanResult {
            self.seen
                .lock()
                .unwrap()
                .push((target.to_string(), cred.account.clone()));
            if cred.account == "admin" {
                ScanResult::success(target, cred, "Successfully connected")
            } else {
                ScanResult::failure(target, cred, "Authentication failed")
            }
        }
    }

    fn run_engine(
        workers: usize,
        targets: &[&str],
        accounts: &[&str],
    ) -> (RunTally, Vec<(String, String)>) {
        let mut strategy = make_strategy("wide").unwrap();
        for t in targets {
            strategy.add_target(t.to_string());
        }
        for a in accounts {
            strategy.add_cred(Credential::new("basic", a, "pw"));
        }
        let scanner = MockScanner::new();
        let engine = Engine::new(workers, String::new(), Duration::from_secs(1));
        let report = ReportWriter::new(Vec::new(), ReportFormat::Csv);
        let tally = engine
            .run(strategy, Arc::clone(&scanner) as Arc<dyn Scanner>, report)
            .unwrap();
        let seen = scanner.seen.lock().unwrap().clone();
        (tally, seen)
    }

    #[test]
    fn every_job_is_scanned_exactly_once() {
        let targets = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];
        let accounts = ["admin", "root"];
        let (tally, mut seen) = run_engine(4, &targets, &accounts);

        assert_eq!(tally.attempts, 6);
        assert_eq!(tally.successes, 3); // admin 对每个目标都成功
        assert_eq!(seen.len(), 6);
        seen.sort();
        let mut expected: Vec<(String, String)> = Vec::new();
        for t in &targets {
            for a in &accounts {
                expected.push((t.to_string(), a.to_string()));
            }
        }
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn terminates_with_empty_job_stream() {
        let (tally, seen) = run_engine(8, &[], &[]);
        assert_eq!(tally, RunTally::default());
        assert!(seen.is_empty());
    }

    #[test]
    fn more_workers_than_jobs_still_drain_cleanly() {
        let (tally, seen) = run_engine(16, &["10.0.0.1"], &["admin"]);
        assert_eq!(tally.attempts, 1);
        assert_eq!(tally.successes, 1);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn single_worker_processes_everything_in_order_free_manner() {
        let (tally, _) = run_engine(1, &["h1", "h2"], &["a1", "a2", "a3"]);
        assert_eq!(tally.attempts, 6);
    }

    #[test]
    fn jobs_beyond_channel_capacity_all_arrive() {
        // 叉积 36 大于通道容量 20, 发射端必须与消费端交替推进
        let targets = ["t1", "t2", "t3", "t4", "t5", "t6"];
        let accounts = ["a1", "a2", "a3", "a4", "a5", "a6"];
        let (tally, seen) = run_engine(2, &targets, &accounts);
        assert_eq!(tally.attempts, 36);
        assert_eq!(seen.len(), 36);
    }

    #[test]
    fn zero_worker_request_is_clamped_to_one() {
        let engine = Engine::new(0, String::new(), Duration::from_secs(1));
        assert_eq!(engine.workers(), 1);
    }
}
