// src/inputs/wide.rs
use crossbeam_channel::{bounded, Receiver, Sender};

use super::{Job, Strategy, JOB_BUFFER};
use crate::plugins::Credential;

/// 广度优先: 外层凭据, 内层目标。一条凭据先扫遍所有主机再换下一条,
/// 拉开对单台主机的连续尝试间隔, 降低锁定和告警风险。默认策略。
pub struct Wide {
    targets: Vec<String>,
    creds: Vec<Credential>,
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Wide {
    pub fn new() -> Self {
        let (tx, rx) = bounded(JOB_BUFFER);
        Wide {
            targets: Vec::new(),
            creds: Vec::new(),
            tx,
            rx,
        }
    }
}

impl Default for Wide {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Wide {
    fn description(&self) -> &'static str {
        "one credential across all targets before the next credential"
    }

    fn add_target(&mut self, target: String) {
        self.targets.push(target);
    }

    fn add_cred(&mut self, cred: Credential) {
        self.creds.push(cred);
    }

    fn jobs(&self) -> Receiver<Job> {
        self.rx.clone()
    }

    fn run(&mut self) {
        for cred in &self.creds {
            for target in &self.targets {
                let job = Job {
                    target: target.clone(),
                    cred: cred.clone(),
                };
                if self.tx.send(job).is_err() {
                    // 所有消费端已退出, 没有继续发射的意义
                    return;
                }
            }
        }
    }
}
