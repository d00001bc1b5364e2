// src/inputs/random.rs
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::Rng;

use super::{Job, Strategy, JOB_BUFFER};
use crate::plugins::Credential;

/// 随机顺序: 先在内存中物化完整叉积, 线性洗牌后发射。
/// 代价是 O(|目标|×|凭据|) 的内存, 与流式的 wide/deep 不同。
pub struct Random {
    targets: Vec<String>,
    creds: Vec<Credential>,
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Random {
    pub fn new() -> Self {
        let (tx, rx) = bounded(JOB_BUFFER);
        Random {
            targets: Vec::new(),
            creds: Vec::new(),
            tx,
            rx,
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Random {
    fn description(&self) -> &'static str {
        "the full cross product in uniformly random order"
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
        let mut jobs = Vec::with_capacity(self.targets.len() * self.creds.len());
        for target in &self.targets {
            for cred in &self.creds {
                jobs.push(Job {
                    target: target.clone(),
                    cred: cred.clone(),
                });
            }
        }
        // 线性洗牌: 第 i 项与 [0, i] 中均匀随机的一项交换
        let mut rng = rand::thread_rng();
        for i in 0..jobs.len() {
            let j = rng.gen_range(0..=i);
            jobs.swap(i, j);
        }
        for job in jobs {
            if self.tx.send(job).is_err() {
                return;
            }
        }
    }
}
