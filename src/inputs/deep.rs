// src/inputs/deep.rs
use crossbeam_channel::{bounded, Receiver, Sender};

use super::{Job, Strategy, JOB_BUFFER};
use crate::plugins::Credential;

/// 深度优先: 外层目标, 内层凭据。把一台主机的凭据空间打完再换下一台。
pub struct Deep {
    targets: Vec<String>,
    creds: Vec<Credential>,
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Deep {
    pub fn new() -> Self {
        let (tx, rx) = bounded(JOB_BUFFER);
        Deep {
            targets: Vec::new(),
            creds: Vec::new(),
            tx,
            rx,
        }
    }
}

impl Default for Deep {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Deep {
    fn description(&self) -> &'static str {
        "all credentials against one target before the next target"
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
        for target in &self.targets {
            for cred in &self.creds {
                let job = Job {
                    target: target.clone(),
                    cred: cred.clone(),
                };
                if self.tx.send(job).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{drain, populate};
    use super::*;

    #[test]
    fn emits_target_major_order() {
        // 两个目标两条凭据的完整任务序列
        let mut strategy = Deep::new();
        strategy.add_target("10.0.0.1".to_string());
        strategy.add_target("10.0.0.2".to_string());
        strategy.add_cred(Credential::new("basic", "admin", "pw1"));
        strategy.add_cred(Credential::new("basic", "root", "pw2"));
        let jobs = drain(&mut strategy);

        let order: Vec<(&str, &str)> = jobs
            .iter()
            .map(|j| (j.target.as_str(), j.cred.account.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("10.0.0.1", "admin"),
                ("10.0.0.1", "root"),
                ("10.0.0.2", "admin"),
                ("10.0.0.2", "root"),
            ]
        );
    }

    #[test]
    fn earlier_targets_fully_precede_later_ones() {
        let mut strategy = Deep::new();
        populate(&mut strategy, &["h1", "h2", "h3", "h4"], &["a1", "a2"]);
        let jobs = drain(&mut strategy);

        let hosts = ["h1", "h2", "h3", "h4"];
        let index_of = |host: &str| hosts.iter().position(|h| *h == host).unwrap();
        let positions: Vec<usize> = jobs.iter().map(|j| index_of(&j.target)).collect();
        for w in positions.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}
