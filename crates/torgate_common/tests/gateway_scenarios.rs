//! End-to-end scenarios over the public engine API: pipeline + rules +
//! backup registry against real files in a temp directory, and redirect
//! handling against an in-memory packet filter.

use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use torgate_common::rules::{LinePresent, RedirectPresent};
use torgate_common::system::{PacketFilter, Proto, RedirectTuple};
use torgate_common::{Pipeline, Result, RunContext, RunMode, Stage};

fn run_ctx(mode: RunMode, backup_dir: &std::path::Path) -> RunContext {
    RunContext::new(mode, backup_dir, Arc::new(AtomicBool::new(false)))
}

#[test]
fn forwarding_line_scenario() {
    let dir = tempdir().unwrap();
    let sysctl_file = dir.path().join("sysctl.conf");
    fs::write(&sysctl_file, "").unwrap();
    let backup_dir = dir.path().join("backups");

    let stage = || {
        Stage::new("forwarding").rule(LinePresent::new(
            sysctl_file.clone(),
            "net.ipv4.ip_forward=1",
        ))
    };

    // run 1 appends the line and snapshots the empty baseline
    let pipeline = Pipeline::new(vec![stage()]);
    let mut ctx = run_ctx(RunMode::Apply, &backup_dir);
    let report = pipeline.execute(&mut ctx);
    assert!(report.succeeded());
    assert_eq!(report.stages[0].rules_applied, 1);
    assert_eq!(
        fs::read_to_string(&sysctl_file).unwrap(),
        "net.ipv4.ip_forward=1\n"
    );

    // run 2 is a pure no-op
    let pipeline = Pipeline::new(vec![stage()]);
    let mut ctx = run_ctx(RunMode::Apply, &backup_dir);
    let report = pipeline.execute(&mut ctx);
    assert!(report.succeeded());
    assert_eq!(report.stages[0].rules_applied, 0);
    assert_eq!(report.stages[0].rules_satisfied, 1);

    // uninstall restores the pre-run bytes (empty)
    let pipeline = Pipeline::new(vec![stage()]);
    let mut ctx = run_ctx(RunMode::Uninstall, &backup_dir);
    assert!(pipeline.uninstall(&mut ctx).succeeded());
    assert_eq!(fs::read_to_string(&sysctl_file).unwrap(), "");
}

#[test]
fn dry_run_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("torrc");
    fs::write(&file, "SocksPort 9050\n").unwrap();
    let backup_dir = dir.path().join("backups");

    let pipeline = Pipeline::new(vec![
        Stage::new("relay").rule(LinePresent::new(file.clone(), "TransPort 9040"))
    ]);
    let mut ctx = run_ctx(RunMode::DryRun, &backup_dir);
    let report = pipeline.execute(&mut ctx);

    assert!(report.succeeded());
    assert_eq!(fs::read_to_string(&file).unwrap(), "SocksPort 9050\n");
    assert!(!backup_dir.exists());
}

/// In-memory NAT table matching on exact tuples.
#[derive(Default)]
struct MemoryFilter {
    rules: Mutex<Vec<RedirectTuple>>,
    inserts: Mutex<usize>,
}

impl PacketFilter for MemoryFilter {
    fn rule_exists(&self, tuple: &RedirectTuple) -> Result<bool> {
        Ok(self.rules.lock().unwrap().contains(tuple))
    }

    fn insert_rule(&self, tuple: &RedirectTuple) -> Result<()> {
        *self.inserts.lock().unwrap() += 1;
        self.rules.lock().unwrap().push(tuple.clone());
        Ok(())
    }

    fn delete_rule(&self, tuple: &RedirectTuple) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        if let Some(pos) = rules.iter().position(|r| r == tuple) {
            rules.remove(pos);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn dns_redirect_scenario() {
    let dir = tempdir().unwrap();
    let backup_dir = dir.path().join("backups");
    let filter = Arc::new(MemoryFilter::default());

    // an unrelated redirect on the same port, owned by someone else
    let foreign = RedirectTuple::new("wlan0", Proto::Udp, Some(53), 5353);
    filter.rules.lock().unwrap().push(foreign.clone());

    let ours = RedirectTuple::new("wlan0", Proto::Udp, Some(53), 9053);
    let stage = |filter: Arc<MemoryFilter>| {
        Stage::new("redirect").rule(RedirectPresent::new(ours.clone(), filter))
    };

    // applied when absent
    let pipeline = Pipeline::new(vec![stage(filter.clone())]);
    let mut ctx = run_ctx(RunMode::Apply, &backup_dir);
    assert!(pipeline.execute(&mut ctx).succeeded());
    assert_eq!(*filter.inserts.lock().unwrap(), 1);

    // skipped when an identical tuple already exists
    let pipeline = Pipeline::new(vec![stage(filter.clone())]);
    let mut ctx = run_ctx(RunMode::Apply, &backup_dir);
    assert!(pipeline.execute(&mut ctx).succeeded());
    assert_eq!(*filter.inserts.lock().unwrap(), 1);

    // uninstall removes the exact tuple and nothing else
    let pipeline = Pipeline::new(vec![stage(filter.clone())]);
    let mut ctx = run_ctx(RunMode::Uninstall, &backup_dir);
    assert!(pipeline.uninstall(&mut ctx).succeeded());
    assert_eq!(filter.rules.lock().unwrap().as_slice(), &[foreign]);
}

#[test]
fn uninstall_of_clean_host_succeeds() {
    let dir = tempdir().unwrap();
    let pipeline = Pipeline::new(vec![
        Stage::new("relay").rule(LinePresent::new(
            dir.path().join("never-created.conf"),
            "TransPort 9040",
        )),
        Stage::new("redirect").rule(RedirectPresent::new(
            RedirectTuple::new("wlan0", Proto::Udp, Some(53), 9053),
            Arc::new(MemoryFilter::default()),
        )),
    ]);

    let mut ctx = run_ctx(RunMode::Uninstall, &dir.path().join("backups"));
    assert!(pipeline.uninstall(&mut ctx).succeeded());
}

#[test]
fn reversibility_across_shared_file() {
    let dir = tempdir().unwrap();
    let torrc = dir.path().join("torrc");
    let original = "SocksPort 9050\nLog notice syslog\n";
    fs::write(&torrc, original).unwrap();
    let backup_dir = dir.path().join("backups");

    let stage = || {
        Stage::new("relay")
            .rule(LinePresent::new(torrc.clone(), "TransPort 192.168.42.1:9040"))
            .rule(LinePresent::new(torrc.clone(), "DNSPort 192.168.42.1:9053"))
    };

    let pipeline = Pipeline::new(vec![stage()]);
    let mut ctx = run_ctx(RunMode::Apply, &backup_dir);
    assert!(pipeline.execute(&mut ctx).succeeded());
    let applied = fs::read_to_string(&torrc).unwrap();
    assert!(applied.contains("TransPort") && applied.contains("DNSPort"));

    let pipeline = Pipeline::new(vec![stage()]);
    let mut ctx = run_ctx(RunMode::Uninstall, &backup_dir);
    assert!(pipeline.uninstall(&mut ctx).succeeded());
    assert_eq!(fs::read_to_string(&torrc).unwrap(), original);
}
