use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use marksman::agent_engine::engine::Orchestrator;
use marksman::agent_engine::history::read_manifest;
use marksman::agent_engine::proposal::{parse_proposal, ActionProposal};
use marksman::agent_engine::state::{RunOutcome, StuckReason};
use marksman::config::AppConfig;
use marksman::errors::{MarksmanError, MarksmanResult};
use marksman::executor::actuator::{Actuator, ClickTarget, ScrollDirection};
use marksman::llm::oracle::{DecisionRequest, Oracle};
use marksman::perception::types::{BoundingBox, ElementRecord, Point};

const LABELS: [&str; 6] = ["Home", "Inbox", "Create", "Docs", "Help", "Search"];

#[derive(Default)]
struct BrowserLog {
    started: bool,
    stopped: bool,
    clicks: Vec<ClickTarget>,
    typed: Vec<String>,
    screenshots: usize,
}

struct MockBrowser {
    log: Arc<Mutex<BrowserLog>>,
    fail_start: bool,
    fail_scan: bool,
    fail_clicks: bool,
}

impl MockBrowser {
    fn new(log: Arc<Mutex<BrowserLog>>) -> Self {
        Self {
            log,
            fail_start: false,
            fail_scan: false,
            fail_clicks: false,
        }
    }
}

fn blank_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(1280, 720, image::Rgba([255, 255, 255, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn scanned_elements() -> Vec<ElementRecord> {
    LABELS
        .iter()
        .enumerate()
        .map(|(i, text)| ElementRecord {
            index: i,
            tag_name: "BUTTON".into(),
            text: (*text).into(),
            id: None,
            placeholder: None,
            input_type: None,
            aria_label: None,
            role: None,
            // Increasing widths keep scanner order after the area sort.
            bounding_box: BoundingBox::new(20.0 + i as f64 * 150.0, 50.0, 80.0 + i as f64, 30.0),
        })
        .collect()
}

#[async_trait]
impl Actuator for MockBrowser {
    async fn start(&mut self) -> MarksmanResult<()> {
        if self.fail_start {
            return Err(MarksmanError::Actuator("chrome not found".into()));
        }
        self.log.lock().unwrap().started = true;
        Ok(())
    }

    async fn stop(&mut self) -> MarksmanResult<()> {
        self.log.lock().unwrap().stopped = true;
        Ok(())
    }

    async fn navigate(&mut self, _url: &str) -> MarksmanResult<()> {
        Ok(())
    }

    async fn capture_screenshot(&mut self) -> MarksmanResult<Vec<u8>> {
        self.log.lock().unwrap().screenshots += 1;
        Ok(blank_png())
    }

    async fn scan_interactive_elements(&mut self) -> MarksmanResult<Vec<ElementRecord>> {
        if self.fail_scan {
            return Err(MarksmanError::Scan("context destroyed".into()));
        }
        Ok(scanned_elements())
    }

    async fn current_url(&mut self) -> MarksmanResult<String> {
        Ok("https://app.example.com/".into())
    }

    async fn click(&mut self, target: &ClickTarget) -> MarksmanResult<()> {
        self.log.lock().unwrap().clicks.push(target.clone());
        if self.fail_clicks {
            return Err(MarksmanError::Actuator("node detached".into()));
        }
        Ok(())
    }

    async fn type_text(&mut self, text: &str, _selector: Option<&str>) -> MarksmanResult<()> {
        self.log.lock().unwrap().typed.push(text.to_string());
        Ok(())
    }

    async fn press_key(&mut self, _key: &str) -> MarksmanResult<()> {
        Ok(())
    }

    async fn scroll(&mut self, _direction: ScrollDirection, _amount: u32) -> MarksmanResult<()> {
        Ok(())
    }

    async fn show_transient_cursor(&mut self, _point: Point) -> MarksmanResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Seen {
    histories: Vec<Vec<String>>,
    element_counts: Vec<usize>,
}

/// Replays scripted replies, then repeats `fallback` forever.
struct ScriptedOracle {
    script: Mutex<VecDeque<String>>,
    fallback: Box<dyn Fn(usize) -> String + Send + Sync>,
    seen: Arc<Mutex<Seen>>,
}

impl ScriptedOracle {
    fn new(script: &[&str], fallback: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        Self {
            script: Mutex::new(script.iter().map(|s| s.to_string()).collect()),
            fallback: Box::new(fallback),
            seen: Arc::new(Mutex::new(Seen::default())),
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decide(&self, request: &DecisionRequest) -> ActionProposal {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.histories.push(request.history.clone());
            seen.element_counts.push(request.elements.len());
            seen.histories.len() - 1
        };
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| (self.fallback)(call));
        parse_proposal(&reply).unwrap_or_else(|e| ActionProposal::fail(e.to_string()))
    }
}

/// Answers every decision with the same click after `wait`.
struct SlowOracle {
    wait: std::time::Duration,
    blocking: bool,
}

#[async_trait]
impl Oracle for SlowOracle {
    async fn decide(&self, _request: &DecisionRequest) -> ActionProposal {
        if self.blocking {
            std::thread::sleep(self.wait);
        } else {
            tokio::time::sleep(self.wait).await;
        }
        parse_proposal(&same_click(0)).unwrap()
    }
}

fn test_config(dir: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.run.observe_delay_ms = 0;
    cfg.run.settle_delay_ms = 0;
    cfg.run.audit_delay_ms = 0;
    cfg.run.deadline_secs = 0;
    cfg.run.output_dir = dir.join("run_1");
    cfg
}

fn same_click(_: usize) -> String {
    r#"{"thought":"try again","action":"click","params":{"elementIndex":4,"text":""}}"#.into()
}

#[tokio::test]
async fn three_identical_clicks_stall_with_three_entries() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let oracle = ScriptedOracle::new(&[], same_click);
    let mut orch = Orchestrator::new(
        Box::new(MockBrowser::new(log.clone())),
        Arc::new(oracle),
        &test_config(dir.path()),
    );

    let report = orch.run("open help", Some("https://app.example.com/")).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Stuck {
            reason: StuckReason::LoopStall
        }
    );
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.states.len(), 3);
    assert_eq!(manifest.task, "open help");
    assert!(manifest.states.iter().all(|s| s.action == "click"));
    // The stalled third proposal is recorded but not executed.
    let log = log.lock().unwrap();
    assert_eq!(log.clicks.len(), 2);
    assert!(log.stopped);
}

#[tokio::test]
async fn step_ceiling_ends_run_after_twenty_steps() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let alternate = |call: usize| {
        format!(
            r#"{{"thought":"browse","action":"click","params":{{"element_index":{},"text":"{}"}}}}"#,
            call % 2,
            LABELS[call % 2]
        )
    };
    let mut orch = Orchestrator::new(
        Box::new(MockBrowser::new(log.clone())),
        Arc::new(ScriptedOracle::new(&[], alternate)),
        &test_config(dir.path()),
    );

    let report = orch.run("wander", None).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Stuck {
            reason: StuckReason::StepCeiling
        }
    );
    assert_eq!(report.steps, 20);
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.states.len(), 20);
    let steps: Vec<u32> = manifest.states.iter().map(|s| s.step).collect();
    assert_eq!(steps, (1..=20).collect::<Vec<_>>());
    assert_eq!(log.lock().unwrap().clicks.len(), 20);
}

#[tokio::test]
async fn finish_after_typing_and_history_has_no_indices() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let oracle = ScriptedOracle::new(
        &[
            r#"{"thought":"open create","action":"click","params":{"element_index":2,"text":"Create"}}"#,
            r#"{"thought":"name it","action":"type","params":{"text":"Roadmap"}}"#,
            r#"{"thought":"I can see Roadmap in the list","action":"finish","params":{"summary":"project created"}}"#,
        ],
        |_| r#"{"action":"fail","params":{"reason":"script exhausted"}}"#.into(),
    );
    let seen = oracle.seen.clone();
    let mut orch = Orchestrator::new(
        Box::new(MockBrowser::new(log.clone())),
        Arc::new(oracle),
        &test_config(dir.path()),
    );

    let report = orch.run("create a project called Roadmap", None).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Finished {
            summary: "project created".into()
        }
    );
    let seen = seen.lock().unwrap();
    assert_eq!(seen.element_counts, vec![6, 6, 6]);
    assert_eq!(seen.histories[2], vec!["clicked 'Create'".to_string(), "typed 'Roadmap'".to_string()]);

    let log = log.lock().unwrap();
    assert_eq!(log.typed, vec!["Roadmap".to_string()]);

    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.states.len(), 3);
    let first = &manifest.states[0];
    assert!(first.screenshot_ref.starts_with("step_1_"));
    assert!(dir.path().join("run_1").join(&first.screenshot_ref).exists());
    assert_eq!(first.artifacts.len(), 2);
    assert_eq!(first.url, "https://app.example.com/");
    assert_eq!(manifest.states[2].action, "finish");
}

#[tokio::test]
async fn oracle_failure_ends_in_failed() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let oracle = ScriptedOracle::new(&["the model rambled without JSON"], same_click);
    let mut orch = Orchestrator::new(
        Box::new(MockBrowser::new(log.clone())),
        Arc::new(oracle),
        &test_config(dir.path()),
    );

    let report = orch.run("anything", None).await;

    let RunOutcome::Failed { reason } = &report.outcome else {
        panic!("expected Failed, got {:?}", report.outcome);
    };
    assert!(reason.contains("Malformed proposal"));
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.states.len(), 1);
    assert!(log.lock().unwrap().stopped);
}

#[tokio::test]
async fn click_failures_are_recorded_and_the_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let mut browser = MockBrowser::new(log.clone());
    browser.fail_clicks = true;
    let oracle = ScriptedOracle::new(
        &[r#"{"thought":"t","action":"click","params":{"element_index":1}}"#],
        |_| r#"{"thought":"done","action":"finish","params":{}}"#.into(),
    );
    let mut orch = Orchestrator::new(Box::new(browser), Arc::new(oracle), &test_config(dir.path()));

    let report = orch.run("click inbox", None).await;

    assert_eq!(report.outcome, RunOutcome::Finished { summary: "done".into() });
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert!(manifest.states[0].error.as_deref().unwrap().contains("node detached"));
    assert!(manifest.states[1].error.is_none());
}

#[tokio::test]
async fn scan_failure_degrades_to_no_labels() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let mut browser = MockBrowser::new(log.clone());
    browser.fail_scan = true;
    let oracle = ScriptedOracle::new(&[], |_| r#"{"action":"fail","params":{"reason":"nothing to click"}}"#.into());
    let seen = oracle.seen.clone();
    let mut orch = Orchestrator::new(Box::new(browser), Arc::new(oracle), &test_config(dir.path()));

    let report = orch.run("anything", None).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Failed {
            reason: "nothing to click".into()
        }
    );
    assert_eq!(seen.lock().unwrap().element_counts, vec![0]);
}

#[tokio::test]
async fn start_failure_aborts_but_still_writes_manifest_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let mut browser = MockBrowser::new(log.clone());
    browser.fail_start = true;
    let mut orch = Orchestrator::new(
        Box::new(browser),
        Arc::new(ScriptedOracle::new(&[], same_click)),
        &test_config(dir.path()),
    );

    let report = orch.run("anything", None).await;

    assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert!(manifest.states.is_empty());
    let log = log.lock().unwrap();
    assert!(!log.started);
    assert!(log.stopped);
}

#[tokio::test]
async fn stop_flag_aborts_at_step_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let mut orch = Orchestrator::new(
        Box::new(MockBrowser::new(log.clone())),
        Arc::new(ScriptedOracle::new(&[], same_click)),
        &test_config(dir.path()),
    );
    orch.stop_flag().store(true, Ordering::SeqCst);

    let report = orch.run("anything", None).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Aborted {
            error: "Run cancelled".into()
        }
    );
    assert_eq!(report.steps, 0);
    assert_eq!(log.lock().unwrap().screenshots, 0);
}

#[tokio::test]
async fn deadline_cuts_off_a_slow_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let mut cfg = test_config(dir.path());
    cfg.run.deadline_secs = 1;
    let oracle = SlowOracle {
        wait: std::time::Duration::from_secs(30),
        blocking: false,
    };
    let mut orch = Orchestrator::new(Box::new(MockBrowser::new(log.clone())), Arc::new(oracle), &cfg);

    let report = orch.run("anything", None).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Stuck {
            reason: StuckReason::Deadline
        }
    );
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert!(manifest.states.is_empty());
    let log = log.lock().unwrap();
    assert!(log.clicks.is_empty());
    assert!(log.stopped);
}

#[tokio::test]
async fn deadline_is_checked_between_steps() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(BrowserLog::default()));
    let mut cfg = test_config(dir.path());
    cfg.run.deadline_secs = 1;
    // Blocks the runtime, so the decision completes before the timeout is polled.
    let oracle = SlowOracle {
        wait: std::time::Duration::from_millis(1100),
        blocking: true,
    };
    let mut orch = Orchestrator::new(Box::new(MockBrowser::new(log.clone())), Arc::new(oracle), &cfg);

    let report = orch.run("anything", None).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Stuck {
            reason: StuckReason::Deadline
        }
    );
    assert_eq!(report.steps, 1);
    let manifest = read_manifest(report.manifest_path.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.states.len(), 1);
    let log = log.lock().unwrap();
    assert_eq!(log.clicks.len(), 1);
    assert!(log.stopped);
}
