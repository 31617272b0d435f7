use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use muxkit::*;
use nix::sys::signal::Signal;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("muxkit-test-{}-{}-{}", std::process::id(), n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn test_set(escalation: EscalationPolicy) -> (Arc<CommandSet>, OutputCapture) {
	let capture = OutputCapture::new(1000);
	let set = CommandSet::new(ProcessContext {
		escalation,
		env: EnvScrubConfig::default(),
		sink: Arc::new(capture.clone()),
	});
	(set, capture)
}

fn spec(name: &str, command: &str, dir: &Path) -> CommandSpec {
	CommandSpec::build(
		&CommandOptions::new(command).named(name).chdir(dir),
		None,
		&FilterRegistry::default(),
	)
	.unwrap()
	.unwrap()
}

async fn within<F: Future>(f: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(10), f)
		.await
		.expect("timed out")
}

fn read_lines(path: &Path) -> Vec<String> {
	std::fs::read_to_string(path)
		.unwrap_or_default()
		.lines()
		.map(str::to_string)
		.collect()
}

// --- Single processes ---

#[tokio::test]
async fn exit_code_is_classified() {
	let dir = temp_dir("exit-code");
	let (set, _) = test_set(EscalationPolicy::default());

	let process = set.add_and_start(spec("fail", "exit 3", &dir)).unwrap();
	assert!(process.pid().is_some());
	let classification = within(process.wait()).await;
	assert_eq!(classification, ExitClassification::NormalExit(3));
	assert!(process.is_exited());
	assert_eq!(process.uptime(), None);
	assert_eq!(process.stats(), ProcessStats::default());
	assert!(!process.on_exit(|| {}));

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn output_is_captured_with_env_overrides() {
	let dir = temp_dir("output");
	let (set, capture) = test_set(EscalationPolicy::default());

	let options = CommandOptions::new("echo \"greeting=$GREETING\"")
		.named("greet")
		.env("GREETING", "hello-mux")
		.chdir(&dir);
	let spec = CommandSpec::build(&options, None, &FilterRegistry::default())
		.unwrap()
		.unwrap();
	let process = set.add_and_start(spec).unwrap();
	within(process.wait()).await;
	tokio::time::sleep(Duration::from_millis(200)).await;

	let lines = capture.lastlog("greeting=").unwrap();
	assert_eq!(lines.len(), 1);
	assert_eq!(lines[0].process, "greet");
	assert_eq!(lines[0].line, "greeting=hello-mux");

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn scrubbed_variables_are_not_inherited() {
	let dir = temp_dir("scrub");
	let capture = OutputCapture::new(100);
	let set = CommandSet::new(ProcessContext {
		escalation: EscalationPolicy::default(),
		env: EnvScrubConfig {
			strip_prefixes: vec![],
			strip_names: vec!["HOME".into()],
		},
		sink: Arc::new(capture.clone()),
	});

	let process = set
		.add_and_start(spec("home", "echo \"home=[$HOME]\"", &dir))
		.unwrap();
	within(process.wait()).await;
	tokio::time::sleep(Duration::from_millis(200)).await;

	let lines = capture.lastlog("home=").unwrap();
	assert_eq!(lines.len(), 1);
	assert_eq!(lines[0].line, "home=[]");

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn input_is_written_to_the_terminal() {
	let dir = temp_dir("input");
	let (set, capture) = test_set(EscalationPolicy::default());

	let process = set
		.add_and_start(spec("reader", "read line; echo \"got:$line\"", &dir))
		.unwrap();
	process.send_input(b"ping\n").unwrap();
	within(process.wait()).await;
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert_eq!(capture.lastlog("got:ping").unwrap().len(), 1);
	assert!(matches!(
		process.send_input(b"late\n"),
		Err(MuxError::NotRunning(_))
	));

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn spawn_failure_leaves_nothing_active() {
	let (set, _) = test_set(EscalationPolicy::default());
	let name = set.add(spec("lost", "true", Path::new("/nonexistent/muxkit/dir")));

	let err = set.start(&name).unwrap_err();
	assert!(matches!(err, MuxError::Spawn { .. }));
	assert!(set.process(&name).is_none());
	assert!(set.contains(&name));
	assert!(set.is_stopped());
}

// --- Registry ---

#[tokio::test]
async fn starting_twice_is_rejected() {
	let dir = temp_dir("twice");
	let (set, _) = test_set(EscalationPolicy::default());

	let process = set.add_and_start(spec("sleeper", "exec sleep 30", &dir)).unwrap();
	let pid = process.pid().unwrap();
	match set.start("sleeper") {
		Err(MuxError::AlreadyRunning { name, pid: running }) => {
			assert_eq!(name, "sleeper");
			assert_eq!(running, pid);
		}
		other => panic!("expected AlreadyRunning, got {:?}", other.map(|p| p.pid())),
	}
	assert_eq!(set.count(), "1 commands with 1 running");

	set.stop("sleeper").unwrap();
	assert!(set.process("sleeper").is_none());
	let classification = within(process.wait()).await;
	assert_eq!(
		classification,
		ExitClassification::Signaled {
			name: "SIGINT".into(),
			number: Signal::SIGINT as i32,
		}
	);

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn remove_stops_and_forgets() {
	let dir = temp_dir("remove");
	let (set, _) = test_set(EscalationPolicy::default());

	let process = set.add_and_start(spec("sleeper", "exec sleep 30", &dir)).unwrap();
	set.remove("sleeper");
	set.remove("sleeper");
	assert!(!set.contains("sleeper"));
	assert!(matches!(set.start("sleeper"), Err(MuxError::UnknownName(_))));

	within(process.wait()).await;
	assert!(set.is_stopped());
	assert!(set.status().is_empty());

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn status_rows_follow_insertion_order() {
	let dir = temp_dir("status");
	let (set, _) = test_set(EscalationPolicy::default());

	let web = set.add_and_start(spec("web", "exec sleep 30", &dir)).unwrap();
	set.add(spec("idle", "true", &dir));
	let quick = set.add_and_start(spec("quick", "true", &dir)).unwrap();
	within(quick.wait()).await;

	let rows = set.status();
	let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
	assert_eq!(names, vec!["web", "idle", "quick"]);
	assert_eq!(rows[0].pid(), web.pid());
	assert_eq!(rows[1].activity, Activity::Pending);
	assert!(matches!(rows[2].activity, Activity::Down { .. }));

	let table = format_status(&rows, set.max_width());
	assert!(table.contains("(pending)"));
	assert!(table.contains("down "));

	set.stop("web").unwrap();
	within(web.wait()).await;
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn join_fires_once_after_every_exit() {
	let dir = temp_dir("join");
	let (set, _) = test_set(EscalationPolicy::default());

	let processes = vec![
		set.add_and_start(spec("slow", "sleep 0.3", &dir)).unwrap(),
		set.add_and_start(spec("medium", "sleep 0.1", &dir)).unwrap(),
		set.add_and_start(spec("fast", "true", &dir)).unwrap(),
	];

	let calls = Arc::new(AtomicUsize::new(0));
	let (tx, rx) = tokio::sync::oneshot::channel();
	let c = Arc::clone(&calls);
	let observed = processes.clone();
	CommandSet::join(&processes, move || {
		c.fetch_add(1, Ordering::SeqCst);
		let all_exited = observed.iter().all(|p| p.is_exited());
		let _ = tx.send(all_exited);
	});

	assert!(within(rx).await.unwrap());
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	// every process has exited already; joining again must not hang
	within(CommandSet::wait_all(&processes)).await;
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn stopped_fires_when_last_process_exits() {
	let dir = temp_dir("stopped");
	let (set, _) = test_set(EscalationPolicy::default());

	let a = set.add_and_start(spec("a", "sleep 0.1", &dir)).unwrap();
	let b = set.add_and_start(spec("b", "sleep 0.2", &dir)).unwrap();
	let fired = Arc::new(AtomicUsize::new(0));
	let f = Arc::clone(&fired);
	set.events().on(CommandSetEvent::Stopped, move || {
		f.fetch_add(1, Ordering::SeqCst);
	});

	within(CommandSet::wait_all(&[a, b])).await;
	assert_eq!(fired.load(Ordering::SeqCst), 1);
	assert!(set.is_stopped());
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Signal escalation ---

#[tokio::test]
async fn escalation_reaches_kill() {
	let dir = temp_dir("escalation");
	let policy = EscalationPolicy {
		signals: vec![Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL],
		retries: 10,
		interval: Duration::from_millis(50),
	};
	let cycle = policy.cycle();
	let (set, _) = test_set(policy);

	let process = set
		.add_and_start(spec("stubborn", "trap '' INT TERM; exec sleep 30", &dir))
		.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;

	let began = Instant::now();
	set.stop("stubborn").unwrap();
	let classification = within(process.wait()).await;
	let elapsed = began.elapsed();

	assert_eq!(
		classification,
		ExitClassification::Signaled {
			name: "SIGKILL".into(),
			number: 9,
		}
	);
	// INT and TERM each get one full polling cycle, KILL lands at once
	assert!(elapsed >= cycle * 2, "killed after {:?}", elapsed);
	assert!(elapsed < cycle * 3, "killed after {:?}", elapsed);

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn unreaped_after_exhausting_signals() {
	let dir = temp_dir("unreaped");
	let policy = EscalationPolicy {
		signals: vec![Signal::SIGTERM],
		retries: 3,
		interval: Duration::from_millis(20),
	};
	let (set, _) = test_set(policy);

	let process = set
		.add_and_start(spec("deaf", "trap '' TERM; exec sleep 30", &dir))
		.unwrap();
	let pid = process.pid().unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;

	set.stop("deaf").unwrap();
	assert_eq!(within(process.wait()).await, ExitClassification::Unreaped);

	let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), Signal::SIGKILL);
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Restart ---

#[tokio::test]
async fn restart_starts_exactly_one_replacement() {
	let dir = temp_dir("restart");
	let (set, _) = test_set(EscalationPolicy::default());
	let starts = dir.join("starts.log");

	let first = set
		.add_and_start(spec("web", "echo started >> starts.log; exec sleep 30", &dir))
		.unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;

	set.restart("web").unwrap();
	within(first.wait()).await;

	let mut second = None;
	for _ in 0..100 {
		if let Some(p) = set.process("web") {
			second = Some(p);
			break;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	let second = second.expect("no replacement process");
	assert_ne!(second.id(), first.id());
	assert_ne!(second.pid(), first.pid());

	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(set.active().len(), 1);
	assert_eq!(read_lines(&starts), vec!["started", "started"]);

	set.stop("web").unwrap();
	within(second.wait()).await;
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn restart_of_idle_name_just_starts() {
	let dir = temp_dir("restart-idle");
	let (set, _) = test_set(EscalationPolicy::default());
	set.add(spec("web", "exec sleep 30", &dir));

	set.restart("web").unwrap();
	let process = set.process("web").unwrap();
	assert!(process.state().is_running());

	set.stop("web").unwrap();
	within(process.wait()).await;
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Sequences ---

#[tokio::test]
async fn sequence_runs_steps_in_order() {
	let dir = temp_dir("sequence");
	let log = dir.join("order.log");
	let console = Console::new(SupervisorConfig::default()).unwrap();

	let step = |name: &str, command: &str| CommandOptions::new(command).named(name).chdir(&dir);
	let plan = vec![
		Step::Single(step("a", "echo A >> order.log")),
		Step::Parallel(vec![
			step("b", "sleep 0.3; echo B >> order.log"),
			step("c", "echo C >> order.log"),
		]),
		Step::Single(step("d", "echo D >> order.log; exec sleep 2")),
	];

	let sequence = console.run(plan);
	let set = console.set();
	within(async {
		while set.process("d").is_none() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await;
	assert_eq!(set.names(), vec!["d"]);
	assert!(!sequence.is_finished());

	within(sequence.finished()).await;
	assert!(sequence.is_finished());

	let lines = read_lines(&log);
	assert_eq!(lines.len(), 4);
	assert_eq!(lines[0], "A");
	assert_eq!(lines[3], "D");
	assert!(lines[1..3].contains(&"B".to_string()));
	assert!(lines[1..3].contains(&"C".to_string()));

	assert_eq!(set.names(), vec!["d"]);
	for gone in ["a", "b", "c"] {
		assert!(!set.contains(gone));
	}

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn sequence_survives_a_failed_start() {
	let dir = temp_dir("sequence-failure");
	let log = dir.join("order.log");
	let console = Console::new(SupervisorConfig::default()).unwrap();

	let plan = vec![
		Step::Parallel(vec![
			CommandOptions::new("true").named("lost").chdir("/nonexistent/muxkit/dir"),
			CommandOptions::new("echo first >> order.log").named("first").chdir(&dir),
		]),
		Step::Single(CommandOptions::new("echo second >> order.log").named("second").chdir(&dir)),
	];

	let sequence = console.run(plan);
	within(sequence.finished()).await;
	assert_eq!(read_lines(&log), vec!["first", "second"]);

	let _ = std::fs::remove_dir_all(&dir);
}

// --- Console ---

#[tokio::test]
async fn shutdown_stops_everything() {
	let dir = temp_dir("shutdown");
	let console = Console::new(SupervisorConfig::default()).unwrap();
	within(console.shutdown()).await;

	for name in ["one", "two"] {
		let added = console
			.add_one(CommandOptions::new("exec sleep 30").named(name).chdir(&dir))
			.unwrap();
		console.start(&added).unwrap();
	}
	assert_eq!(console.count(), "2 commands with 2 running");

	within(console.shutdown()).await;
	assert!(console.set().is_stopped());
	assert_eq!(console.count(), "2 commands with 0 running");

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn reset_swaps_in_an_empty_set() {
	let dir = temp_dir("reset");
	let console = Console::new(SupervisorConfig::default()).unwrap();
	let name = console
		.add_one(CommandOptions::new("exec sleep 30").named("sleeper").chdir(&dir))
		.unwrap();
	let process = console.start(&name).unwrap();

	within(console.reset()).await;
	assert!(process.is_exited());
	assert!(console.set().names().is_empty());
	assert_eq!(console.count(), "0 commands with 0 running");

	let _ = std::fs::remove_dir_all(&dir);
}
