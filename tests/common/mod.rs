//! Shared helpers for integration tests: temp git repositories, dispatch
//! configuration tuned for fast polling, and a fake agent loop script that
//! speaks the status-document protocol.

use std::path::{Path, PathBuf};
use std::process::Command;

use crossroads::model::{
    ActionKind, AgentKind, Prd, Priority, SlotAssignment, SlotNumber, Story, StoryId, StoryStatus,
};

pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// Create a repo with one commit on `main`.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.name", "test"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.join("README.md"), "hello\n").expect("write README");
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "init"]);
    git(dir, &["branch", "-M", "main"]);
}

/// Write a dispatch config with a fast watcher so tests finish quickly.
pub fn write_fast_config(repo: &Path) {
    let dir = repo.join(".crossroads");
    std::fs::create_dir_all(&dir).expect("create .crossroads");
    std::fs::write(
        dir.join("config.toml"),
        "[dispatch]\npoll_interval_secs = 1\nmax_iterations = 300\nsleep_seconds = 1\n",
    )
    .expect("write config");
}

/// The fake agent: reads the status document, marks its ready stories
/// complete (atomic rename rewrite), waits for blocked ones to unblock, and
/// exits 0 once everything assigned to it is complete.
const FAKE_LOOP: &str = r#"#!/bin/sh
[ $# -eq 2 ] || exit 9
MAX_ITER="$1" SLEEP_SECS="$2" python3 - <<'PY'
import datetime, json, os, sys, tempfile, time

path = os.environ["CROSSROADS_STATUS_FILE"]
stories = [s for s in os.environ["CROSSROADS_ASSIGNED_STORIES"].split(",") if s]
max_iter = int(os.environ["MAX_ITER"])

def utcnow():
    stamp = datetime.datetime.now(datetime.timezone.utc)
    return stamp.isoformat().replace("+00:00", "Z")

for _ in range(max_iter):
    with open(path) as f:
        doc = json.load(f)
    mine = {s: doc["stories"][s]["status"] for s in stories}
    if all(state == "complete" for state in mine.values()):
        sys.exit(0)
    changed = False
    for story, state in mine.items():
        if state in ("ready", "in-progress"):
            now = utcnow()
            doc["stories"][story]["status"] = "complete"
            if not doc["stories"][story].get("startedAt"):
                doc["stories"][story]["startedAt"] = now
            doc["stories"][story]["completedAt"] = now
            changed = True
    if changed:
        doc["updatedAt"] = utcnow()
        fd, tmp = tempfile.mkstemp(dir=os.path.dirname(path), prefix=".status-agent-")
        with os.fdopen(fd, "w") as f:
            json.dump(doc, f, indent=2)
        os.replace(tmp, path)
    time.sleep(0.2)
sys.exit(1)
PY
"#;

/// Install the fake loop script for `agent` on the repo's script path.
pub fn install_fake_agent(repo: &Path, agent: &str) -> PathBuf {
    let dir = repo.join(".crossroads").join("scripts");
    std::fs::create_dir_all(&dir).expect("create scripts dir");
    let script = dir.join(format!("{agent}-loop.sh"));
    std::fs::write(&script, FAKE_LOOP).expect("write loop script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mut perms = std::fs::metadata(&script).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");
    }
    script
}

pub fn sid(s: &str) -> StoryId {
    StoryId::new(s).expect("valid story id")
}

pub fn story(id: &str, deps: &[&str]) -> Story {
    Story {
        id: sid(id),
        title: format!("story {id}"),
        description: String::new(),
        priority: Priority::Medium,
        complexity: 1,
        acceptance_criteria: vec![],
        depends_on: deps.iter().map(|d| sid(d)).collect(),
        status: StoryStatus::Pending,
    }
}

pub fn prd(name: &str, stories: Vec<Story>) -> Prd {
    Prd {
        name: name.to_owned(),
        description: String::new(),
        author: String::new(),
        template: String::new(),
        stories,
    }
}

pub fn assignment(slot: u8, agent: &str, stories: &[&str]) -> SlotAssignment {
    SlotAssignment {
        slot: SlotNumber::new(slot).expect("valid slot"),
        agent: AgentKind::new(agent).expect("valid agent"),
        action: ActionKind::new("implement").expect("valid action"),
        stories: stories.iter().map(|s| sid(s)).collect(),
    }
}
