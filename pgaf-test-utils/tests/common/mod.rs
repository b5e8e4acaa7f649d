//! Stand-ins for `pg_autoctl`, `pg_ctl` and `psql`, good enough to drive the harness
//! without a PostgreSQL installation. Every invocation is appended to a log file.

#![allow(dead_code)]

use pgaf_test_utils::HarnessConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FAKE_PG_AUTOCTL: &str = r#"#!/bin/sh
echo "pg_autoctl $*" >> "$FAKE_PGAF_LOG"
if [ -n "$FAKE_PGAF_FAIL" ]; then
  case " $* " in
    *" $FAKE_PGAF_FAIL "*) echo "fake failure of $FAKE_PGAF_FAIL" >&2; exit 1 ;;
  esac
fi
if [ -n "$FAKE_PGAF_HANG" ]; then
  case " $* " in
    *" $FAKE_PGAF_HANG "*) echo "hanging on $FAKE_PGAF_HANG"; sleep 300 ;;
  esac
fi
pgdata=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--pgdata" ]; then pgdata="$arg"; fi
  prev="$arg"
done
if [ "$1" = "run" ]; then
  mkdir -p "$pgdata"
  printf '4242\n%s\n1700000000\n5432\n/tmp\nlocalhost\n  5432001  1\nready   \n' "$pgdata" > "$pgdata/postmaster.pid"
  sleep 300 &
  wait
fi
exit 0
"#;

const FAKE_PG_CTL: &str = r#"#!/bin/sh
echo "pg_ctl $*" >> "$FAKE_PGAF_LOG"
datadir=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-D" ]; then datadir="$arg"; fi
  prev="$arg"
done
case "$prev" in
  status)
    [ -f "$datadir/postmaster.pid" ] && exit 0
    echo "pg_ctl: no server running"
    exit 3
    ;;
  stop)
    if [ ! -f "$datadir/postmaster.pid" ]; then
      echo "pg_ctl: PID file does not exist" >&2
      exit 1
    fi
    rm -f "$datadir/postmaster.pid"
    ;;
esac
exit 0
"#;

const FAKE_PSQL: &str = r#"#!/bin/sh
echo "psql $*" >> "$FAKE_PGAF_LOG"
exit 0
"#;

/// A temp dir holding the fake binaries, the invocation log, and the config/state
/// roots the harness is pointed at
pub struct FakeInstall {
    dir: tempfile::TempDir,
}

impl FakeInstall {
    pub fn new() -> Self {
        pgaf_test_utils::init_test_logging();

        let dir = tempfile::tempdir().expect("Should create temp dir");
        for (name, script) in [
            ("pg_autoctl", FAKE_PG_AUTOCTL),
            ("pg_ctl", FAKE_PG_CTL),
            ("psql", FAKE_PSQL),
        ] {
            write_executable(&dir.path().join("bin").join(name), script);
        }

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn bin(&self, name: &str) -> PathBuf {
        self.path().join("bin").join(name)
    }

    /// Where a test should put the data directory called `name`
    pub fn datadir(&self, name: &str) -> PathBuf {
        self.path().join("data").join(name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.path().join("invocations.log")
    }

    pub fn config(&self) -> HarnessConfig {
        let mut env = pgaf_test_utils::default_env();
        env.push((
            "FAKE_PGAF_LOG".to_string(),
            self.log_path().to_string_lossy().into_owned(),
        ));

        HarnessConfig {
            pg_autoctl: self.bin("pg_autoctl"),
            pg_ctl: self.bin("pg_ctl"),
            psql: self.bin("psql"),
            command_timeout: Duration::from_secs(10),
            state_change_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            config_root: self.path().join("config"),
            state_root: self.path().join("state"),
            datanode_username: "tester".to_string(),
            autoctl_verbosity: 3,
            log_dir: Some(self.path().join("logs")),
            env,
        }
    }

    /// Same as [`FakeInstall::config`], with every pg_autoctl call that has `word`
    /// among its arguments failing
    pub fn config_failing_on(&self, word: &str) -> HarnessConfig {
        let mut config = self.config();
        config.env.push(("FAKE_PGAF_FAIL".to_string(), word.to_string()));
        config
    }

    /// pg_autoctl calls that have `word` among their arguments never finish, and
    /// commands time out after half a second
    pub fn config_hanging_on(&self, word: &str) -> HarnessConfig {
        let mut config = self.config();
        config.command_timeout = Duration::from_millis(500);
        config.env.push(("FAKE_PGAF_HANG".to_string(), word.to_string()));
        config
    }

    /// Every invocation so far, one line each
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn invocations_starting_with(&self, prefix: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    /// Invocations starting with `prefix`, once there are at least `count` of them.
    /// Background commands log on their own schedule, so this polls for up to 5s
    /// and returns whatever is there when that runs out.
    pub async fn wait_for_invocations(&self, prefix: &str, count: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let found = self.invocations_starting_with(prefix);
            if found.len() >= count || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn write_executable(path: &Path, content: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(path.parent().expect("Should have a parent")).expect("Should create bin dir");
    std::fs::write(path, content).expect("Should write script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("Should chmod script");
}
