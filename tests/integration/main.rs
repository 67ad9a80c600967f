//! Integration tests for kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn kiln() -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.arg("--no-local");
        cmd
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build cache for native extensions"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn fingerprint_honours_override() {
        kiln()
            .arg("fingerprint")
            .env("KILN_FINGERPRINT", "sdk 1.0/beta")
            .assert()
            .success()
            .stdout(predicate::str::diff("sdk-1.0-beta\n"));
    }

    #[test]
    fn config_path_follows_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        kiln()
            .arg("--config")
            .arg(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        kiln()
            .arg("--config")
            .arg(dir.path().join("config.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"));
    }

    #[test]
    fn config_set_rejects_unknown_key() {
        let dir = TempDir::new().unwrap();
        kiln()
            .arg("--config")
            .arg(dir.path().join("config.toml"))
            .args(["config", "set", "build.nope", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn build_missing_source() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["build", "--no-load"])
            .arg(dir.path().join("missing.cpp"))
            .env("KILN_FINGERPRINT", "itest")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Source file does not exist"));
    }

    #[test]
    fn status_empty_dir_json() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["status", "--format", "json"])
            .arg(dir.path())
            .env("KILN_FINGERPRINT", "itest")
            .assert()
            .success()
            .stdout(predicate::str::diff("[]\n"));
    }
}

#[cfg(unix)]
mod fake_compiler_tests {
    use assert_cmd::cargo::cargo_bin_cmd;
    use kiln::cache::{library_extension, BuildLock, LockOptions};
    use predicates::prelude::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::process::{Command, Stdio};
    use tempfile::TempDir;

    /// Stand-in compiler: logs each invocation, sleeps, writes a dummy output
    const FAKE_COMPILER: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then
        out="$2"
        shift
    fi
    shift
done
echo "$$" >> "$KILN_TEST_COUNT"
sleep 1
printf 'not really a library' > "$out"
"#;

    const FAILING_COMPILER: &str = r#"#!/bin/sh
echo "add.cpp:1:1: error: boom" >&2
exit 1
"#;

    struct Fixture {
        dir: TempDir,
        config: PathBuf,
        count: PathBuf,
        source: PathBuf,
    }

    impl Fixture {
        fn new(compiler_script: &str) -> Self {
            let dir = TempDir::new().unwrap();

            let compiler = dir.path().join("fake-cxx");
            fs::write(&compiler, compiler_script).unwrap();
            fs::set_permissions(&compiler, fs::Permissions::from_mode(0o755)).unwrap();

            let config = dir.path().join("config.toml");
            fs::write(
                &config,
                format!(
                    "[build]\ncxx = \"{}\"\nlock_attempt_ms = 100\nretry_delay_ms = 20\nmax_retry_delay_ms = 200\n",
                    compiler.display()
                ),
            )
            .unwrap();

            let source = dir.path().join("add.cpp");
            fs::write(&source, "// kiln\nint add(int a, int b) { return a + b; }\n").unwrap();

            let count = dir.path().join("count.log");
            Self {
                dir,
                config,
                count,
                source,
            }
        }

        fn artifact(&self) -> PathBuf {
            PathBuf::from(format!(
                "{}_itest.{}",
                self.source.display(),
                library_extension()
            ))
        }

        fn lock(&self) -> PathBuf {
            PathBuf::from(format!("{}.lock", self.artifact().display()))
        }

        fn command(&self) -> Command {
            let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiln"));
            cmd.arg("--no-local")
                .arg("--config")
                .arg(&self.config)
                .env("KILN_FINGERPRINT", "itest")
                .env("KILN_TEST_COUNT", &self.count);
            cmd
        }

        fn compile_count(&self) -> usize {
            fs::read_to_string(&self.count)
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }
    }

    fn staging_dirs(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".kiln-build-"))
            .count()
    }

    #[test]
    fn concurrent_processes_build_once() {
        let fixture = Fixture::new(FAKE_COMPILER);

        let children: Vec<_> = (0..16)
            .map(|_| {
                fixture
                    .command()
                    .args(["build", "--no-load"])
                    .arg(&fixture.source)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .unwrap()
            })
            .collect();

        for child in children {
            let output = child.wait_with_output().unwrap();
            assert!(
                output.status.success(),
                "kiln failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            assert!(String::from_utf8_lossy(&output.stdout).contains("Built:"));
        }

        assert_eq!(fixture.compile_count(), 1);
        assert!(fixture.artifact().is_file());
        assert!(!fixture.lock().exists());
        assert_eq!(staging_dirs(fixture.dir.path()), 0);

        // A later run is served from the cache
        let output = fixture
            .command()
            .args(["build", "--no-load"])
            .arg(&fixture.source)
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(fixture.compile_count(), 1);
    }

    #[test]
    fn content_change_rebuilds() {
        let fixture = Fixture::new(FAKE_COMPILER);
        let build = || {
            fixture
                .command()
                .args(["build", "--no-load"])
                .arg(&fixture.source)
                .output()
                .unwrap()
        };

        assert!(build().status.success());
        fs::write(&fixture.source, "int add(int a, int b) { return b + a; }\n").unwrap();
        assert!(build().status.success());
        assert!(build().status.success());

        assert_eq!(fixture.compile_count(), 2);
    }

    #[test]
    fn held_lock_times_out_naming_lock() {
        let fixture = Fixture::new(FAKE_COMPILER);
        let _held = BuildLock::try_acquire(&fixture.lock(), &LockOptions::default()).unwrap();

        let output = fixture
            .command()
            .args(["build", "--no-load", "--timeout", "1"])
            .arg(&fixture.source)
            .output()
            .unwrap();

        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains(&fixture.lock().display().to_string()), "{}", stderr);
        assert_eq!(fixture.compile_count(), 0);
    }

    #[test]
    fn build_failure_reports_compiler_output() {
        let fixture = Fixture::new(FAILING_COMPILER);

        cargo_bin_cmd!("kiln")
            .arg("--no-local")
            .arg("--config")
            .arg(&fixture.config)
            .env("KILN_FINGERPRINT", "itest")
            .args(["build", "--no-load"])
            .arg(&fixture.source)
            .assert()
            .failure()
            .stderr(predicate::str::contains("error: boom"));

        assert!(!fixture.artifact().exists());
        assert!(!fixture.lock().exists());
        assert_eq!(staging_dirs(fixture.dir.path()), 0);
    }

    #[test]
    fn clean_removes_other_fingerprints() {
        let fixture = Fixture::new(FAKE_COMPILER);

        let output = fixture
            .command()
            .args(["build", "--no-load"])
            .arg(&fixture.source)
            .output()
            .unwrap();
        assert!(output.status.success());

        let output = fixture
            .command()
            .env("KILN_FINGERPRINT", "next")
            .args(["clean", "--yes"])
            .arg(fixture.dir.path())
            .output()
            .unwrap();
        assert!(output.status.success());
        assert!(!fixture.artifact().exists());
        assert!(fixture.source.exists());
    }
}

#[cfg(unix)]
mod real_compiler_tests {
    use kiln::build::CompilerBackend;
    use kiln::config::schema::BuildConfig;
    use kiln::fingerprint::FixedFingerprint;
    use kiln::CompileCache;
    use std::fs;
    use std::process::{Command, Stdio};
    use std::time::Duration;
    use tempfile::TempDir;

    fn have_cc() -> bool {
        Command::new("cc")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    #[test]
    fn reloads_on_change_while_old_handle_is_loaded() {
        if !have_cc() {
            eprintln!("skipping: no C compiler installed");
            return;
        }

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("add.c");
        fs::write(&source, "int add(int a, int b) { return a + b; }\n").unwrap();

        let cache = CompileCache::new(
            FixedFingerprint::new("realcc"),
            CompilerBackend::from_config(&BuildConfig::default()),
        );
        let timeout = Duration::from_secs(60);

        let first = cache.ensure_built(&source, timeout).unwrap();
        assert!(first.rebuilt);
        assert!(!cache.ensure_built(&source, timeout).unwrap().rebuilt);

        // The first handle stays loaded across the edit
        let first_lib = unsafe { cache.ensure_loaded(&source, timeout).unwrap() };
        let add = unsafe { first_lib.get::<extern "C" fn(i32, i32) -> i32>("add").unwrap() };
        assert_eq!(add(2, 3), 5);
        assert!(!first_lib.has_symbol("subtract"));

        fs::write(
            &source,
            "int add(int a, int b) { return a + b; }\nint subtract(int a, int b) { return a - b; }\n",
        )
        .unwrap();

        let second = cache.ensure_built(&source, timeout).unwrap();
        assert!(second.rebuilt);
        assert_eq!(second.path, first.path);
        assert_ne!(second.checksum, first.checksum);

        let lib = unsafe { cache.ensure_loaded(&source, timeout).unwrap() };
        assert_ne!(lib.path(), first_lib.path());
        let subtract = unsafe { lib.get::<extern "C" fn(i32, i32) -> i32>("subtract").unwrap() };
        assert_eq!(subtract(5, 3), 2);

        // Old code is still what the old handle sees
        assert_eq!(add(4, 4), 8);
        assert!(!first_lib.has_symbol("subtract"));
        assert!(!cache.ensure_built(&source, timeout).unwrap().rebuilt);
    }
}
