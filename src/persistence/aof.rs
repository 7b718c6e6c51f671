//! Append-only command log.
//!
//! Every mutation is recorded as one text line: tokens separated by
//! spaces, with any argument containing a space wrapped in double quotes.
//! At startup the log is replayed over the loaded snapshot through the
//! store's `apply_*` primitives, which neither re-log nor signal the
//! snapshot writer.
//!
//! Three fsync policies govern durability:
//!
//! - `Always` — fsync after every append, under the writer mutex, before
//!   the call returns; an acknowledged write survives a crash
//! - `EverySecond` — a background task fsyncs once per second
//! - `Never` — leave it to the OS
//!
//! `rewrite` compacts the log against the live store: current state is
//! dumped as a minimal command sequence into `<path>.rewrite`, fsynced,
//! and renamed over the live log while the writer mutex is held. Writes
//! that land between the dump and the swap are not redirected into the
//! new file; that narrow window is an accepted loss for a single-node
//! best-effort system.

use crate::storage::{Store, ValueData};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// When appended commands reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync before every append returns.
    Always,
    /// A background task fsyncs once per second.
    EverySecond,
    /// The OS decides.
    Never,
}

impl SyncPolicy {
    /// Parses the CLI spelling (`always` / `everysec` / `no`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(SyncPolicy::Always),
            "everysec" => Some(SyncPolicy::EverySecond),
            "no" => Some(SyncPolicy::Never),
            _ => None,
        }
    }
}

/// The append-only log: a buffered writer behind a mutex that serializes
/// appenders, plus the path and sync policy.
pub struct AofLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    policy: SyncPolicy,
}

impl std::fmt::Debug for AofLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AofLog")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish()
    }
}

impl AofLog {
    /// Opens (creating if necessary) the log in append mode. Under
    /// `EverySecond` this also spawns the once-per-second fsync task, so it
    /// must be called from within a tokio runtime.
    pub fn open(path: &Path, policy: SyncPolicy) -> io::Result<Arc<Self>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let log = Arc::new(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
            policy,
        });

        if policy == SyncPolicy::EverySecond {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                loop {
                    ticker.tick().await;
                    if let Err(e) = log.sync() {
                        warn!(error = %e, "background AOF sync failed");
                    }
                }
            });
        }

        Ok(log)
    }

    /// Appends one command line. Under `Always` the data is fsynced before
    /// this returns, still holding the writer mutex.
    pub fn append(&self, cmd: &str, args: &[&str]) -> io::Result<()> {
        let line = format_command(cmd, args);

        let mut writer = self.writer.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        if self.policy == SyncPolicy::Always {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flushes the buffer and fsyncs the file.
    pub fn sync(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Replays the log into `store` line by line via the no-log mutation
    /// primitives. Blank lines, unknown commands, unparseable lines, and
    /// `FLUSH` are skipped. Returns the number of commands applied.
    pub fn replay(&self, store: &Store) -> io::Result<usize> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let reader = BufReader::new(file);
        let mut applied = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let tokens = match split_command_line(&line) {
                Some(tokens) if !tokens.is_empty() => tokens,
                Some(_) => continue,
                None => {
                    warn!(line = %line, "unclosed quotes in AOF line, skipping");
                    continue;
                }
            };

            if apply_replayed(store, &tokens) {
                applied += 1;
            }
        }

        Ok(applied)
    }

    /// Compacts the log against the live store. See the module docs for
    /// the swap protocol and the accepted loss window.
    pub fn rewrite(&self, store: &Store) -> io::Result<()> {
        let entries = store.dump();
        let now = SystemTime::now();

        let tmp_path = rewrite_path(&self.path);
        let mut tmp = BufWriter::new(File::create(&tmp_path)?);

        for (key, value) in entries {
            if value.is_expired() {
                continue;
            }
            let ttl_secs = value
                .expires_at
                .and_then(|exp| exp.duration_since(now).ok())
                .map(|d| d.as_secs());

            match &value.data {
                ValueData::Str(s) => match ttl_secs {
                    Some(secs) => tmp.write_all(
                        format_command("SET", &[&key, s, &secs.to_string()]).as_bytes(),
                    )?,
                    None => tmp.write_all(format_command("SET", &[&key, s]).as_bytes())?,
                },
                ValueData::List(list) => {
                    let mut args: Vec<&str> = Vec::with_capacity(list.len() + 1);
                    args.push(&key);
                    args.extend(list.iter().map(|s| s.as_str()));
                    tmp.write_all(format_command("RPUSH", &args).as_bytes())?;
                    if let Some(secs) = ttl_secs {
                        tmp.write_all(
                            format_command("EXPIRE", &[&key, &secs.to_string()]).as_bytes(),
                        )?;
                    }
                }
                ValueData::Hash(hash) => {
                    for (field, v) in hash {
                        tmp.write_all(format_command("HSET", &[&key, field, v]).as_bytes())?;
                    }
                    if let Some(secs) = ttl_secs {
                        tmp.write_all(
                            format_command("EXPIRE", &[&key, &secs.to_string()]).as_bytes(),
                        )?;
                    }
                }
            }
        }

        tmp.flush()?;
        tmp.get_ref().sync_data()?;
        drop(tmp);

        // Swap under the writer mutex: later appends land in the new file.
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *writer = BufWriter::new(file);

        info!(path = %self.path.display(), "AOF rewrite complete");
        Ok(())
    }
}

/// Dispatches one replayed command. Returns false for commands that were
/// skipped (unknown name, bad arity, unparseable integers, `FLUSH`).
fn apply_replayed(store: &Store, tokens: &[String]) -> bool {
    let cmd = tokens[0].to_uppercase();
    let args = &tokens[1..];

    match cmd.as_str() {
        "SET" if args.len() >= 2 => {
            let ttl = args
                .get(2)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            store.apply_set(&args[0], &args[1], ttl);
        }
        "EXPIRE" if args.len() >= 2 => match args[1].parse::<u64>() {
            Ok(secs) => store.apply_expire(&args[0], Duration::from_secs(secs)),
            Err(_) => return false,
        },
        "DEL" if !args.is_empty() => {
            for key in args {
                store.apply_del(key);
            }
        }
        "LPUSH" if args.len() >= 2 => store.apply_lpush(&args[0], &args[1..]),
        "RPUSH" if args.len() >= 2 => store.apply_rpush(&args[0], &args[1..]),
        "LPOP" if !args.is_empty() => store.apply_lpop(&args[0]),
        "RPOP" if !args.is_empty() => store.apply_rpop(&args[0]),
        "LSET" if args.len() >= 3 => match args[1].parse::<i64>() {
            Ok(index) => store.apply_lset(&args[0], index, &args[2]),
            Err(_) => return false,
        },
        "LREM" if args.len() >= 3 => match args[1].parse::<i64>() {
            Ok(count) => store.apply_lrem(&args[0], count, &args[2]),
            Err(_) => return false,
        },
        "LTRIM" if args.len() >= 3 => {
            match (args[1].parse::<i64>(), args[2].parse::<i64>()) {
                (Ok(start), Ok(stop)) => store.apply_ltrim(&args[0], start, stop),
                _ => return false,
            }
        }
        "HSET" if args.len() >= 3 => store.apply_hset(&args[0], &args[1], &args[2]),
        "HDEL" if args.len() >= 2 => store.apply_hdel(&args[0], &args[1..]),
        // A logged FLUSH only forced a snapshot; it mutates nothing.
        "FLUSH" => return false,
        other => {
            debug!(command = other, "unknown command in AOF, skipping");
            return false;
        }
    }
    true
}

/// Formats one log line: space-separated tokens, arguments containing a
/// space wrapped in double quotes, newline-terminated.
fn format_command(cmd: &str, args: &[&str]) -> String {
    let mut line = String::with_capacity(cmd.len() + args.iter().map(|a| a.len() + 3).sum::<usize>() + 1);
    line.push_str(cmd);
    for arg in args {
        line.push(' ');
        if arg.contains(' ') {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line.push('\n');
    line
}

/// Splits a log line into tokens. A double quote toggles an in-quotes
/// state in which spaces are literal. Returns `None` on unclosed quotes.
fn split_command_line(line: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    if in_quotes {
        None
    } else {
        Some(tokens)
    }
}

fn rewrite_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".rewrite");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;
    use tokio::sync::mpsc;

    fn new_store() -> Store {
        let (tx, _rx) = mpsc::channel(100);
        Store::new(tx)
    }

    #[test]
    fn format_quotes_spaced_arguments() {
        assert_eq!(format_command("SET", &["k", "v"]), "SET k v\n");
        assert_eq!(
            format_command("SET", &["k", "hello world"]),
            "SET k \"hello world\"\n"
        );
        assert_eq!(format_command("FLUSH", &[]), "FLUSH\n");
    }

    #[test]
    fn split_round_trips_quoted_tokens() {
        assert_eq!(
            split_command_line("SET k v").unwrap(),
            vec!["SET", "k", "v"]
        );
        assert_eq!(
            split_command_line("SET k \"hello world\"").unwrap(),
            vec!["SET", "k", "hello world"]
        );
        assert_eq!(
            split_command_line("  SET   k   v  ").unwrap(),
            vec!["SET", "k", "v"]
        );
        assert!(split_command_line("").unwrap().is_empty());
        assert!(split_command_line("SET k \"unclosed").is_none());
    }

    #[test]
    fn append_writes_one_line_per_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        log.append("SET", &["a", "1"]).unwrap();
        log.append("SET", &["b", "two words"]).unwrap();
        log.append("DEL", &["a"]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "SET a 1\nSET b \"two words\"\nDEL a\n");
    }

    #[test]
    fn replay_reconstructs_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        log.append("SET", &["a", "1"]).unwrap();
        log.append("SET", &["b", "2"]).unwrap();
        log.append("DEL", &["a"]).unwrap();
        log.append("RPUSH", &["l", "x", "y"]).unwrap();
        log.append("LPUSH", &["l", "w"]).unwrap();
        log.append("LPOP", &["l"]).unwrap();
        log.append("HSET", &["h", "f", "v"]).unwrap();
        log.append("HSET", &["h", "g", "u"]).unwrap();
        log.append("HDEL", &["h", "g"]).unwrap();

        let store = new_store();
        let applied = log.replay(&store).unwrap();
        assert_eq!(applied, 9);

        assert_eq!(store.get("a"), Err(StoreError::NotFound));
        assert_eq!(store.get("b").unwrap(), "2");
        assert_eq!(store.lrange("l", 0, -1).unwrap(), vec!["x", "y"]);
        assert_eq!(store.hget("h", "f").unwrap(), "v");
        assert_eq!(store.hget("h", "g"), Err(StoreError::NotFound));
    }

    #[test]
    fn replay_preserves_values_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        log.append("SET", &["greeting", "hello there world"]).unwrap();
        log.append("RPUSH", &["l", "first item", "second item"]).unwrap();

        let store = new_store();
        log.replay(&store).unwrap();

        assert_eq!(store.get("greeting").unwrap(), "hello there world");
        assert_eq!(
            store.lrange("l", 0, -1).unwrap(),
            vec!["first item", "second item"]
        );
    }

    #[test]
    fn replay_applies_set_ttl_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");
        std::fs::write(&path, "SET k v 100\nSET p q\n").unwrap();

        let log = AofLog::open(&path, SyncPolicy::Never).unwrap();
        let store = new_store();
        log.replay(&store).unwrap();

        let ttl = store.ttl("k").unwrap().unwrap();
        assert!(ttl > Duration::from_secs(90) && ttl <= Duration::from_secs(100));
        assert_eq!(store.ttl("p").unwrap(), None);
    }

    #[test]
    fn replay_skips_junk_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");
        std::fs::write(
            &path,
            "SET a 1\n\nFLUSH\nBOGUS x y\nLSET l notanint v\nSET b 2\n",
        )
        .unwrap();

        let log = AofLog::open(&path, SyncPolicy::Never).unwrap();
        let store = new_store();
        let applied = log.replay(&store).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(store.get("a").unwrap(), "1");
        assert_eq!(store.get("b").unwrap(), "2");
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.aof");

        // Open creates the file, so probe replay against a log that was
        // never opened for writing.
        let log = AofLog {
            writer: Mutex::new(BufWriter::new(
                File::create(dir.path().join("other.aof")).unwrap(),
            )),
            path,
            policy: SyncPolicy::Never,
        };
        let store = new_store();
        assert_eq!(log.replay(&store).unwrap(), 0);
    }

    #[test]
    fn store_logs_mutations_through_installed_aof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        let store = new_store();
        store.install_aof(Arc::clone(&log));

        store.set("a", "1", None);
        store.set("t", "v", Some(Duration::from_secs(60)));
        store.rpush("l", &["x".into(), "y z".into()]).unwrap();
        store.hset("h", "f", "v").unwrap();
        store.del("a").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "SET a 1",
                "SET t v 60",
                "RPUSH l x \"y z\"",
                "HSET h f v",
                "DEL a",
            ]
        );

        // Crash-recovery: replaying the log rebuilds the state.
        let restored = new_store();
        log.replay(&restored).unwrap();
        assert_eq!(restored.get("a"), Err(StoreError::NotFound));
        assert_eq!(restored.get("t").unwrap(), "v");
        assert_eq!(restored.lrange("l", 0, -1).unwrap(), vec!["x", "y z"]);
        assert_eq!(restored.hget("h", "f").unwrap(), "v");
    }

    #[test]
    fn rewrite_compacts_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        let store = new_store();
        store.install_aof(Arc::clone(&log));

        // Churn: many commands, small final state.
        for i in 0..50 {
            store.set("counter", &i.to_string(), None);
        }
        store.set("name", "flex db", None);
        store.rpush("l", &["a".into(), "b".into()]).unwrap();
        store.hset("h", "f", "v").unwrap();
        store.expire("h", Duration::from_secs(600)).unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        log.rewrite(&store).unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);

        // The compacted log reproduces the same state.
        let restored = new_store();
        log.replay(&restored).unwrap();
        assert_eq!(restored.get("counter").unwrap(), "49");
        assert_eq!(restored.get("name").unwrap(), "flex db");
        assert_eq!(restored.lrange("l", 0, -1).unwrap(), vec!["a", "b"]);
        assert_eq!(restored.hget("h", "f").unwrap(), "v");
        assert!(restored.ttl("h").unwrap().is_some());
    }

    #[test]
    fn appends_after_rewrite_land_in_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        let store = new_store();
        store.install_aof(Arc::clone(&log));

        store.set("a", "1", None);
        log.rewrite(&store).unwrap();
        store.set("b", "2", None);
        log.sync().unwrap();

        let restored = new_store();
        log.replay(&restored).unwrap();
        assert_eq!(restored.get("a").unwrap(), "1");
        assert_eq!(restored.get("b").unwrap(), "2");
        assert!(!rewrite_path(&path).exists());
    }

    #[tokio::test]
    async fn everysecond_policy_syncs_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let log = AofLog::open(&path, SyncPolicy::EverySecond).unwrap();
        log.append("SET", &["k", "v"]).unwrap();

        // The buffered line reaches the file once the background task runs.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "SET k v\n");
    }
}
