use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use chrono::Local;
use nix::unistd;

use crate::parser::{Command, Pipeline};
use crate::prompt;
use crate::session::{Session, SYSNAME};

const HISTORY_FILE: &str = "history.txt";
const SHORTDIR_FILE: &str = ".seashell_shortdir";

/// Outcome of offering a command to the builtin table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    NotHandled,
}

/// A command handled inside the interpreter instead of by spawning a
/// process. Builtins write their output through `out`, which the dispatcher
/// points at stdout or at the stage's own output redirection.
trait Builtin {
    fn name(&self) -> &'static str;
    fn run(&self, session: &mut Session, cmd: &Command, out: &mut dyn Write) -> Result<()>;
}

fn registry() -> Vec<Box<dyn Builtin>> {
    vec![
        Box::new(Shortdir),
        Box::new(Hist),
        Box::new(Kdiff),
        Box::new(Highlight),
        Box::new(GoodMorning),
    ]
}

/// Offers a single, non-piped stage to the registered builtins.
pub fn dispatch(session: &mut Session, cmd: &Command) -> Status {
    for builtin in registry() {
        if builtin.name() != cmd.name {
            continue;
        }
        return match run_redirected(builtin.as_ref(), session, cmd) {
            Ok(()) => Status::Success,
            Err(err) => {
                let _ = writeln!(io::stderr(), "-{}: {}: {:#}", SYSNAME, cmd.name, err);
                Status::Failure
            }
        };
    }
    Status::NotHandled
}

fn run_redirected(builtin: &dyn Builtin, session: &mut Session, cmd: &Command) -> Result<()> {
    let mut out: Box<dyn Write> = if let Some(path) = &cmd.redirect_out {
        Box::new(File::create(path).with_context(|| format!("cannot write {}", path))?)
    } else if let Some(path) = &cmd.redirect_append {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("cannot write {}", path))?;
        Box::new(file)
    } else {
        Box::new(io::stdout())
    };
    builtin.run(session, cmd, &mut *out)?;
    out.flush()?;
    Ok(())
}

/// Appends the command line to the history log before it is dispatched.
/// Logger failure is reported once and never stops the command itself.
pub fn log_history(session: &Session, pipeline: &Pipeline) {
    if let Err(err) = append_history(session, pipeline) {
        let _ = writeln!(io::stderr(), "-{}: history: {:#}", SYSNAME, err);
    }
}

fn append_history(session: &Session, pipeline: &Pipeline) -> Result<()> {
    let path = history_path(session)?;
    let mut file = OpenOptions::new().append(true).create(true).open(&path)?;

    let mut line = format!(
        "{} {}",
        prompt::username(),
        Local::now().format("%d/%m/%Y %a %H:%M:%S")
    );
    for (i, cmd) in pipeline.commands.iter().enumerate() {
        if i > 0 {
            line.push_str(" |");
        }
        line.push(' ');
        line.push_str(&cmd.name);
        for arg in &cmd.args {
            line.push(' ');
            line.push_str(arg);
        }
    }
    writeln!(file, "{}", line)?;
    Ok(())
}

fn history_path(session: &Session) -> Result<PathBuf> {
    session
        .home_file(HISTORY_FILE)
        .context("HOME is not set")
}

fn shortdir_path(session: &Session) -> Result<PathBuf> {
    session
        .home_file(SHORTDIR_FILE)
        .context("HOME is not set")
}

/// Directory aliases persisted as `name<TAB>path` lines.
struct Shortdir;

impl Builtin for Shortdir {
    fn name(&self) -> &'static str {
        "shortdir"
    }

    fn run(&self, session: &mut Session, cmd: &Command, out: &mut dyn Write) -> Result<()> {
        let usage = "usage: shortdir set|jump|del|list|clear [name]";
        let sub = cmd.args.first().context(usage)?;
        let path = shortdir_path(session)?;
        let mut table = read_table(&path)?;

        match (sub.as_str(), cmd.args.get(1)) {
            ("set", Some(name)) => {
                let cwd = env::current_dir()?.display().to_string();
                if table.iter().any(|(alias, _)| alias == name) {
                    bail!("{} alias already used", name);
                }
                // one alias per directory: renaming replaces the old one
                if let Some(entry) = table.iter_mut().find(|(_, dir)| *dir == cwd) {
                    entry.0 = name.clone();
                } else {
                    table.push((name.clone(), cwd.clone()));
                }
                writeln!(out, "{} is set as an alias for {}", name, cwd)?;
                write_table(&path, &table)?;
            }
            ("jump", Some(name)) => {
                let dir = table
                    .iter()
                    .find(|(alias, _)| alias == name)
                    .map(|(_, dir)| dir.clone())
                    .with_context(|| format!("no alias named {}", name))?;
                unistd::chdir(dir.as_str())
                    .with_context(|| format!("cannot jump to {}", dir))?;
            }
            ("del", Some(name)) => {
                table.retain(|(alias, _)| alias != name);
                write_table(&path, &table)?;
            }
            ("list", _) => {
                for (alias, dir) in &table {
                    writeln!(out, "name: {} directory: {}", alias, dir)?;
                }
            }
            ("clear", _) => {
                write_table(&path, &[])?;
            }
            _ => bail!("{}", usage),
        }
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<Vec<(String, String)>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("cannot read {}", path.display())),
    };
    Ok(text
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(alias, dir)| (alias.to_string(), dir.to_string()))
        .collect())
}

fn write_table(path: &Path, table: &[(String, String)]) -> Result<()> {
    let mut text = String::new();
    for (alias, dir) in table {
        text.push_str(alias);
        text.push('\t');
        text.push_str(dir);
        text.push('\n');
    }
    fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
}

/// Queries over the on-disk command-history log.
struct Hist;

impl Builtin for Hist {
    fn name(&self) -> &'static str {
        "hist"
    }

    fn run(&self, session: &mut Session, cmd: &Command, out: &mut dyn Write) -> Result<()> {
        let usage = "usage: hist all|user <name>|date <dd/mm/YYYY>|clear";
        let sub = cmd.args.first().context(usage)?;
        let path = history_path(session)?;

        // log entries are `<user> <date> <day> <time> <command...>`
        let matches = |line: &str| -> bool {
            let mut fields = line.split_whitespace();
            match (sub.as_str(), cmd.args.get(1)) {
                ("all", _) => true,
                ("user", Some(user)) => fields.next() == Some(user.as_str()),
                ("date", Some(date)) => fields.nth(1) == Some(date.as_str()),
                _ => false,
            }
        };

        match sub.as_str() {
            "clear" => {
                fs::write(&path, "")?;
            }
            "all" | "user" | "date" => {
                let text = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
                    Err(err) => return Err(err.into()),
                };
                for line in text.lines().filter(|line| matches(line)) {
                    writeln!(out, "{}", line)?;
                }
            }
            _ => bail!("{}", usage),
        }
        Ok(())
    }
}

/// Two-file comparison: `-a` (default) line by line, `-b` byte by byte.
struct Kdiff;

impl Builtin for Kdiff {
    fn name(&self) -> &'static str {
        "kdiff"
    }

    fn run(&self, _session: &mut Session, cmd: &Command, out: &mut dyn Write) -> Result<()> {
        let usage = "usage: kdiff [-a|-b] <file1> <file2>";
        let (binary, left, right) = match cmd.args.as_slice() {
            [mode, left, right] if mode == "-a" => (false, left, right),
            [mode, left, right] if mode == "-b" => (true, left, right),
            [left, right] => (false, left, right),
            _ => bail!("{}", usage),
        };

        if binary {
            let left_bytes = fs::read(left).with_context(|| format!("cannot read {}", left))?;
            let right_bytes = fs::read(right).with_context(|| format!("cannot read {}", right))?;
            let long = left_bytes.len().max(right_bytes.len());
            let diff = (0..long)
                .filter(|&i| left_bytes.get(i) != right_bytes.get(i))
                .count();
            if diff != 0 {
                writeln!(out, "The two files are different in {} bytes", diff)?;
            } else {
                writeln!(out, "Files are identical")?;
            }
            return Ok(());
        }

        let left_text = fs::read_to_string(left).with_context(|| format!("cannot read {}", left))?;
        let right_text =
            fs::read_to_string(right).with_context(|| format!("cannot read {}", right))?;
        let left_lines: Vec<&str> = left_text.lines().collect();
        let right_lines: Vec<&str> = right_text.lines().collect();

        let mut diff = 0;
        for i in 0..left_lines.len().max(right_lines.len()) {
            let a = left_lines.get(i).copied().unwrap_or("");
            let b = right_lines.get(i).copied().unwrap_or("");
            if a != b {
                writeln!(out, "{}:Line {}:{}", left, i + 1, a)?;
                writeln!(out, "{}:Line {}:{}", right, i + 1, b)?;
                diff += 1;
            }
        }
        if diff != 0 {
            writeln!(out, "{} different lines are found", diff)?;
        } else {
            writeln!(out, "Files are identical")?;
        }
        Ok(())
    }
}

/// Prints a file with whole-word, case-insensitive matches wrapped in an
/// ANSI color.
struct Highlight;

const COLOR_RESET: &str = "\x1b[0m";

impl Builtin for Highlight {
    fn name(&self) -> &'static str {
        "highlight"
    }

    fn run(&self, _session: &mut Session, cmd: &Command, out: &mut dyn Write) -> Result<()> {
        let usage = "usage: highlight <word> <r|g|b> <file>";
        let (word, color, file) = match cmd.args.as_slice() {
            [word, color, file] => (word, color, file),
            _ => bail!("{}", usage),
        };
        let color = match color.as_str() {
            "r" => "\x1b[0;31m",
            "g" => "\x1b[32m",
            "b" => "\x1b[0;34m",
            _ => bail!("{}", usage),
        };

        let text = fs::read_to_string(file).with_context(|| format!("cannot read {}", file))?;
        for line in text.lines() {
            let mut first = true;
            for token in line.split(' ') {
                if !first {
                    write!(out, " ")?;
                }
                first = false;
                if token.eq_ignore_ascii_case(word) {
                    write!(out, "{}{}{}", color, token, COLOR_RESET)?;
                } else {
                    write!(out, "{}", token)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Scheduled-job collaborator: registers a cron entry that plays a file at
/// the given time. Thin wrapper around the system crontab.
struct GoodMorning;

impl Builtin for GoodMorning {
    fn name(&self) -> &'static str {
        "goodMorning"
    }

    fn run(&self, _session: &mut Session, cmd: &Command, _out: &mut dyn Write) -> Result<()> {
        let usage = "usage: goodMorning <HH.MM> <file>";
        let (time, song) = match cmd.args.as_slice() {
            [time, song] => (time, song),
            _ => bail!("{}", usage),
        };
        let (hour, minute) = time.split_once('.').context(usage)?;
        if !Path::new(song).exists() {
            bail!("no such file: {}", song);
        }

        let entry = format!(
            "{} {} * * * DISPLAY=:0 rhythmbox-client --play {}\n",
            minute, hour, song
        );
        let path = env::temp_dir().join("seashell-crontab");
        fs::write(&path, entry)?;
        let status = process::Command::new("crontab")
            .arg(&path)
            .status()
            .context("cannot run crontab")?;
        if !status.success() {
            bail!("crontab exited with {}", status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir =
            env::temp_dir().join(format!("seashell-builtin-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run_capture(builtin: &dyn Builtin, session: &mut Session, line: &str) -> Result<String> {
        let cmd = parse(line).commands.remove(0);
        let mut out = Vec::new();
        builtin.run(session, &cmd, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn unknown_names_are_not_handled() {
        let mut session = Session::with_home(scratch_dir("unknown"));
        let cmd = parse("frobnicate now").commands.remove(0);
        assert_eq!(dispatch(&mut session, &cmd), Status::NotHandled);
    }

    #[test]
    fn shortdir_table_round_trips() {
        let dir = scratch_dir("table");
        let path = dir.join(SHORTDIR_FILE);
        let table = vec![
            ("docs".to_string(), "/home/u/docs".to_string()),
            ("src".to_string(), "/home/u/src".to_string()),
        ];
        write_table(&path, &table).unwrap();
        assert_eq!(read_table(&path).unwrap(), table);
    }

    #[test]
    fn shortdir_list_prints_stored_aliases() {
        let dir = scratch_dir("list");
        let path = dir.join(SHORTDIR_FILE);
        write_table(&path, &[("docs".to_string(), "/home/u/docs".to_string())]).unwrap();
        let mut session = Session::with_home(dir);
        let out = run_capture(&Shortdir, &mut session, "shortdir list").unwrap();
        assert_eq!(out, "name: docs directory: /home/u/docs\n");
    }

    #[test]
    fn shortdir_rejects_a_taken_alias() {
        let dir = scratch_dir("taken");
        let path = dir.join(SHORTDIR_FILE);
        write_table(&path, &[("here".to_string(), "/elsewhere".to_string())]).unwrap();
        let mut session = Session::with_home(dir);
        assert!(run_capture(&Shortdir, &mut session, "shortdir set here").is_err());
    }

    #[test]
    fn history_log_is_queryable_by_user() {
        let dir = scratch_dir("hist");
        let mut session = Session::with_home(dir.clone());
        log_history(&session, &parse("echo one"));
        log_history(&session, &parse("ls -l | wc"));
        fs::OpenOptions::new()
            .append(true)
            .open(dir.join(HISTORY_FILE))
            .unwrap()
            .write_all(b"someoneelse 01/01/2026 Thu 09:00:00 rm -rf /tmp/x\n")
            .unwrap();

        let all = run_capture(&Hist, &mut session, "hist all").unwrap();
        assert_eq!(all.lines().count(), 3);
        assert!(all.contains("echo one"));
        assert!(all.contains("ls -l | wc"));

        let mine = run_capture(
            &Hist,
            &mut session,
            &format!("hist user {}", prompt::username()),
        )
        .unwrap();
        assert_eq!(mine.lines().count(), 2);
        assert!(!mine.contains("someoneelse"));

        run_capture(&Hist, &mut session, "hist clear").unwrap();
        let cleared = run_capture(&Hist, &mut session, "hist all").unwrap();
        assert!(cleared.is_empty());
    }

    #[test]
    fn kdiff_counts_differing_lines() {
        let dir = scratch_dir("kdiff");
        let left = dir.join("left.txt");
        let right = dir.join("right.txt");
        fs::write(&left, "same\nold\nsame\n").unwrap();
        fs::write(&right, "same\nnew\nsame\n").unwrap();
        let mut session = Session::with_home(dir);
        let out = run_capture(
            &Kdiff,
            &mut session,
            &format!("kdiff -a {} {}", left.display(), right.display()),
        )
        .unwrap();
        assert!(out.contains(":Line 2:old"));
        assert!(out.contains(":Line 2:new"));
        assert!(out.ends_with("1 different lines are found\n"));
    }

    #[test]
    fn kdiff_reports_identical_files() {
        let dir = scratch_dir("kdiff-same");
        let left = dir.join("a.txt");
        let right = dir.join("b.txt");
        fs::write(&left, "x\n").unwrap();
        fs::write(&right, "x\n").unwrap();
        let mut session = Session::with_home(dir);
        let out = run_capture(
            &Kdiff,
            &mut session,
            &format!("kdiff -b {} {}", left.display(), right.display()),
        )
        .unwrap();
        assert_eq!(out, "Files are identical\n");
    }

    #[test]
    fn kdiff_counts_differing_bytes() {
        let dir = scratch_dir("kdiff-bytes");
        let left = dir.join("a.bin");
        let right = dir.join("b.bin");
        fs::write(&left, b"abcd").unwrap();
        fs::write(&right, b"abXY12").unwrap();
        let mut session = Session::with_home(dir);
        let out = run_capture(
            &Kdiff,
            &mut session,
            &format!("kdiff -b {} {}", left.display(), right.display()),
        )
        .unwrap();
        assert_eq!(out, "The two files are different in 4 bytes\n");
    }

    #[test]
    fn highlight_wraps_whole_word_matches() {
        let dir = scratch_dir("highlight");
        let file = dir.join("text.txt");
        fs::write(&file, "Foo bar\nfoobar foo\n").unwrap();
        let mut session = Session::with_home(dir);
        let out = run_capture(
            &Highlight,
            &mut session,
            &format!("highlight foo r {}", file.display()),
        )
        .unwrap();
        assert_eq!(
            out,
            "\x1b[0;31mFoo\x1b[0m bar\nfoobar \x1b[0;31mfoo\x1b[0m\n"
        );
    }
}
