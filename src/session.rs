use std::env;
use std::path::PathBuf;

pub const SYSNAME: &str = "seashell";

/// Interpreter-wide state, passed explicitly instead of living in globals so
/// the execution engine and the builtins stay testable in isolation.
///
/// The working directory is deliberately not mirrored here: `cd` must change
/// the real process directory anyway (spawned children inherit it), so the
/// process itself is the single source of truth.
pub struct Session {
    /// Previous completed line, recalled by the editor on cursor-up.
    pub history_slot: String,
    /// Home directory used for the history log and the shortdir table.
    pub home: Option<PathBuf>,
}

impl Session {
    pub fn new() -> Session {
        Session {
            history_slot: String::new(),
            home: env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn with_home(home: PathBuf) -> Session {
        Session {
            history_slot: String::new(),
            home: Some(home),
        }
    }

    pub fn home_file(&self, name: &str) -> Option<PathBuf> {
        self.home.as_ref().map(|home| home.join(name))
    }
}
