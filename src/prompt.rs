use std::env;
use std::io::{self, Write};

use nix::unistd::{self, User};

use crate::session::SYSNAME;

/// Name of the invoking user, with a placeholder when the lookup fails.
pub fn username() -> String {
    User::from_uid(unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| String::from("?"))
}

/// Prints `user@host:cwd seashell$ ` before each read.
pub fn show() {
    let host = unistd::gethostname()
        .map(|host| host.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("?"));
    let cwd = env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| String::from("?"));
    print!("{}@{}:{} {}$ ", username(), host, cwd, SYSNAME);
    let _ = io::stdout().flush();
}
