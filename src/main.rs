mod builtin;
mod editor;
mod eval;
mod parser;
mod prompt;
mod session;

use std::io::{self, Write};

use editor::Signal;
use eval::Flow;
use session::Session;

fn main() {
    let mut session = Session::new();
    loop {
        prompt::show();
        let (line, signal) = match editor::read_line(&mut session) {
            Ok(read) => read,
            Err(err) => {
                let _ = writeln!(io::stderr(), "-{}: {}", session::SYSNAME, err);
                break;
            }
        };
        if signal == Signal::EndOfInput {
            break;
        }
        let pipeline = parser::parse(&line);
        match eval::execute(&mut session, &pipeline) {
            Flow::Continue => {}
            Flow::Exit => break,
        }
    }
    println!();
}
